//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.

use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::reactive::OwnerId;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A source node (signal). These are the roots of the graph.
    /// They have no dependencies, only dependents.
    Source,

    /// A derived node (computed). These have dependencies and may have dependents.
    /// They cache their computed value.
    Derived,

    /// An effect node. These are leaves of the graph.
    /// They have dependencies but no dependents (they produce side effects, not values).
    Effect,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Source => "signal",
            NodeKind::Derived => "computed",
            NodeKind::Effect => "effect",
        };
        f.write_str(name)
    }
}

/// Dirty state of a node.
///
/// The ordering matters: propagation only ever raises a node's state, so
/// `Clean < MaybeDirty < Dirty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// The node might need to recompute. One of its upstream computeds was
    /// invalidated, but we have not yet verified that its value is different.
    MaybeDirty,

    /// The node definitely needs to recompute. A direct input changed.
    Dirty,
}

/// The type-erased body of a derived or effect node.
///
/// The runtime owns scheduling, tracking and error isolation; implementors
/// only run user code and store its result.
pub(crate) trait Computation {
    /// Run the user function once. Returns whether the observable value
    /// changed (always `true` for effects).
    fn evaluate(&self) -> bool;

    /// Run and clear any cleanup left by the previous evaluation.
    fn cleanup(&self) {}
}

/// How the graph holds on to a node's computation.
pub(crate) enum NodeComputation {
    /// Computeds are kept alive by their handles.
    Derived(Weak<dyn Computation>),

    /// Effects are kept alive by the graph until disposed.
    Effect(Rc<dyn Computation>),
}

impl NodeComputation {
    fn get(&self) -> Option<Rc<dyn Computation>> {
        match self {
            NodeComputation::Derived(weak) => weak.upgrade(),
            NodeComputation::Effect(rc) => Some(Rc::clone(rc)),
        }
    }
}

/// A node in the dependency graph.
pub struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// What kind of node this is.
    kind: NodeKind,

    /// Current dirty state.
    dirty: DirtyState,

    /// Whether a derived node holds a valid memoized value.
    cached: bool,

    /// Disposed nodes ignore notifications and keep no edges.
    disposed: bool,

    /// Owner scope the computation runs under.
    owner: Option<OwnerId>,

    /// Nodes that this node read during its last successful evaluation,
    /// in read order.
    dependencies: SmallVec<[NodeId; 4]>,

    /// Nodes that depend on this node, in subscription order.
    dependents: IndexSet<NodeId>,

    computation: Option<NodeComputation>,

    /// Bumped every time the node's value changes.
    version: u64,

    evaluations: usize,
}

impl Node {
    fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            dirty: match kind {
                NodeKind::Source => DirtyState::Clean,
                NodeKind::Derived => DirtyState::Dirty, // Start dirty to ensure first computation
                NodeKind::Effect => DirtyState::Dirty,
            },
            cached: false,
            disposed: false,
            owner: None,
            dependencies: SmallVec::new(),
            dependents: IndexSet::new(),
            computation: None,
            version: 0,
            evaluations: 0,
        }
    }

    /// Create a new source (signal) node.
    pub fn source(id: NodeId) -> Self {
        Self::new(id, NodeKind::Source)
    }

    /// Create a new derived (computed) node.
    pub(crate) fn derived(
        id: NodeId,
        owner: Option<OwnerId>,
        computation: Weak<dyn Computation>,
    ) -> Self {
        let mut node = Self::new(id, NodeKind::Derived);
        node.owner = owner;
        node.computation = Some(NodeComputation::Derived(computation));
        node
    }

    /// Create a new effect node running under its own owner scope.
    pub(crate) fn effect(id: NodeId, scope: OwnerId, computation: Rc<dyn Computation>) -> Self {
        let mut node = Self::new(id, NodeKind::Effect);
        node.owner = Some(scope);
        node.computation = Some(NodeComputation::Effect(computation));
        node
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Get the current dirty state.
    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    pub(crate) fn set_dirty_state(&mut self, state: DirtyState) {
        self.dirty = state;
    }

    /// Check if the node needs any processing.
    pub fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    /// Mark the node as clean.
    pub fn mark_clean(&mut self) {
        self.dirty = DirtyState::Clean;
    }

    /// Raise the dirty state to `state`. Never lowers it. Returns whether
    /// the state changed.
    pub fn raise_state(&mut self, state: DirtyState) -> bool {
        if state > self.dirty {
            self.dirty = state;
            true
        } else {
            false
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub(crate) fn set_cached(&mut self, cached: bool) {
        self.cached = cached;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub(crate) fn set_disposed(&mut self) {
        self.disposed = true;
    }

    pub(crate) fn owner(&self) -> Option<OwnerId> {
        self.owner
    }

    pub(crate) fn computation(&self) -> Option<Rc<dyn Computation>> {
        self.computation.as_ref().and_then(NodeComputation::get)
    }

    /// Write version of the node's value.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Number of completed evaluations.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub(crate) fn record_evaluation(&mut self) {
        self.evaluations += 1;
    }

    /// Add a dependency (a node that this node reads from).
    pub fn add_dependency(&mut self, node_id: NodeId) {
        if !self.dependencies.contains(&node_id) {
            self.dependencies.push(node_id);
        }
    }

    /// Remove a dependency.
    pub fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.retain(|id| *id != node_id);
    }

    /// Get all dependencies, in read order.
    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    pub(crate) fn take_dependencies(&mut self) -> SmallVec<[NodeId; 4]> {
        std::mem::take(&mut self.dependencies)
    }

    /// Add a dependent (a node that reads from this node).
    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    /// Remove a dependent.
    pub fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }

    /// Get all dependents.
    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    pub(crate) fn take_dependents(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.dependents)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("dirty", &self.dirty)
            .field("cached", &self.cached)
            .field("disposed", &self.disposed)
            .field("version", &self.version)
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .finish()
    }
}
