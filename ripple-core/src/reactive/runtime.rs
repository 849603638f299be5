//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, computeds,
//! effects and owners. It manages the dependency graph and schedules updates
//! when signals change.
//!
//! # How It Works
//!
//! 1. When a signal or computed is created, it registers a node with the
//!    runtime. Effects additionally get an owner scope of their own.
//!
//! 2. When a computed or effect reads a node, the read is recorded in the
//!    current tracking frame and committed to the graph once the evaluation
//!    finishes. If one of those sources was written in the meantime, the
//!    observer is marked stale right away and, for an effect, queued again.
//!
//! 3. When a signal's value changes, the runtime:
//!    a. Marks its direct dependents dirty
//!    b. Marks everything further downstream "maybe dirty"
//!    c. Queues the effects that were reached
//!    d. Flushes the queue unless a batch is open
//!
//! 4. A maybe-dirty node brings its sources up to date in read order before
//!    deciding whether it really has to re-run, so a computed that recomputes
//!    to an equal value stops propagation right there.
//!
//! # Threading
//!
//! There is one runtime per thread. Handles hold `Rc`s and are therefore
//! neither `Send` nor `Sync`; the reactive graph of one thread is invisible
//! to every other thread.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::config::RuntimeConfig;
use crate::error::{EvaluationError, ReactiveError};
use crate::graph::{Computation, DirtyState, Graph, Node, NodeId, NodeKind, UpdateScheduler};

use super::context::{ContextId, ContextStacks};
use super::owner::{OwnerId, OwnerNode};
use super::tracking::{Read, TrackingScope};

/// A boxed cleanup callback.
pub(crate) type CleanupFn = Box<dyn FnOnce()>;

/// A caught panic.
pub(crate) type PanicPayload = Box<dyn Any + Send>;

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

/// Handle to a registered node.
///
/// Dropping this handle unregisters the node from the runtime.
pub(crate) struct ReactiveHandle {
    id: NodeId,
}

impl ReactiveHandle {
    pub(crate) fn id(&self) -> NodeId {
        self.id
    }
}

impl Drop for ReactiveHandle {
    fn drop(&mut self) {
        // The runtime may already be gone during thread teardown.
        let _ = Runtime::try_with(|rt| rt.unregister(self.id));
    }
}

/// An effect that panicked during a flush.
pub(crate) struct Failure {
    pub(crate) error: EvaluationError,
    pub(crate) payload: PanicPayload,
}

/// Outcome of one flush.
#[derive(Default)]
#[must_use]
pub(crate) struct FlushReport {
    failures: Vec<Failure>,
    depth_exceeded: Option<usize>,
}

impl FlushReport {
    pub(crate) fn is_ok(&self) -> bool {
        self.failures.is_empty() && self.depth_exceeded.is_none()
    }

    pub(crate) fn into_result(self) -> Result<(), ReactiveError> {
        if let Some(limit) = self.depth_exceeded {
            return Err(ReactiveError::UpdateDepthExceeded { limit });
        }
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(ReactiveError::EffectsFailed(
                self.failures.into_iter().map(|failure| failure.error).collect(),
            ))
        }
    }

    /// Re-raise the first effect panic in the caller, or turn a runaway flush
    /// into a panic. Everything else was already logged when it happened.
    pub(crate) fn raise(self) {
        if let Some(first) = self.failures.into_iter().next() {
            panic::resume_unwind(first.payload);
        }
        if let Some(limit) = self.depth_exceeded {
            panic!("{}", ReactiveError::UpdateDepthExceeded { limit });
        }
    }
}

/// The reactive runtime of one thread.
pub struct Runtime {
    graph: RefCell<Graph>,
    scheduler: RefCell<UpdateScheduler>,
    owners: RefCell<HashMap<OwnerId, OwnerNode>>,
    current_owner: Cell<Option<OwnerId>>,
    /// Context values provided outside of any owner.
    root_contexts: RefCell<ContextStacks>,
    config: RefCell<RuntimeConfig>,
}

/// Restores the previous owner when dropped.
pub(crate) struct OwnerGuard {
    previous: Option<OwnerId>,
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        let _ = Runtime::try_with(|rt| rt.current_owner.set(previous));
    }
}

/// Clears the flushing flag when dropped.
struct FlushGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.runtime.scheduler.borrow_mut().set_flushing(false);
    }
}

impl Runtime {
    fn new() -> Self {
        Self {
            graph: RefCell::new(Graph::new()),
            scheduler: RefCell::new(UpdateScheduler::new()),
            owners: RefCell::new(HashMap::new()),
            current_owner: Cell::new(None),
            root_contexts: RefCell::new(ContextStacks::default()),
            config: RefCell::new(RuntimeConfig::default()),
        }
    }

    /// Run `f` against this thread's runtime.
    pub(crate) fn with<R>(f: impl FnOnce(&Runtime) -> R) -> R {
        RUNTIME.with(f)
    }

    /// Like [`Runtime::with`], but returns `None` once the runtime has been
    /// torn down at thread exit.
    pub(crate) fn try_with<R>(f: impl FnOnce(&Runtime) -> R) -> Option<R> {
        RUNTIME.try_with(f).ok()
    }

    pub(crate) fn config(&self) -> RuntimeConfig {
        self.config.borrow().clone()
    }

    pub(crate) fn set_config(&self, config: RuntimeConfig) {
        *self.config.borrow_mut() = config;
    }

    // ----------------------------------------------------------------------
    // Introspection
    // ----------------------------------------------------------------------

    /// Number of live nodes in this thread's graph.
    pub fn node_count() -> usize {
        Self::with(|rt| rt.graph.borrow().node_count())
    }

    /// Number of live owner scopes on this thread.
    pub fn owner_count() -> usize {
        Self::with(|rt| rt.owners.borrow().len())
    }

    /// Number of effects waiting for the next flush.
    pub fn pending_effects() -> usize {
        Self::with(|rt| rt.scheduler.borrow().pending_count())
    }

    // ----------------------------------------------------------------------
    // Nodes
    // ----------------------------------------------------------------------

    pub(crate) fn register_source(&self) -> ReactiveHandle {
        let id = self.graph.borrow_mut().add_node(Node::source(NodeId::new()));
        tracing::trace!(signal = %id, "registered signal");
        ReactiveHandle { id }
    }

    /// Register a computed under the current owner. The graph only holds it
    /// weakly; the typed handles keep it alive.
    pub(crate) fn register_derived(&self, computation: Weak<dyn Computation>) -> ReactiveHandle {
        let id = NodeId::new();
        let owner = self.current_owner();
        self.graph
            .borrow_mut()
            .add_node(Node::derived(id, owner, computation));
        if let Some(owner) = owner {
            if let Some(node) = self.owners.borrow_mut().get_mut(&owner) {
                node.nodes.push(id);
            }
        }
        tracing::trace!(computed = %id, "registered computed");
        ReactiveHandle { id }
    }

    fn unregister(&self, id: NodeId) {
        let removed = match self.graph.try_borrow_mut() {
            Ok(mut graph) => graph.remove_node(id),
            Err(_) => {
                tracing::warn!(node = %id, "graph busy while dropping a handle; node leaked");
                return;
            }
        };
        if let Ok(mut scheduler) = self.scheduler.try_borrow_mut() {
            scheduler.remove(id);
        }
        // A computed dropped before its owner: forget it there too.
        if let Some(owner) = removed.as_ref().and_then(Node::owner) {
            if let Ok(mut owners) = self.owners.try_borrow_mut() {
                if let Some(node) = owners.get_mut(&owner) {
                    node.nodes.retain(|node| *node != id);
                }
            }
        }
        drop(removed);
    }

    pub(crate) fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&Node) -> R) -> Option<R> {
        self.graph.borrow().get_node(id).map(f)
    }

    /// Record a read of `id` by the running computation.
    pub(crate) fn track_read(&self, id: NodeId) {
        TrackingScope::track(id);
        self.observe_version(id);
    }

    fn observe_version(&self, id: NodeId) {
        if let Some(version) = self.graph.borrow().version(id) {
            TrackingScope::observe_version(id, version);
        }
    }

    /// Track and bring a computed up to date before its value is read.
    ///
    /// The read is recorded first so that it survives a panic in the
    /// update; its version is only known once the update is done.
    pub(crate) fn read_derived(&self, id: NodeId) {
        if TrackingScope::is_evaluating(id) {
            panic!("{}", ReactiveError::CircularDependency(id));
        }
        TrackingScope::track(id);
        self.update_if_necessary(id);
        self.observe_version(id);
    }

    /// Called after a signal stored a new value.
    pub(crate) fn notify_signal_change(&self, id: NodeId) {
        let effects = {
            let mut graph = self.graph.borrow_mut();
            graph.bump_version(id);
            graph.mark_changed(id)
        };
        tracing::trace!(signal = %id, effects = effects.len(), "signal changed");
        self.schedule(effects);
    }

    /// Queue effects and flush right away unless a batch is open or a flush
    /// is already running further up the stack.
    fn schedule(&self, effects: Vec<NodeId>) {
        let should_flush = {
            let mut scheduler = self.scheduler.borrow_mut();
            scheduler.enqueue(effects);
            !scheduler.is_batching() && !scheduler.is_flushing() && scheduler.has_pending()
        };
        if should_flush {
            self.flush().raise();
        }
    }

    /// Bring a computed or effect up to date, re-running it only if one of
    /// its sources actually changed.
    pub(crate) fn update_if_necessary(&self, id: NodeId) {
        let Some((kind, state, disposed, cached)) = self.with_node(id, |node| {
            (node.kind(), node.dirty_state(), node.is_disposed(), node.is_cached())
        }) else {
            return;
        };

        if kind == NodeKind::Source {
            return;
        }
        if disposed {
            if kind == NodeKind::Derived && !cached {
                self.evaluate_detached(id);
            }
            return;
        }

        if state == DirtyState::MaybeDirty {
            let sources: SmallVec<[NodeId; 4]> = self
                .with_node(id, |node| node.dependencies().iter().copied().collect())
                .unwrap_or_default();
            for source in sources {
                let source_kind = self.with_node(source, Node::kind);
                if source_kind == Some(NodeKind::Derived) {
                    self.update_if_necessary(source);
                }
                // A source that recomputed to a new value marks us dirty.
                if self.graph.borrow().state(id) == Some(DirtyState::Dirty) {
                    break;
                }
            }
        }

        let Some((state, cached)) =
            self.with_node(id, |node| (node.dirty_state(), node.is_cached()))
        else {
            return;
        };
        if state == DirtyState::Dirty || (kind == NodeKind::Derived && !cached) {
            self.recompute(id);
        } else if state == DirtyState::MaybeDirty {
            self.graph.borrow_mut().set_state(id, DirtyState::Clean);
        }
    }

    fn recompute(&self, id: NodeId) {
        let Some((kind, owner, computation)) =
            self.with_node(id, |node| (node.kind(), node.owner(), node.computation()))
        else {
            return;
        };
        // The typed handle is gone; nobody can observe the value any more.
        let Some(computation) = computation else {
            return;
        };

        if TrackingScope::is_evaluating(id) {
            match kind {
                NodeKind::Effect => {
                    // Re-run once the current run is done instead of recursing.
                    self.graph.borrow_mut().set_state(id, DirtyState::Dirty);
                    self.scheduler.borrow_mut().enqueue([id]);
                    return;
                }
                _ => panic!("{}", ReactiveError::CircularDependency(id)),
            }
        }

        match kind {
            NodeKind::Derived => self.run_derived(id, owner, computation),
            NodeKind::Effect => self.run_effect(id, owner, computation),
            NodeKind::Source => {}
        }
    }

    fn run_derived(&self, id: NodeId, owner: Option<OwnerId>, computation: Rc<dyn Computation>) {
        let was_cached = {
            let mut graph = self.graph.borrow_mut();
            graph.set_state(id, DirtyState::Clean);
            graph.get_node(id).is_some_and(Node::is_cached)
        };

        let scope = TrackingScope::enter(id);
        let result = {
            let _owner = self.enter_owner(owner);
            panic::catch_unwind(AssertUnwindSafe(|| computation.evaluate()))
        };
        let reads = scope.finish();
        let sources: SmallVec<[NodeId; 8]> = reads.iter().map(|read| read.source).collect();

        match result {
            Ok(changed) => {
                let stale = self.staleness(&reads);
                let effects = {
                    let mut graph = self.graph.borrow_mut();
                    graph.replace_dependencies(id, &sources);
                    if let Some(node) = graph.get_node_mut(id) {
                        node.set_cached(true);
                        node.record_evaluation();
                        if changed {
                            node.bump_version();
                        }
                        node.raise_state(stale);
                    }
                    let mut effects = if changed || !was_cached {
                        graph.mark_dependents(id, DirtyState::Dirty, TrackingScope::is_evaluating)
                    } else {
                        Vec::new()
                    };
                    if stale != DirtyState::Clean {
                        // The value was computed from a source that moved on
                        // meanwhile; whoever depends on it must check again.
                        effects.extend(graph.mark_dependents(
                            id,
                            DirtyState::MaybeDirty,
                            TrackingScope::is_evaluating,
                        ));
                    }
                    effects
                };
                tracing::trace!(computed = %id, changed, ?stale, sources = sources.len(), "recomputed");
                self.schedule(effects);
            }
            Err(payload) => {
                if let Some(node) = self.graph.borrow_mut().get_node_mut(id) {
                    // Next read retries from scratch.
                    node.set_cached(false);
                    node.mark_clean();
                }
                self.graph.borrow_mut().extend_dependencies(id, &sources);
                tracing::debug!(computed = %id, "computation panicked; value left uncached");
                panic::resume_unwind(payload);
            }
        }
    }

    fn run_effect(&self, id: NodeId, scope: Option<OwnerId>, computation: Rc<dyn Computation>) {
        self.graph.borrow_mut().set_state(id, DirtyState::Clean);

        let mut cleanup_failures = Vec::new();
        if let Some(scope) = scope {
            self.clean_owner(scope, &mut cleanup_failures);
        }

        let tracking = TrackingScope::enter(id);
        let result = {
            let _owner = self.enter_owner(scope);
            panic::catch_unwind(AssertUnwindSafe(|| computation.evaluate()))
        };
        let reads = tracking.finish();
        let sources: SmallVec<[NodeId; 8]> = reads.iter().map(|read| read.source).collect();
        let stale = match result {
            Ok(_) => self.staleness(&reads),
            Err(_) => DirtyState::Clean,
        };

        let alive = {
            let mut graph = self.graph.borrow_mut();
            match &result {
                Ok(_) => {
                    let alive = graph.replace_dependencies(id, &sources);
                    if let Some(node) = graph.get_node_mut(id) {
                        node.set_cached(true);
                        node.record_evaluation();
                        node.raise_state(stale);
                    }
                    alive
                }
                // Keep the old edges and add what the failed run read, so a
                // change to any of them retries the effect.
                Err(_) => graph.extend_dependencies(id, &sources),
            }
        };
        if alive && stale != DirtyState::Clean {
            // Something it read was written during the run.
            tracing::trace!(effect = %id, ?stale, "effect stale after its own run; re-queued");
            self.scheduler.borrow_mut().enqueue([id]);
        }
        if !alive {
            // Disposed from inside its own body: the fresh cleanup has no
            // later disposal to run it.
            tracing::debug!(effect = %id, "effect disposed while running");
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| computation.cleanup())) {
                cleanup_failures.push(payload);
            }
        }
        tracing::trace!(effect = %id, sources = sources.len(), "effect ran");

        if let Err(payload) = result {
            panic::resume_unwind(payload);
        }
        if let Some(payload) = cleanup_failures.into_iter().next() {
            panic::resume_unwind(payload);
        }
        self.schedule(Vec::new());
    }

    /// How out of date an evaluation that just finished already is. A source
    /// written after it was read makes it `Dirty`; a computed source that was
    /// invalidated but not recomputed makes it `MaybeDirty`.
    fn staleness(&self, reads: &[Read]) -> DirtyState {
        let graph = self.graph.borrow();
        let mut state = DirtyState::Clean;
        for read in reads {
            let Some(node) = graph.get_node(read.source) else {
                continue;
            };
            if node.is_disposed() {
                continue;
            }
            if read.version.is_some_and(|version| version != node.version()) {
                return DirtyState::Dirty;
            }
            if node.kind() == NodeKind::Derived && !node.is_clean() {
                state = DirtyState::MaybeDirty;
            }
        }
        state
    }

    /// Compute a disposed, never-computed computed once without subscribing
    /// to anything.
    fn evaluate_detached(&self, id: NodeId) {
        let Some(Some(computation)) = self.with_node(id, Node::computation) else {
            return;
        };
        {
            let _untracked = TrackingScope::untracked();
            computation.evaluate();
        }
        if let Some(node) = self.graph.borrow_mut().get_node_mut(id) {
            node.set_cached(true);
            node.record_evaluation();
        }
    }

    // ----------------------------------------------------------------------
    // Batching and flushing
    // ----------------------------------------------------------------------

    pub(crate) fn enter_batch(&self) -> usize {
        self.scheduler.borrow_mut().enter_batch()
    }

    pub(crate) fn exit_batch(&self) -> usize {
        self.scheduler.borrow_mut().exit_batch()
    }

    pub(crate) fn is_batching(&self) -> bool {
        self.scheduler.borrow().is_batching()
    }

    /// Run queued effects until the queue is empty.
    ///
    /// Effects queued while a pass runs are picked up by the next pass. A
    /// panicking effect is logged and recorded; the rest of the pass still
    /// runs. Returns immediately if a flush is already in progress.
    pub(crate) fn flush(&self) -> FlushReport {
        let mut report = FlushReport::default();
        if self.scheduler.borrow_mut().set_flushing(true) {
            return report;
        }
        let _guard = FlushGuard { runtime: self };
        let limit = self.config.borrow().max_update_depth;
        let mut passes = 0;

        loop {
            let pending = self.scheduler.borrow_mut().take_pending();
            if pending.is_empty() {
                break;
            }
            passes += 1;
            if passes > limit {
                tracing::error!(limit, dropped = pending.len(), "maximum update depth exceeded");
                let mut graph = self.graph.borrow_mut();
                for id in pending {
                    graph.set_state(id, DirtyState::Clean);
                }
                report.depth_exceeded = Some(limit);
                break;
            }
            tracing::debug!(pass = passes, effects = pending.len(), "flushing effects");

            for id in pending {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.update_if_necessary(id)));
                if let Err(payload) = outcome {
                    // The effect or one of its computeds panicked.
                    self.graph.borrow_mut().set_state(id, DirtyState::Clean);
                    let error = EvaluationError::from_panic(id, NodeKind::Effect, payload.as_ref());
                    tracing::error!(%error, "effect failed");
                    report.failures.push(Failure { error, payload });
                }
            }
        }
        report
    }

    // ----------------------------------------------------------------------
    // Owners
    // ----------------------------------------------------------------------

    /// The current owner, if it is still alive.
    pub(crate) fn current_owner(&self) -> Option<OwnerId> {
        self.current_owner
            .get()
            .filter(|id| self.owners.borrow().contains_key(id))
    }

    pub(crate) fn enter_owner(&self, owner: Option<OwnerId>) -> OwnerGuard {
        OwnerGuard {
            previous: self.current_owner.replace(owner),
        }
    }

    pub(crate) fn create_owner(&self, parent: Option<OwnerId>, computation: Option<NodeId>) -> OwnerId {
        let id = OwnerId::new();
        let mut owners = self.owners.borrow_mut();
        let parent = parent.filter(|parent| owners.contains_key(parent));
        if let Some(parent) = parent.and_then(|parent| owners.get_mut(&parent)) {
            parent.children.push(id);
        }
        owners.insert(id, OwnerNode::new(parent, computation));
        id
    }

    pub(crate) fn owner_exists(&self, id: OwnerId) -> bool {
        self.owners.borrow().contains_key(&id)
    }

    pub(crate) fn owner_parent(&self, id: OwnerId) -> Option<OwnerId> {
        self.owners.borrow().get(&id).and_then(|node| node.parent)
    }

    pub(crate) fn owner_child_count(&self, id: OwnerId) -> usize {
        self.owners.borrow().get(&id).map_or(0, |node| node.children.len())
    }

    /// Create an effect node with its own owner scope under the current
    /// owner. The caller runs it for the first time.
    pub(crate) fn create_effect(&self, computation: Rc<dyn Computation>) -> (NodeId, OwnerId) {
        let id = NodeId::new();
        let parent = self.current_owner();
        if parent.is_none() {
            if self.config.borrow().warn_on_orphans {
                tracing::warn!(effect = %id, "effect created outside of any owner; it will only stop when disposed by hand");
            } else {
                tracing::debug!(effect = %id, "effect created outside of any owner");
            }
        }
        let scope = self.create_owner(parent, Some(id));
        self.graph
            .borrow_mut()
            .add_node(Node::effect(id, scope, computation));
        (id, scope)
    }

    pub(crate) fn run_new_effect(&self, id: NodeId) {
        self.recompute(id);
    }

    pub(crate) fn register_cleanup(&self, owner: Option<OwnerId>, cleanup: CleanupFn) -> bool {
        let rejected = {
            let mut owners = self.owners.borrow_mut();
            match owner.and_then(|owner| owners.get_mut(&owner)) {
                Some(node) => {
                    node.cleanups.push(cleanup);
                    None
                }
                None => Some(cleanup),
            }
        };
        match rejected {
            None => true,
            Some(cleanup) => {
                if self.config.borrow().warn_on_orphans {
                    tracing::warn!("cleanup registered outside of any live owner; it will never run");
                }
                drop(cleanup);
                false
            }
        }
    }

    /// Tear down everything an owner holds, but keep the owner itself so it
    /// can be reused (effects clean their scope before every re-run).
    pub(crate) fn clean_owner(&self, owner: OwnerId, failures: &mut Vec<PanicPayload>) {
        let taken = self.owners.borrow_mut().get_mut(&owner).map(|node| {
            (
                std::mem::take(&mut node.children),
                std::mem::take(&mut node.nodes),
                node.computation,
                std::mem::take(&mut node.cleanups),
                std::mem::take(&mut node.contexts),
            )
        });
        let Some((children, nodes, computation, cleanups, contexts)) = taken else {
            return;
        };

        for child in children {
            self.dispose_owner(child, failures);
        }

        for node in nodes {
            if self.graph.borrow_mut().dispose_node(node) {
                tracing::trace!(computed = %node, owner = %owner, "disposed computed");
            }
        }

        if let Some(effect) = computation {
            if let Some(Some(computation)) = self.with_node(effect, Node::computation) {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| computation.cleanup())) {
                    tracing::warn!(
                        effect = %effect,
                        message = %crate::error::panic_message(payload.as_ref()),
                        "effect cleanup panicked"
                    );
                    failures.push(payload);
                }
            }
        }

        for cleanup in cleanups.into_iter().rev() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(cleanup)) {
                tracing::warn!(
                    owner = %owner,
                    message = %crate::error::panic_message(payload.as_ref()),
                    "cleanup panicked"
                );
                failures.push(payload);
            }
        }

        drop(contexts);
    }

    /// Dispose an owner, its descendants and the effect it belongs to.
    /// Unknown or already disposed owners are ignored.
    pub(crate) fn dispose_owner(&self, owner: OwnerId, failures: &mut Vec<PanicPayload>) {
        let Some(computation) = self.owners.borrow().get(&owner).map(|node| node.computation) else {
            return;
        };
        tracing::debug!(owner = %owner, "disposing owner");

        // Stop the effect from being notified while its cleanups run.
        if let Some(effect) = computation {
            self.graph.borrow_mut().dispose_node(effect);
            self.scheduler.borrow_mut().remove(effect);
        }

        self.clean_owner(owner, failures);

        let removed = self.owners.borrow_mut().remove(&owner);
        let Some(removed) = removed else {
            return;
        };
        if let Some(parent) = removed.parent {
            if let Some(parent) = self.owners.borrow_mut().get_mut(&parent) {
                parent.children.retain(|child| *child != owner);
            }
        }
        if let Some(effect) = computation {
            let node = self.graph.borrow_mut().remove_node(effect);
            // Drops the effect body and everything it captured.
            drop(node);
        }
        drop(removed);
    }

    // ----------------------------------------------------------------------
    // Context
    // ----------------------------------------------------------------------

    /// Where context values provided right now are stored: the current
    /// owner, or the root stacks if there is none.
    pub(crate) fn context_scope(&self) -> Option<OwnerId> {
        self.current_owner()
    }

    fn with_stacks<R>(&self, scope: Option<OwnerId>, f: impl FnOnce(&mut ContextStacks) -> R) -> Option<R> {
        match scope {
            Some(owner) => self
                .owners
                .borrow_mut()
                .get_mut(&owner)
                .map(|node| f(&mut node.contexts)),
            None => Some(f(&mut self.root_contexts.borrow_mut())),
        }
    }

    pub(crate) fn push_context(&self, scope: Option<OwnerId>, id: ContextId, value: Rc<dyn Any>) {
        let rejected = self
            .with_stacks(scope, move |stacks| stacks.push(id, value))
            .is_none();
        if rejected {
            tracing::debug!(context = %id, "owner gone; context value dropped");
        }
    }

    pub(crate) fn pop_context(&self, scope: Option<OwnerId>, id: ContextId) -> Option<Rc<dyn Any>> {
        self.with_stacks(scope, |stacks| stacks.pop(id)).flatten()
    }

    pub(crate) fn remove_context_entry(
        &self,
        scope: Option<OwnerId>,
        id: ContextId,
        value: &Rc<dyn Any>,
    ) -> Option<Rc<dyn Any>> {
        self.with_stacks(scope, |stacks| stacks.remove_entry(id, value))
            .flatten()
    }

    /// The nearest provided value for `id`: the current owner chain from the
    /// inside out, then the root stacks.
    pub(crate) fn lookup_context(&self, id: ContextId) -> Option<Rc<dyn Any>> {
        {
            let owners = self.owners.borrow();
            let mut cursor = self.current_owner.get();
            while let Some(owner) = cursor {
                let Some(node) = owners.get(&owner) else {
                    break;
                };
                if let Some(value) = node.contexts.top(id) {
                    return Some(value);
                }
                cursor = node.parent;
            }
        }
        self.root_contexts.borrow().top(id)
    }

    /// The nearest provided value of every context visible right now.
    pub(crate) fn snapshot_contexts(&self) -> IndexMap<ContextId, Rc<dyn Any>> {
        let mut entries = IndexMap::new();
        {
            let owners = self.owners.borrow();
            let mut cursor = self.current_owner.get();
            while let Some(owner) = cursor {
                let Some(node) = owners.get(&owner) else {
                    break;
                };
                for (id, value) in node.contexts.tops() {
                    entries.entry(id).or_insert(value);
                }
                cursor = node.parent;
            }
        }
        for (id, value) in self.root_contexts.borrow().tops() {
            entries.entry(id).or_insert(value);
        }
        entries
    }
}
