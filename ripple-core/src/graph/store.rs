//! Graph Store
//!
//! Owns every node of the dependency graph and the edges between them.
//!
//! # Propagation
//!
//! Marking is push, recomputation is pull:
//!
//! 1. When a source node changes, its direct dependents are marked `Dirty`.
//! 2. Every node whose state rises propagates `MaybeDirty` to its own
//!    dependents, transitively.
//! 3. Effects that leave the `Clean` state are reported to the caller so they
//!    can be queued. Derived nodes are never recomputed here.
//!
//! A node's state only ever rises during marking, so each node is visited at
//! most twice per write (once per state) no matter how many paths lead to it.

use std::collections::HashMap;

use super::node::{DirtyState, Node, NodeId, NodeKind};

/// The dependency graph: nodes indexed by ID, with forward and reverse edges.
#[derive(Debug, Default)]
pub struct Graph {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node. The removed node is
    /// returned so the caller decides when its computation is dropped.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&node_id)?;

        // Remove this node from its dependencies' dependent lists
        for dep_id in node.dependencies() {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.remove_dependent(node_id);
            }
        }

        // Remove this node from its dependents' dependency lists
        for dependent_id in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                dependent.remove_dependency(node_id);
            }
        }

        Some(node)
    }

    /// Cut every edge of a node and make it inert, keeping it in the graph
    /// so its cached value stays readable.
    pub fn dispose_node(&mut self, node_id: NodeId) -> bool {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return false;
        };
        if node.is_disposed() {
            return false;
        }
        node.set_disposed();
        node.mark_clean();
        let dependencies = node.take_dependencies();
        let dependents = node.take_dependents();

        for dep_id in dependencies {
            if let Some(dep) = self.nodes.get_mut(&dep_id) {
                dep.remove_dependent(node_id);
            }
        }
        for dependent_id in dependents {
            if let Some(dependent) = self.nodes.get_mut(&dependent_id) {
                dependent.remove_dependency(node_id);
            }
        }
        true
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable reference to a node.
    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Add a dependency edge: `dependent` depends on `dependency`.
    ///
    /// This means when `dependency` changes, `dependent` may need to update.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.add_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.add_dependency(dependency);
        }
    }

    /// Replace the dependency set of `observer` wholesale.
    ///
    /// Old edges are dropped and the new ones subscribed in read order.
    /// Sources that were disposed or removed meanwhile are skipped. Returns
    /// `false` when the observer itself is gone or disposed.
    pub fn replace_dependencies(&mut self, observer: NodeId, sources: &[NodeId]) -> bool {
        let old = match self.nodes.get_mut(&observer) {
            Some(node) if !node.is_disposed() => node.take_dependencies(),
            _ => return false,
        };

        for dep_id in old {
            if let Some(dep) = self.nodes.get_mut(&dep_id) {
                dep.remove_dependent(observer);
            }
        }

        self.subscribe_all(observer, sources);
        true
    }

    /// Subscribe `observer` to `sources` on top of the edges it already has.
    ///
    /// Used after a failed evaluation: whatever the failed run managed to
    /// read joins the previous dependency set, so a change to either one
    /// retries it. Returns `false` when the observer is gone or disposed.
    pub fn extend_dependencies(&mut self, observer: NodeId, sources: &[NodeId]) -> bool {
        match self.nodes.get(&observer) {
            Some(node) if !node.is_disposed() => {}
            _ => return false,
        }
        self.subscribe_all(observer, sources);
        true
    }

    fn subscribe_all(&mut self, observer: NodeId, sources: &[NodeId]) {
        for &source in sources {
            let live = self
                .nodes
                .get(&source)
                .map(|node| !node.is_disposed())
                .unwrap_or(false);
            if live && source != observer {
                self.add_edge(source, observer);
            }
        }
    }

    /// Mark a source node as changed and propagate dirty flags.
    ///
    /// Returns the effects that left the clean state and need scheduling,
    /// in the order they were reached.
    pub fn mark_changed(&mut self, source_id: NodeId) -> Vec<NodeId> {
        let mut effects = Vec::new();
        let dependents: Vec<NodeId> = match self.nodes.get(&source_id) {
            Some(source) => source.dependents().iter().copied().collect(),
            None => return effects,
        };
        for dependent_id in dependents {
            self.mark(dependent_id, DirtyState::Dirty, &mut effects);
        }
        effects
    }

    /// Raise the direct dependents of a derived node to `state` after it
    /// recomputed, propagating `MaybeDirty` further down.
    ///
    /// Dependents for which `skip` returns true are left alone; the runtime
    /// uses this for observers that are evaluating right now, which check
    /// their own reads once they finish.
    pub fn mark_dependents(
        &mut self,
        node_id: NodeId,
        state: DirtyState,
        skip: impl Fn(NodeId) -> bool,
    ) -> Vec<NodeId> {
        let mut effects = Vec::new();
        let dependents: Vec<NodeId> = match self.nodes.get(&node_id) {
            Some(node) => node.dependents().iter().copied().collect(),
            None => return effects,
        };
        for dependent_id in dependents {
            if !skip(dependent_id) {
                self.mark(dependent_id, state, &mut effects);
            }
        }
        effects
    }

    /// Raise a node to `state` and propagate `MaybeDirty` downstream.
    fn mark(&mut self, start: NodeId, state: DirtyState, effects: &mut Vec<NodeId>) {
        let mut stack = vec![(start, state)];

        while let Some((node_id, state)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&node_id) else {
                continue;
            };
            if node.is_disposed() {
                continue;
            }
            let was_clean = node.is_clean();
            if !node.raise_state(state) {
                continue;
            }
            if was_clean && node.kind() == NodeKind::Effect {
                effects.push(node_id);
            }

            // Reverse so that the first dependent is processed first.
            for dependent_id in node.dependents().iter().rev() {
                stack.push((*dependent_id, DirtyState::MaybeDirty));
            }
        }
    }

    /// Current dirty state of a node.
    pub fn state(&self, node_id: NodeId) -> Option<DirtyState> {
        self.nodes.get(&node_id).map(Node::dirty_state)
    }

    /// Current write version of a node.
    pub fn version(&self, node_id: NodeId) -> Option<u64> {
        self.nodes.get(&node_id).map(Node::version)
    }

    /// Record that a node's value changed.
    pub fn bump_version(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.bump_version();
        }
    }

    /// Overwrite the dirty state of a node without propagating.
    pub fn set_state(&mut self, node_id: NodeId, state: DirtyState) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.set_dirty_state(state);
        }
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derived_node(graph: &mut Graph) -> NodeId {
        // A derived node without a computation behaves like any other node
        // for edge bookkeeping and marking.
        let mut node = Node::source(NodeId::new());
        node.set_dirty_state(DirtyState::Clean);
        graph.add_node(node)
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut graph = Graph::new();

        let id1 = graph.add_node(Node::source(NodeId::new()));
        let id2 = graph.add_node(Node::source(NodeId::new()));

        assert_eq!(graph.node_count(), 2);

        assert!(graph.remove_node(id1).is_some());
        assert_eq!(graph.node_count(), 1);
        assert!(graph.get_node(id1).is_none());
        assert!(graph.get_node(id2).is_some());
        assert!(graph.remove_node(id1).is_none());
    }

    #[test]
    fn add_and_remove_edges() {
        let mut graph = Graph::new();

        let source_id = graph.add_node(Node::source(NodeId::new()));
        let derived_id = derived_node(&mut graph);

        graph.add_edge(source_id, derived_id);

        assert!(graph
            .get_node(source_id)
            .unwrap()
            .dependents()
            .contains(&derived_id));
        assert!(graph
            .get_node(derived_id)
            .unwrap()
            .dependencies()
            .contains(&source_id));

        assert!(graph.replace_dependencies(derived_id, &[]));

        assert!(graph.get_node(source_id).unwrap().dependents().is_empty());
        assert!(graph.get_node(derived_id).unwrap().dependencies().is_empty());
    }

    #[test]
    fn removing_a_node_drops_its_edges() {
        let mut graph = Graph::new();
        let source = graph.add_node(Node::source(NodeId::new()));
        let middle = derived_node(&mut graph);
        let leaf = derived_node(&mut graph);

        graph.add_edge(source, middle);
        graph.add_edge(middle, leaf);

        graph.remove_node(middle);

        assert!(graph.get_node(source).unwrap().dependents().is_empty());
        assert!(graph.get_node(leaf).unwrap().dependencies().is_empty());
    }

    #[test]
    fn replace_dependencies_drops_stale_edges() {
        let mut graph = Graph::new();
        let a = graph.add_node(Node::source(NodeId::new()));
        let b = graph.add_node(Node::source(NodeId::new()));
        let observer = derived_node(&mut graph);

        assert!(graph.replace_dependencies(observer, &[a]));
        assert!(graph.get_node(a).unwrap().dependents().contains(&observer));

        assert!(graph.replace_dependencies(observer, &[b]));
        assert!(graph.get_node(a).unwrap().dependents().is_empty());
        assert!(graph.get_node(b).unwrap().dependents().contains(&observer));
        assert_eq!(graph.get_node(observer).unwrap().dependencies(), &[b]);
    }

    #[test]
    fn replace_dependencies_skips_disposed_observer() {
        let mut graph = Graph::new();
        let a = graph.add_node(Node::source(NodeId::new()));
        let observer = derived_node(&mut graph);

        graph.dispose_node(observer);

        assert!(!graph.replace_dependencies(observer, &[a]));
        assert!(graph.get_node(a).unwrap().dependents().is_empty());
    }

    #[test]
    fn extend_dependencies_keeps_existing_edges() {
        let mut graph = Graph::new();
        let a = graph.add_node(Node::source(NodeId::new()));
        let b = graph.add_node(Node::source(NodeId::new()));
        let observer = derived_node(&mut graph);

        assert!(graph.replace_dependencies(observer, &[a]));
        assert!(graph.extend_dependencies(observer, &[b, a]));
        assert_eq!(graph.get_node(observer).unwrap().dependencies(), &[a, b]);
        assert!(graph.get_node(b).unwrap().dependents().contains(&observer));

        graph.dispose_node(observer);
        assert!(!graph.extend_dependencies(observer, &[a]));
    }

    #[test]
    fn versions_are_tracked_per_node() {
        let mut graph = Graph::new();
        let a = graph.add_node(Node::source(NodeId::new()));
        assert_eq!(graph.version(a), Some(0));
        graph.bump_version(a);
        assert_eq!(graph.version(a), Some(1));
        assert_eq!(graph.version(NodeId::new()), None);
    }

    #[test]
    fn mark_changed_propagates() {
        let mut graph = Graph::new();

        // source -> derived1 -> derived2
        let source_id = graph.add_node(Node::source(NodeId::new()));
        let derived1_id = derived_node(&mut graph);
        let derived2_id = derived_node(&mut graph);

        graph.add_edge(source_id, derived1_id);
        graph.add_edge(derived1_id, derived2_id);

        let effects = graph.mark_changed(source_id);
        assert!(effects.is_empty());

        assert_eq!(graph.state(derived1_id), Some(DirtyState::Dirty));
        assert_eq!(graph.state(derived2_id), Some(DirtyState::MaybeDirty));
    }

    #[test]
    fn disposed_nodes_are_not_marked() {
        let mut graph = Graph::new();
        let source = graph.add_node(Node::source(NodeId::new()));
        let derived = derived_node(&mut graph);
        graph.add_edge(source, derived);

        assert!(graph.dispose_node(derived));
        assert!(!graph.dispose_node(derived));

        graph.mark_changed(source);
        assert_eq!(graph.state(derived), Some(DirtyState::Clean));
        assert!(graph.get_node(source).unwrap().dependents().is_empty());
    }

    #[test]
    fn diamond_reports_effect_once() {
        use crate::graph::node::Computation;
        use crate::reactive::OwnerId;
        use std::rc::Rc;

        struct Noop;
        impl Computation for Noop {
            fn evaluate(&self) -> bool {
                true
            }
        }

        let mut graph = Graph::new();
        let source = graph.add_node(Node::source(NodeId::new()));
        let left = derived_node(&mut graph);
        let right = derived_node(&mut graph);
        let mut effect = Node::effect(NodeId::new(), OwnerId::new(), Rc::new(Noop));
        effect.mark_clean();
        let effect = graph.add_node(effect);

        graph.add_edge(source, left);
        graph.add_edge(source, right);
        graph.add_edge(left, effect);
        graph.add_edge(right, effect);

        let effects = graph.mark_changed(source);
        assert_eq!(effects, vec![effect]);
        assert_eq!(graph.state(effect), Some(DirtyState::MaybeDirty));

        // Already pending: a second write reports nothing new.
        assert!(graph.mark_changed(source).is_empty());
    }

    #[test]
    fn mark_dependents_honours_skip() {
        let mut graph = Graph::new();
        let derived = derived_node(&mut graph);
        let skipped = derived_node(&mut graph);
        let marked = derived_node(&mut graph);

        graph.add_edge(derived, skipped);
        graph.add_edge(derived, marked);

        graph.mark_dependents(derived, DirtyState::Dirty, |id| id == skipped);

        assert_eq!(graph.state(skipped), Some(DirtyState::Clean));
        assert_eq!(graph.state(marked), Some(DirtyState::Dirty));
    }
}
