//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between reactive values and computations.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent reactive values (signals) or computations (computeds, effects)
//! - Edges represent dependencies: if A depends on B, there is an edge from B to A
//!
//! When a signal changes, we traverse the graph to find all affected nodes
//! and mark them dirty. Computeds stay lazy and recompute on their next read;
//! effects are handed to the scheduler.
//!
//! # Design Decisions
//!
//! 1. We use a centralized graph rather than per-node subscriber lists because:
//!    - It lets the runtime cut every edge of a disposed node in one place
//!    - It keeps typed values out of the propagation code
//!
//! 2. The graph is indexed by node ID for O(1) lookups.
//!
//! 3. We maintain both forward (dependencies) and reverse (dependents) edges
//!    to enable efficient traversal in both directions.

mod node;
mod scheduler;
mod store;

pub use node::{DirtyState, Node, NodeId, NodeKind};
pub(crate) use node::Computation;
pub use scheduler::UpdateScheduler;
pub use store::Graph;
