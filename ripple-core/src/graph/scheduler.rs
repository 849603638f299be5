//! Update Scheduler
//!
//! The scheduler holds the effects waiting to run and the batch depth.
//!
//! # Algorithm
//!
//! 1. A write marks the graph and hands the effects that became stale to
//!    `enqueue`. The pending set is insertion ordered and deduplicated, so an
//!    effect reached by several paths is queued once.
//! 2. While a batch is open (`depth > 0`) nothing else happens.
//! 3. When the outermost batch closes, or immediately for a write outside any
//!    batch, the runtime drains the queue pass by pass until it is empty.
//!    Effects enqueued during a pass run in the next pass of the same flush.

use indexmap::IndexSet;

use super::node::NodeId;

/// The update scheduler coalesces writes into flush passes.
#[derive(Debug, Default)]
pub struct UpdateScheduler {
    /// Effects waiting to run, in the order they became stale.
    pending: IndexSet<NodeId>,

    /// Number of open `batch` calls.
    depth: usize,

    /// Whether a flush is currently draining the queue.
    flushing: bool,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a batch. Returns the new depth.
    pub fn enter_batch(&mut self) -> usize {
        self.depth += 1;
        self.depth
    }

    /// Close a batch. Returns the remaining depth.
    pub fn exit_batch(&mut self) -> usize {
        self.depth = self.depth.saturating_sub(1);
        self.depth
    }

    /// Whether at least one batch is open.
    pub fn is_batching(&self) -> bool {
        self.depth > 0
    }

    /// Whether a flush is in progress.
    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    pub fn set_flushing(&mut self, flushing: bool) -> bool {
        std::mem::replace(&mut self.flushing, flushing)
    }

    /// Queue effects for the next flush pass.
    pub fn enqueue(&mut self, effects: impl IntoIterator<Item = NodeId>) {
        self.pending.extend(effects);
    }

    /// Drop an effect from the queue (e.g. because it was disposed).
    pub fn remove(&mut self, effect: NodeId) {
        self.pending.shift_remove(&effect);
    }

    /// Take the current pass, leaving an empty queue for effects enqueued
    /// while it runs.
    pub fn take_pending(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.pending)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
