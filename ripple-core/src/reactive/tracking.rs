//! Dependency Tracking
//!
//! The tracking stack records which computation is currently running so that
//! reads can be attributed to it automatically.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Evaluating a computed or effect
//! pushes a frame for it; every signal or computed read while that frame is on
//! top is recorded into it. When the evaluation finishes the frame is popped
//! and its reads are committed to the graph in one step, so an evaluation that
//! panics halfway never leaves a half-subscribed node behind.
//!
//! Every read also remembers the version its source had at that moment. A
//! source written again before the evaluation finishes (by the evaluation
//! itself, or by something it ran) is caught at commit time even though the
//! observer was not subscribed yet when the write happened.
//!
//! `untrack` pushes a frame with no observer: reads inside it are dropped.
//! Because it is a stack, a computed reading another computed nests
//! correctly and the outer frame resumes once the inner one is done.

use std::cell::RefCell;

use smallvec::SmallVec;

use crate::graph::NodeId;

thread_local! {
    static TRACKING_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// One source read by an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Read {
    pub(crate) source: NodeId,
    /// Version of the source at its first read, once it is known. A computed
    /// is recorded before it is brought up to date, so its version is filled
    /// in afterwards; it stays `None` if that update panicked.
    pub(crate) version: Option<u64>,
}

/// An entry in the tracking stack.
#[derive(Debug)]
struct Frame {
    /// The computation being evaluated, or `None` inside `untrack`.
    observer: Option<NodeId>,
    /// Reads during this evaluation, in first-read order.
    sources: SmallVec<[Read; 8]>,
}

/// Guard for one tracking frame. Dropping it pops the frame, which keeps the
/// stack balanced even if the evaluation panics.
pub(crate) struct TrackingScope {
    observer: Option<NodeId>,
    finished: bool,
}

impl TrackingScope {
    /// Start recording reads on behalf of `observer`.
    pub(crate) fn enter(observer: NodeId) -> Self {
        Self::push(Some(observer))
    }

    /// Suspend tracking until the guard is dropped.
    pub(crate) fn untracked() -> Self {
        Self::push(None)
    }

    fn push(observer: Option<NodeId>) -> Self {
        TRACKING_STACK.with(|stack| {
            stack.borrow_mut().push(Frame {
                observer,
                sources: SmallVec::new(),
            });
        });
        Self {
            observer,
            finished: false,
        }
    }

    /// Pop the frame and hand back everything it recorded.
    pub(crate) fn finish(mut self) -> SmallVec<[Read; 8]> {
        self.finished = true;
        TRACKING_STACK.with(|stack| {
            let frame = stack.borrow_mut().pop();
            match frame {
                Some(frame) => {
                    debug_assert_eq!(frame.observer, self.observer, "tracking stack mismatch");
                    frame.sources
                }
                None => SmallVec::new(),
            }
        })
    }

    /// The observer reads are currently attributed to.
    pub(crate) fn current_observer() -> Option<NodeId> {
        TRACKING_STACK.with(|stack| stack.borrow().last().and_then(|frame| frame.observer))
    }

    /// Record a read of `source` in the innermost frame.
    pub(crate) fn track(source: NodeId) {
        TRACKING_STACK.with(|stack| {
            if let Some(frame) = stack.borrow_mut().last_mut() {
                let seen = frame.sources.iter().any(|read| read.source == source);
                if frame.observer.is_some() && !seen {
                    frame.sources.push(Read {
                        source,
                        version: None,
                    });
                }
            }
        });
    }

    /// Fill in the version of a source recorded by [`TrackingScope::track`].
    /// Only the first read of a source in an evaluation counts.
    pub(crate) fn observe_version(source: NodeId, version: u64) {
        TRACKING_STACK.with(|stack| {
            if let Some(frame) = stack.borrow_mut().last_mut() {
                if let Some(read) = frame
                    .sources
                    .iter_mut()
                    .find(|read| read.source == source && read.version.is_none())
                {
                    read.version = Some(version);
                }
            }
        });
    }

    /// Whether `node` is somewhere on the stack, i.e. mid-evaluation.
    pub(crate) fn is_evaluating(node: NodeId) -> bool {
        TRACKING_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .any(|frame| frame.observer == Some(node))
        })
    }
}

impl Drop for TrackingScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // The stack may already be gone during thread teardown.
        let _ = TRACKING_STACK.try_with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(frame) = popped {
                debug_assert_eq!(
                    frame.observer, self.observer,
                    "TrackingScope mismatch: expected {:?}, got {:?}",
                    self.observer, frame.observer
                );
            }
        });
    }
}

/// Whether reads are currently being recorded as dependencies.
pub fn is_tracking() -> bool {
    TrackingScope::current_observer().is_some()
}

/// Run `f` without recording any of its reads as dependencies of the
/// enclosing computed or effect.
///
/// Tracking is restored when `f` returns or panics.
///
/// ```rust
/// use ripple_core::{signal, untrack, is_tracking};
///
/// let count = signal(1);
/// let value = untrack(|| {
///     assert!(!is_tracking());
///     count.get()
/// });
/// assert_eq!(value, 1);
/// ```
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    let _scope = TrackingScope::untracked();
    f()
}
