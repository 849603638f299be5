//! Batching
//!
//! Inside [`batch`] signal writes still mark the graph immediately, so reads
//! see fresh values, but effects are only queued. The queue is flushed once
//! the outermost batch exits. An effect reached several times during a batch
//! runs once, seeing the final values.

use crate::error::ReactiveError;

use super::runtime::Runtime;

/// Closes a batch level when dropped, including while unwinding.
struct BatchGuard {
    finished: bool,
}

impl BatchGuard {
    fn enter() -> Self {
        Runtime::with(|rt| rt.enter_batch());
        Self { finished: false }
    }

    /// Leave the batch normally: if this was the outermost level, flush and
    /// re-raise the first effect failure in the caller.
    fn finish(mut self) {
        self.finished = true;
        Runtime::with(|rt| {
            if rt.exit_batch() == 0 {
                rt.flush().raise();
            }
        });
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Unwinding out of the batch body. Run what was queued, but only log
        // failures; the body's panic is already on its way up.
        let _ = Runtime::try_with(|rt| {
            if rt.exit_batch() == 0 {
                let report = rt.flush();
                if !report.is_ok() {
                    tracing::warn!("effects failed while unwinding out of a batch");
                }
            }
        });
    }
}

/// Run `f` with effect execution deferred until it returns.
///
/// Batches nest; only the outermost one flushes. Returns `f`'s result.
///
/// # Panics
///
/// If an effect panics during the final flush, every other queued effect
/// still runs and the first panic is then re-raised here.
///
/// ```rust
/// use ripple_core::{batch, effect, signal};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let count = signal(0);
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// let _watcher = {
///     let (count, seen) = (count.clone(), seen.clone());
///     effect(move || seen.borrow_mut().push(count.get()))
/// };
///
/// batch(|| {
///     count.set(1);
///     count.set(2);
///     count.set(3);
/// });
/// assert_eq!(*seen.borrow(), vec![0, 3]);
/// ```
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    let guard = BatchGuard::enter();
    let value = f();
    guard.finish();
    value
}

/// Whether a batch is currently open on this thread.
pub fn is_batching() -> bool {
    Runtime::with(|rt| rt.is_batching())
}

/// Run every queued effect now, even inside a batch.
///
/// Unlike a plain write, failures are returned instead of re-raised. Does
/// nothing if a flush is already running further up the stack.
pub fn flush_sync() -> Result<(), ReactiveError> {
    Runtime::with(|rt| rt.flush()).into_result()
}
