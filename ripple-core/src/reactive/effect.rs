//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is scheduled to re-run. Outside
//!    of a batch that happens before the write returns.
//!
//! 3. Before re-running, the effect cleans its scope: whatever the previous
//!    run created is disposed and its cleanups run. The new run tracks a
//!    fresh set of dependencies.
//!
//! # Differences from Computed
//!
//! - Computeds return a value; effects do not.
//! - Computeds are lazy (compute on access); effects are eager (run when deps change).
//! - Computeds cache results; effects just run their side effect.
//!
//! # Cleanup
//!
//! An effect created with [`effect_with_cleanup`] returns a cleanup function
//! from every run. It is called before the effect re-runs and when the effect
//! is disposed. [`on_cleanup`](super::on_cleanup) inside the body works the
//! same way.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::DisposalError;
use crate::graph::{Computation, NodeId};

use super::owner::{Owner, OwnerId};
use super::runtime::{CleanupFn, Runtime};

type EffectFn = Box<dyn FnMut() -> Option<CleanupFn>>;

struct EffectInner {
    run: RefCell<EffectFn>,
    cleanup: RefCell<Option<CleanupFn>>,
}

impl Computation for EffectInner {
    fn evaluate(&self) -> bool {
        let cleanup = {
            let mut run = self.run.borrow_mut();
            (&mut **run)()
        };
        let previous = self.cleanup.replace(cleanup);
        debug_assert!(previous.is_none(), "effect cleanup was not run before re-running");
        true
    }

    fn cleanup(&self) {
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// The handle is only a reference: dropping it does not stop the effect.
/// The effect lives until [`Effect::dispose`] is called or its owner is
/// disposed.
///
/// # Example
///
/// ```rust
/// use ripple_core::{effect, signal};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let count = signal(0);
/// let seen = Rc::new(RefCell::new(Vec::new()));
///
/// let watcher = {
///     let (count, seen) = (count.clone(), seen.clone());
///     effect(move || seen.borrow_mut().push(count.get()))
/// };
///
/// count.set(5);
/// assert_eq!(*seen.borrow(), vec![0, 5]);
///
/// watcher.dispose().unwrap();
/// count.set(6);
/// assert_eq!(*seen.borrow(), vec![0, 5]);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Effect {
    id: NodeId,
    scope: OwnerId,
}

/// Create an effect and run it once right away.
pub fn effect(f: impl FnMut() + 'static) -> Effect {
    Effect::new(f)
}

/// Create an effect whose every run returns a cleanup for that run.
pub fn effect_with_cleanup<F, C>(f: F) -> Effect
where
    F: FnMut() -> C + 'static,
    C: FnOnce() + 'static,
{
    Effect::with_cleanup(f)
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish dependencies. A panic in
    /// that first run propagates to the caller; the effect stays registered
    /// and re-runs when whatever it read before panicking changes. A write
    /// during a run to something the run already read queues it again.
    pub fn new(mut f: impl FnMut() + 'static) -> Self {
        Self::create(Box::new(move || {
            f();
            None
        }))
    }

    pub fn with_cleanup<F, C>(mut f: F) -> Self
    where
        F: FnMut() -> C + 'static,
        C: FnOnce() + 'static,
    {
        Self::create(Box::new(move || Some(Box::new(f()) as CleanupFn)))
    }

    fn create(run: EffectFn) -> Self {
        let inner = Rc::new(EffectInner {
            run: RefCell::new(run),
            cleanup: RefCell::new(None),
        });
        let (id, scope) = Runtime::with(|rt| rt.create_effect(inner));
        tracing::trace!(effect = %id, scope = %scope, "created effect");
        Runtime::with(|rt| rt.run_new_effect(id));
        Self { id, scope }
    }

    /// Get the effect's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The owner scope holding everything this effect's body creates.
    pub fn owner(&self) -> Owner {
        Owner::from_id(self.scope)
    }

    /// Stop the effect: its last cleanup runs, its scope is disposed and it
    /// never runs again. Disposing twice is a no-op.
    pub fn dispose(&self) -> Result<(), DisposalError> {
        self.owner().dispose()
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.owner().is_disposed()
    }

    /// Get the number of times the effect has run to completion.
    pub fn run_count(&self) -> usize {
        Runtime::with(|rt| rt.with_node(self.id, |node| node.evaluations())).unwrap_or(0)
    }

    /// Number of nodes the effect is currently subscribed to.
    pub fn dependency_count(&self) -> usize {
        Runtime::with(|rt| rt.with_node(self.id, |node| node.dependencies().len())).unwrap_or(0)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
