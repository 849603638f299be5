//! Owner Scopes
//!
//! An Owner is a disposal scope. Every effect, computed, nested owner and
//! cleanup callback created while an owner is current belongs to it, and is
//! torn down when the owner is disposed.
//!
//! # Disposal Order
//!
//! Disposal is a post-order walk:
//!
//! 1. Child owners are disposed in creation order, each one fully before the
//!    next.
//! 2. Computeds owned directly by the scope are cut out of the graph.
//! 3. If the scope belongs to an effect, the effect's own cleanup runs.
//! 4. Registered cleanups run in reverse registration order.
//! 5. The owner detaches from its parent and its context values are dropped.
//!
//! A panicking cleanup never stops the walk. Every failure is logged and
//! reported together once the walk is done.
//!
//! Effects own a scope of their own. Whatever their body creates lives in
//! that scope and is cleaned before the body runs again.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{panic_message, DisposalError};
use crate::graph::NodeId;

use super::context::ContextStacks;
use super::runtime::{CleanupFn, Runtime};

/// Unique identifier for an owner scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    /// Generate a new unique owner ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// Runtime-side state of an owner scope.
#[derive(Default)]
pub(crate) struct OwnerNode {
    pub(crate) parent: Option<OwnerId>,
    /// Child scopes in creation order.
    pub(crate) children: Vec<OwnerId>,
    /// Computeds created in this scope.
    pub(crate) nodes: Vec<NodeId>,
    /// The effect whose lifetime this scope is, if any.
    pub(crate) computation: Option<NodeId>,
    /// Cleanups in registration order.
    pub(crate) cleanups: Vec<CleanupFn>,
    pub(crate) contexts: ContextStacks,
}

impl OwnerNode {
    pub(crate) fn new(parent: Option<OwnerId>, computation: Option<NodeId>) -> Self {
        Self {
            parent,
            computation,
            ..Self::default()
        }
    }
}

/// Handle to an owner scope.
///
/// Handles are cheap copies; the scope itself lives in the runtime until it
/// is disposed, either explicitly or together with its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Owner {
    id: OwnerId,
}

impl Owner {
    /// Create a scope as a child of the current owner, or a parentless one
    /// if there is none.
    pub fn new() -> Self {
        Runtime::with(|rt| Self {
            id: rt.create_owner(rt.current_owner(), None),
        })
    }

    /// Create a top-level scope with no parent, regardless of the current
    /// owner.
    pub fn new_root() -> Self {
        Runtime::with(|rt| Self {
            id: rt.create_owner(None, None),
        })
    }

    /// The owner that is current on this thread, if any.
    pub fn current() -> Option<Self> {
        Runtime::with(|rt| rt.current_owner()).map(|id| Self { id })
    }

    pub(crate) fn from_id(id: OwnerId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> OwnerId {
        self.id
    }

    /// Create a child scope of this owner.
    pub fn child(&self) -> Self {
        Runtime::with(|rt| Self {
            id: rt.create_owner(Some(self.id), None),
        })
    }

    pub fn parent(&self) -> Option<Self> {
        Runtime::with(|rt| rt.owner_parent(self.id)).map(|id| Self { id })
    }

    /// Run `f` with this owner as the current one. The previous owner is
    /// restored afterwards, even if `f` panics.
    pub fn with<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = Runtime::with(|rt| rt.enter_owner(Some(self.id)));
        f()
    }

    /// Register a cleanup on this owner. Returns `false` (and drops `f`
    /// without running it) if the owner is already disposed.
    pub fn on_cleanup(&self, f: impl FnOnce() + 'static) -> bool {
        Runtime::with(|rt| rt.register_cleanup(Some(self.id), Box::new(f)))
    }

    /// Dispose this scope and everything created under it.
    ///
    /// Disposing twice is a no-op. Every cleanup runs even if some panic;
    /// the panics are collected into the returned error.
    pub fn dispose(&self) -> Result<(), DisposalError> {
        let failures = Runtime::with(|rt| {
            let mut failures = Vec::new();
            rt.dispose_owner(self.id, &mut failures);
            failures
        });
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DisposalError {
                failures: failures
                    .iter()
                    .map(|payload| panic_message(payload.as_ref()))
                    .collect(),
            })
        }
    }

    pub fn is_disposed(&self) -> bool {
        !Runtime::with(|rt| rt.owner_exists(self.id))
    }

    /// Number of live child scopes (effects count as one scope each).
    pub fn child_count(&self) -> usize {
        Runtime::with(|rt| rt.owner_child_count(self.id))
    }
}

impl Default for Owner {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `f` inside a fresh top-level owner.
///
/// `f` receives the owner; calling [`Owner::dispose`] on it tears down every
/// effect, computed and cleanup created inside. Returns `f`'s result.
///
/// ```rust
/// use ripple_core::{create_root, effect, signal};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let count = signal(0);
/// let runs = Rc::new(Cell::new(0));
///
/// let root = create_root(|root| {
///     let (count, runs) = (count.clone(), runs.clone());
///     effect(move || {
///         count.get();
///         runs.set(runs.get() + 1);
///     });
///     root
/// });
///
/// count.set(1);
/// assert_eq!(runs.get(), 2);
///
/// root.dispose().unwrap();
/// count.set(2);
/// assert_eq!(runs.get(), 2);
/// ```
pub fn create_root<T>(f: impl FnOnce(Owner) -> T) -> T {
    let root = Owner::new_root();
    tracing::debug!(owner = %root.id(), "created root");
    root.with(|| f(root))
}

/// Register a cleanup on the current owner.
///
/// Inside an effect body the cleanup runs before the next re-run and when
/// the effect is disposed. Outside of any owner the cleanup can never run;
/// it is dropped and a warning is logged.
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    Runtime::with(|rt| {
        let owner = rt.current_owner();
        rt.register_cleanup(owner, Box::new(f));
    });
}

/// The current owner, if any. Capture it before an asynchronous boundary and
/// resume under it with [`run_with_owner`].
pub fn get_owner() -> Option<Owner> {
    Owner::current()
}

/// Run `f` with `owner` as the current owner.
pub fn run_with_owner<T>(owner: Owner, f: impl FnOnce() -> T) -> T {
    owner.with(f)
}
