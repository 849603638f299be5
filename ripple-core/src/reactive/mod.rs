//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computeds,
//! effects, owners and context. These primitives form the foundation of
//! Ripple's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a computed or effect), the signal
//! automatically registers that context as a dependent. When the signal's
//! value changes, all dependents are notified.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies changes, and only when it is read.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects are used to synchronize reactive state with
//! external systems.
//!
//! ## Owners
//!
//! An Owner is a disposal scope. Effects, computeds and cleanups created
//! under an owner are torn down with it.
//!
//! ## Context
//!
//! A Context is a typed key whose value is provided by an enclosing scope
//! rather than passed down explicitly. Snapshots carry context across
//! asynchronous boundaries.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking stack to automatically
//! detect dependencies. When a signal is read, we check if there is an active
//! tracking frame and, if so, record the read in it.

mod batch;
mod computed;
mod context;
mod effect;
mod owner;
mod runtime;
mod signal;
mod tracking;

pub use batch::{batch, flush_sync, is_batching};
pub use computed::{computed, computed_with_equals, Computed};
pub use context::{
    capture_snapshot, create_context, pop_provider, push_provider, read, run_with_snapshot, scoped,
    Context, ContextId, ContextSnapshot, Scoped,
};
pub use effect::{effect, effect_with_cleanup, Effect};
pub use owner::{create_root, get_owner, on_cleanup, run_with_owner, Owner, OwnerId};
pub use runtime::Runtime;
pub use signal::{signal, signal_with_equals, Signal};
pub use tracking::{is_tracking, untrack};
