//! Ripple Core
//!
//! This crate provides a fine-grained reactive runtime. It implements:
//!
//! - Reactive primitives (signals, computeds, effects)
//! - Push-pull change propagation with glitch-free updates
//! - Batched effect scheduling
//! - Owner scopes with ordered disposal
//! - Context values with snapshot and restore across async boundaries
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives, owners, context and the runtime
//! - `graph`: Dependency graph, dirty states and the effect queue
//! - `config`: Runtime tunables
//! - `error`: Error types
//!
//! Every thread has its own runtime. Handles are `Rc`-based and stay on the
//! thread that created them.
//!
//! # Example
//!
//! ```rust
//! use ripple_core::{computed, effect, signal};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! // Create a signal
//! let count = signal(0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     computed(move || count.get() * 2)
//! };
//!
//! // Create an effect
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let _watcher = {
//!     let log = log.clone();
//!     effect(move || log.borrow_mut().push(doubled.get()))
//! };
//!
//! // Update the signal; the effect runs before `set` returns
//! count.set(5);
//! assert_eq!(*log.borrow(), vec![0, 10]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{configure, current_config, RuntimeConfig};
pub use error::{DisposalError, EvaluationError, ReactiveError};
pub use reactive::{
    batch, capture_snapshot, computed, computed_with_equals, create_context, create_root, effect,
    effect_with_cleanup, flush_sync, get_owner, is_batching, is_tracking, on_cleanup, pop_provider,
    push_provider, read, run_with_owner, run_with_snapshot, scoped, signal, signal_with_equals,
    untrack, Computed, Context, ContextSnapshot, Effect, Owner, Signal,
};
