//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a computed or effect, the read is recorded
//!    and the computation becomes a dependent once it finishes.
//!
//! 2. When a signal is set to a value that differs from the current one, its
//!    dependents are marked dirty and affected effects are scheduled.
//!
//! 3. Setting a signal to an equal value does nothing at all.
//!
//! # Equality
//!
//! By default values are compared with `PartialEq`. Types without a useful
//! `PartialEq` (or ones where every write should count) can supply their own
//! comparison through [`signal_with_equals`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::graph::NodeId;

use super::runtime::{ReactiveHandle, Runtime};

/// A reactive signal holding a value of type T.
///
/// Cloning a signal is cheap and yields another handle to the same value.
///
/// # Example
///
/// ```rust
/// use ripple_core::signal;
///
/// let count = signal(0);
/// assert_eq!(count.get(), 0);
///
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

struct SignalInner<T> {
    handle: ReactiveHandle,
    value: RefCell<T>,
    equals: fn(&T, &T) -> bool,
}

/// Create a signal compared with `PartialEq`.
pub fn signal<T: PartialEq + 'static>(value: T) -> Signal<T> {
    Signal::new(value)
}

/// Create a signal that uses `equals` to decide whether a write changes it.
pub fn signal_with_equals<T: 'static>(value: T, equals: fn(&T, &T) -> bool) -> Signal<T> {
    Signal::with_equals(value, equals)
}

impl<T: 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equals(value, <T as PartialEq>::eq)
    }

    pub fn with_equals(value: T, equals: fn(&T, &T) -> bool) -> Self {
        let handle = Runtime::with(|rt| rt.register_source());
        Self {
            inner: Rc::new(SignalInner {
                handle,
                value: RefCell::new(value),
                equals,
            }),
        }
    }

    /// Get the signal's node ID.
    pub fn id(&self) -> NodeId {
        self.inner.handle.id()
    }

    /// Get the current value.
    ///
    /// Inside a computed or effect this also records the signal as one of
    /// its dependencies.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Get the current value without tracking dependencies.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value, tracking the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        Runtime::with(|rt| rt.track_read(self.id()));
        f(&self.inner.value.borrow())
    }

    /// Set a new value.
    ///
    /// Dependents are only notified if the value differs from the current
    /// one. Outside of a batch, affected effects run before this returns.
    pub fn set(&self, value: T) {
        let changed = {
            let mut current = self.inner.value.borrow_mut();
            if (self.inner.equals)(&current, &value) {
                false
            } else {
                *current = value;
                true
            }
        };
        if changed {
            Runtime::with(|rt| rt.notify_signal_change(self.id()));
        }
    }

    /// Update the value in place. Always notifies.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.value.borrow_mut());
        Runtime::with(|rt| rt.notify_signal_change(self.id()));
    }

    /// Get the number of computations currently depending on this signal.
    pub fn subscriber_count(&self) -> usize {
        Runtime::with(|rt| rt.with_node(self.id(), |node| node.dependents().len())).unwrap_or(0)
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Signal");
        debug.field("id", &self.id());
        match self.inner.value.try_borrow() {
            Ok(value) => debug.field("value", &*value),
            Err(_) => debug.field("value", &"<borrowed>"),
        };
        debug.finish()
    }
}
