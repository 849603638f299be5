//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computeds Work
//!
//! 1. Creating a computed runs nothing. The first read evaluates it and
//!    caches the result.
//!
//! 2. When read again with no dependency changed, the cached value is
//!    returned.
//!
//! 3. When a direct dependency changes, the computed is marked dirty; when
//!    something further upstream changes, it is only "maybe dirty".
//!
//! 4. On the next read a maybe-dirty computed first brings its own computed
//!    sources up to date. It re-evaluates only if one of them really changed.
//!
//! 5. A re-evaluation that produces an equal value leaves dependents alone.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - A signal changes
//! - 10 computeds depend on it
//! - Only the computeds actually read will recompute
//! - Computeds that are never read stay dirty (no wasted work)
//!
//! # Disposal
//!
//! A computed created under an owner is cut out of the graph when the owner
//! is disposed. It keeps returning its last cached value from then on and
//! never re-evaluates.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::graph::{Computation, DirtyState, NodeId};

use super::runtime::{ReactiveHandle, Runtime};
use super::tracking::TrackingScope;

/// A cached derived value that recomputes only when dependencies change.
///
/// # Example
///
/// ```rust
/// use ripple_core::{computed, signal};
///
/// let count = signal(2);
/// let doubled = {
///     let count = count.clone();
///     computed(move || count.get() * 2)
/// };
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T: 'static> {
    inner: Rc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    handle: ReactiveHandle,
    compute: Box<dyn Fn() -> T>,
    /// The cached value (None if never computed).
    value: RefCell<Option<T>>,
    equals: fn(&T, &T) -> bool,
}

impl<T: 'static> Computation for ComputedInner<T> {
    fn evaluate(&self) -> bool {
        let next = (self.compute)();
        let mut slot = self.value.borrow_mut();
        let changed = match slot.as_ref() {
            Some(previous) => !(self.equals)(previous, &next),
            None => true,
        };
        if changed {
            *slot = Some(next);
        }
        changed
    }
}

/// Create a computed compared with `PartialEq`.
pub fn computed<T: PartialEq + 'static>(compute: impl Fn() -> T + 'static) -> Computed<T> {
    Computed::new(compute)
}

/// Create a computed that uses `equals` to decide whether a re-evaluation
/// changed its value.
pub fn computed_with_equals<T: 'static>(
    compute: impl Fn() -> T + 'static,
    equals: fn(&T, &T) -> bool,
) -> Computed<T> {
    Computed::with_equals(compute, equals)
}

impl<T: 'static> Computed<T> {
    /// Create a new computed with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new(compute: impl Fn() -> T + 'static) -> Self
    where
        T: PartialEq,
    {
        Self::with_equals(compute, <T as PartialEq>::eq)
    }

    pub fn with_equals(compute: impl Fn() -> T + 'static, equals: fn(&T, &T) -> bool) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let computation: Weak<dyn Computation> = weak.clone();
            ComputedInner {
                handle: Runtime::with(|rt| rt.register_derived(computation)),
                compute: Box::new(compute),
                value: RefCell::new(None),
                equals,
            }
        });
        Self { inner }
    }

    /// Get the computed's node ID.
    pub fn id(&self) -> NodeId {
        self.inner.handle.id()
    }

    /// Get the current value, recomputing first if needed.
    ///
    /// Inside another computed or effect this also records the dependency.
    ///
    /// # Panics
    ///
    /// Re-raises a panic of the computation, and panics if the computed
    /// reads itself while evaluating.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Borrow the current value, recomputing first if needed.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        Runtime::with(|rt| rt.read_derived(self.id()));
        let value = self.inner.value.borrow();
        f(value.as_ref().expect("up-to-date computed holds a value"))
    }

    /// Get the current value without tracking the read.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        let _untracked = TrackingScope::untracked();
        self.get()
    }

    /// Get the current dirty state.
    pub fn state(&self) -> DirtyState {
        Runtime::with(|rt| rt.with_node(self.id(), |node| node.dirty_state())).unwrap_or(DirtyState::Clean)
    }

    /// Check if the computed has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Number of nodes read during the last successful evaluation.
    pub fn dependency_count(&self) -> usize {
        Runtime::with(|rt| rt.with_node(self.id(), |node| node.dependencies().len())).unwrap_or(0)
    }

    /// Number of successful evaluations so far.
    pub fn evaluation_count(&self) -> usize {
        Runtime::with(|rt| rt.with_node(self.id(), |node| node.evaluations())).unwrap_or(0)
    }

    pub fn is_disposed(&self) -> bool {
        Runtime::with(|rt| rt.with_node(self.id(), |node| node.is_disposed())).unwrap_or(true)
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Computed");
        debug.field("id", &self.id()).field("state", &self.state());
        match self.inner.value.try_borrow() {
            Ok(value) => debug.field("value", &*value),
            Err(_) => debug.field("value", &"<evaluating>"),
        };
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{create_root, signal};
    use std::cell::Cell;

    fn counted<T: PartialEq + 'static>(
        runs: &Rc<Cell<usize>>,
        f: impl Fn() -> T + 'static,
    ) -> Computed<T> {
        let runs = runs.clone();
        computed(move || {
            runs.set(runs.get() + 1);
            f()
        })
    }

    #[test]
    fn computed_computes_on_first_access() {
        let runs = Rc::new(Cell::new(0));
        let value = counted(&runs, || 42);

        assert_eq!(runs.get(), 0);
        assert!(!value.has_value());
        assert_eq!(value.state(), DirtyState::Dirty);

        assert_eq!(value.get(), 42);
        assert_eq!(runs.get(), 1);
        assert!(value.has_value());
        assert_eq!(value.state(), DirtyState::Clean);
    }

    #[test]
    fn computed_caches_value_when_clean() {
        let runs = Rc::new(Cell::new(0));
        let value = counted(&runs, || 1);

        value.get();
        value.get();
        value.get();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn computed_is_lazy_after_dependency_write() {
        let source = signal(1);
        let runs = Rc::new(Cell::new(0));
        let double = {
            let source = source.clone();
            counted(&runs, move || source.get() * 2)
        };

        assert_eq!(double.get(), 2);
        source.set(2);
        source.set(3);
        assert_eq!(runs.get(), 1);
        assert_eq!(double.state(), DirtyState::Dirty);

        assert_eq!(double.get(), 6);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn equal_result_stops_propagation() {
        let source = signal(1);
        let parity = {
            let source = source.clone();
            computed(move || source.get() % 2)
        };
        let runs = Rc::new(Cell::new(0));
        let label = {
            let parity = parity.clone();
            counted(&runs, move || format!("parity {}", parity.get()))
        };

        assert_eq!(label.get(), "parity 1");
        source.set(3);
        assert_eq!(label.state(), DirtyState::MaybeDirty);
        assert_eq!(label.get(), "parity 1");
        assert_eq!(runs.get(), 1);
        assert_eq!(label.state(), DirtyState::Clean);
    }

    #[test]
    fn dependencies_follow_the_last_evaluation() {
        let flag = signal(true);
        let a = signal(1);
        let b = signal(2);
        let pick = {
            let (flag, a, b) = (flag.clone(), a.clone(), b.clone());
            computed(move || if flag.get() { a.get() } else { b.get() })
        };

        assert_eq!(pick.get(), 1);
        assert_eq!(pick.dependency_count(), 2);
        assert_eq!(b.subscriber_count(), 0);

        flag.set(false);
        assert_eq!(pick.get(), 2);
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);
    }

    #[test]
    fn panicking_computation_retries_on_next_read() {
        let fail = signal(true);
        let value = {
            let fail = fail.clone();
            computed(move || {
                if fail.get() {
                    panic!("not ready");
                }
                7
            })
        };

        let first = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| value.get()));
        assert!(first.is_err());
        assert!(!value.has_value());

        // The failed run stays subscribed to what it read.
        assert_eq!(fail.subscriber_count(), 1);
        fail.set(false);
        assert_eq!(value.get(), 7);
    }

    #[test]
    fn self_read_is_a_circular_dependency() {
        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
        let looped = {
            let slot = slot.clone();
            computed(move || match slot.borrow().as_ref() {
                Some(me) => me.get() + 1,
                None => 0,
            })
        };
        *slot.borrow_mut() = Some(looped.clone());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| looped.get()));
        let payload = result.unwrap_err();
        let message = crate::error::panic_message(payload.as_ref());
        assert!(message.contains("circular dependency"));

        slot.borrow_mut().take();
    }

    #[test]
    fn disposed_computed_keeps_last_value() {
        let source = signal(1);
        let (root, double) = create_root(|root| {
            let source = source.clone();
            (root, computed(move || source.get() * 2))
        });

        assert_eq!(double.get(), 2);
        root.dispose().unwrap();
        assert!(double.is_disposed());

        source.set(10);
        assert_eq!(double.get(), 2);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn disposed_before_first_read_computes_once() {
        let source = signal(3);
        let runs = Rc::new(Cell::new(0));
        let (root, triple) = create_root(|root| {
            let source = source.clone();
            (root, counted(&runs, move || source.get() * 3))
        });
        root.dispose().unwrap();

        assert_eq!(triple.get(), 9);
        source.set(4);
        assert_eq!(triple.get(), 9);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn dropping_last_handle_unregisters() {
        let before = Runtime::node_count();
        let value = computed(|| 1);
        assert_eq!(Runtime::node_count(), before + 1);
        drop(value);
        assert_eq!(Runtime::node_count(), before);
    }
}
