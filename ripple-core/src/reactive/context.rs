//! Context Propagation
//!
//! A context is a typed key with a default value. Providers push values for a
//! key onto the current scope; reads see the innermost value that is still in
//! place, falling back to the default.
//!
//! # Scoping
//!
//! Provided values live on the current owner, so they are visible to
//! everything created beneath it (effects re-running later included) and are
//! dropped with it. Outside of any owner they go onto a per-thread root stack.
//!
//! # Snapshots
//!
//! Synchronous code sees context through the owner chain, but a callback that
//! runs after the providing code has returned does not. [`capture_snapshot`]
//! records the nearest value of every visible key; [`run_with_snapshot`]
//! replays them around a later call and removes them again afterwards, on
//! every exit path. [`scoped`] does the same for a future, around every poll.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context as TaskContext, Poll};

use indexmap::IndexMap;

use super::owner::{Owner, OwnerId};
use super::runtime::Runtime;

/// Unique identifier for a context key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

/// Per-key stacks of provided values for one scope.
#[derive(Default)]
pub(crate) struct ContextStacks {
    stacks: IndexMap<ContextId, Vec<Rc<dyn Any>>>,
}

impl ContextStacks {
    pub(crate) fn push(&mut self, id: ContextId, value: Rc<dyn Any>) {
        self.stacks.entry(id).or_default().push(value);
    }

    pub(crate) fn pop(&mut self, id: ContextId) -> Option<Rc<dyn Any>> {
        let stack = self.stacks.get_mut(&id)?;
        let value = stack.pop();
        if stack.is_empty() {
            self.stacks.shift_remove(&id);
        }
        value
    }

    /// Remove exactly `value` from the stack of `id`, wherever it sits.
    pub(crate) fn remove_entry(&mut self, id: ContextId, value: &Rc<dyn Any>) -> Option<Rc<dyn Any>> {
        let stack = self.stacks.get_mut(&id)?;
        let index = stack.iter().rposition(|entry| Rc::ptr_eq(entry, value))?;
        let removed = stack.remove(index);
        if stack.is_empty() {
            self.stacks.shift_remove(&id);
        }
        Some(removed)
    }

    pub(crate) fn top(&self, id: ContextId) -> Option<Rc<dyn Any>> {
        self.stacks.get(&id).and_then(|stack| stack.last()).cloned()
    }

    /// The innermost value of every key, in first-provided order.
    pub(crate) fn tops(&self) -> impl Iterator<Item = (ContextId, Rc<dyn Any>)> + '_ {
        self.stacks
            .iter()
            .filter_map(|(id, stack)| stack.last().map(|value| (*id, Rc::clone(value))))
    }
}

/// A typed context key with a default value.
pub struct Context<T: 'static> {
    id: ContextId,
    default: Rc<T>,
}

impl<T: 'static> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            default: Rc::clone(&self.default),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("default", &self.default)
            .finish()
    }
}

impl<T: 'static> Context<T> {
    /// Create a new context key. Every call yields a distinct key.
    pub fn new(default: T) -> Self {
        Self {
            id: ContextId::new(),
            default: Rc::new(default),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }

    /// Provide `value` for the duration of `f`.
    ///
    /// The value is removed again when `f` returns or panics, even if `f`
    /// itself left other providers unbalanced.
    pub fn provide<R>(&self, value: T, f: impl FnOnce() -> R) -> R {
        let value: Rc<dyn Any> = Rc::new(value);
        let scope = Runtime::with(|rt| {
            let scope = rt.context_scope();
            rt.push_context(scope, self.id, Rc::clone(&value));
            scope
        });
        let _guard = ProvidedGuard {
            scope,
            entries: vec![(self.id, value)],
        };
        f()
    }

    /// Read the current value of this context.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        read(self)
    }
}

/// Create a new context key with `default` as its fallback value.
pub fn create_context<T: 'static>(default: T) -> Context<T> {
    Context::new(default)
}

/// Push `value` for `context` onto the current scope.
///
/// Must be balanced by a [`pop_provider`] in the same scope.
pub fn push_provider<T: 'static>(context: &Context<T>, value: T) {
    Runtime::with(|rt| {
        let scope = rt.context_scope();
        rt.push_context(scope, context.id, Rc::new(value));
    });
}

/// Pop the innermost value for `context` from the current scope.
///
/// Popping a key with nothing provided in this scope does nothing.
pub fn pop_provider<T: 'static>(context: &Context<T>) {
    let popped = Runtime::with(|rt| {
        let scope = rt.context_scope();
        rt.pop_context(scope, context.id)
    });
    if popped.is_none() {
        tracing::debug!(context = %context.id, "pop_provider without a matching push");
    }
}

/// The innermost provided value of `context`, or its default.
pub fn read<T: Clone + 'static>(context: &Context<T>) -> T {
    let provided = Runtime::with(|rt| rt.lookup_context(context.id));
    provided
        .as_deref()
        .and_then(|value| value.downcast_ref::<T>())
        .cloned()
        .unwrap_or_else(|| T::clone(&context.default))
}

/// The nearest value of every context key visible right now.
#[derive(Clone, Default)]
pub struct ContextSnapshot {
    entries: IndexMap<ContextId, Rc<dyn Any>>,
}

impl ContextSnapshot {
    /// The value of `context` recorded in this snapshot, if it had one.
    pub fn get<T: Clone + 'static>(&self, context: &Context<T>) -> Option<T> {
        self.entries
            .get(&context.id)
            .and_then(|value| (**value).downcast_ref::<T>())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run `f` with this snapshot in place.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        run_with_snapshot(self, f)
    }

    /// Wrap a future so every poll runs with this snapshot in place.
    pub fn scope<F: Future>(self, future: F) -> Scoped<F> {
        Scoped {
            inner: Box::pin(future),
            snapshot: self,
            owner: None,
        }
    }
}

impl fmt::Debug for ContextSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSnapshot")
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Record the nearest value of every context key visible right now.
pub fn capture_snapshot() -> ContextSnapshot {
    let entries = Runtime::with(|rt| rt.snapshot_contexts());
    tracing::trace!(keys = entries.len(), "captured context snapshot");
    ContextSnapshot { entries }
}

/// Run `f` with the values of `snapshot` provided, then remove exactly those
/// values again, whether `f` returns or panics.
pub fn run_with_snapshot<R>(snapshot: &ContextSnapshot, f: impl FnOnce() -> R) -> R {
    if snapshot.is_empty() {
        return f();
    }
    let scope = Runtime::with(|rt| {
        let scope = rt.context_scope();
        for (id, value) in &snapshot.entries {
            rt.push_context(scope, *id, Rc::clone(value));
        }
        scope
    });
    let _guard = ProvidedGuard {
        scope,
        entries: snapshot
            .entries
            .iter()
            .map(|(id, value)| (*id, Rc::clone(value)))
            .collect(),
    };
    f()
}

/// Removes the values it pushed when dropped, newest first.
struct ProvidedGuard {
    scope: Option<OwnerId>,
    entries: Vec<(ContextId, Rc<dyn Any>)>,
}

impl Drop for ProvidedGuard {
    fn drop(&mut self) {
        let scope = self.scope;
        for (id, value) in self.entries.drain(..).rev() {
            let removed = Runtime::try_with(|rt| rt.remove_context_entry(scope, id, &value));
            drop(removed);
        }
    }
}

/// A future that polls its inner future under a captured context snapshot
/// and, optionally, a captured owner.
pub struct Scoped<F: Future> {
    inner: Pin<Box<F>>,
    snapshot: ContextSnapshot,
    owner: Option<Owner>,
}

impl<F: Future> Future for Scoped<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let inner = &mut this.inner;
        let snapshot = &this.snapshot;
        match this.owner {
            Some(owner) if !owner.is_disposed() => {
                owner.with(|| run_with_snapshot(snapshot, || inner.as_mut().poll(cx)))
            }
            _ => run_with_snapshot(snapshot, || inner.as_mut().poll(cx)),
        }
    }
}

/// Wrap `future` so it resumes under the context and owner that are current
/// now, on every poll.
///
/// ```rust
/// use ripple_core::{create_context, read, scoped};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let theme = create_context("light");
/// let key = theme.clone();
/// let task = theme.provide("dark", || scoped(async move { read(&key) }));
///
/// // The provider is gone by now, but the future still sees its value.
/// assert_eq!(read(&theme), "light");
/// assert_eq!(task.await, "dark");
/// # }
/// ```
pub fn scoped<F: Future>(future: F) -> Scoped<F> {
    let mut scoped = capture_snapshot().scope(future);
    scoped.owner = Owner::current();
    scoped
}
