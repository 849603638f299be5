//! Integration Tests for Reactive System
//!
//! These tests verify that signals, computeds, effects, owners and context
//! work together correctly through the public API.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ripple_core::{
    batch, capture_snapshot, computed, create_context, create_root, effect, effect_with_cleanup,
    on_cleanup, pop_provider, push_provider, read, run_with_snapshot, scoped, signal, untrack,
    Owner, Signal,
};

fn counter() -> Rc<Cell<usize>> {
    Rc::new(Cell::new(0))
}

fn bump(counter: &Cell<usize>) {
    counter.set(counter.get() + 1);
}

/// Setting a signal to the value it already holds re-runs nothing.
#[test]
fn setting_current_value_triggers_nothing() {
    let s = signal(4);
    let runs = counter();
    let derived_runs = counter();

    let doubled = {
        let (s, derived_runs) = (s.clone(), derived_runs.clone());
        computed(move || {
            bump(&derived_runs);
            s.get() * 2
        })
    };
    let _watcher = {
        let (s, runs) = (s.clone(), runs.clone());
        effect(move || {
            s.get();
            doubled.get();
            bump(&runs);
        })
    };
    assert_eq!(runs.get(), 1);
    assert_eq!(derived_runs.get(), 1);

    s.set(s.peek());
    assert_eq!(runs.get(), 1);
    assert_eq!(derived_runs.get(), 1);
}

/// Both sides of a diamond change, yet the effect at the bottom runs once.
#[test]
fn diamond_dependency_runs_once() {
    let s = signal(1);
    let a = {
        let s = s.clone();
        computed(move || s.get() + 1)
    };
    let b = {
        let s = s.clone();
        computed(move || s.get() + 2)
    };

    let runs = counter();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let _watcher = {
        let (runs, seen) = (runs.clone(), seen.clone());
        effect(move || {
            seen.borrow_mut().push((a.get(), b.get()));
            bump(&runs);
        })
    };
    assert_eq!(runs.get(), 1);

    s.set(2);
    assert_eq!(runs.get(), 2);
    // Never an inconsistent mix of old and new values.
    assert_eq!(*seen.borrow(), vec![(2, 3), (3, 4)]);
}

/// A deeper diamond where one branch cuts off because its value is unchanged.
#[test]
fn unchanged_branch_does_not_rerun_dependents() {
    let s = signal(1);
    let is_positive = {
        let s = s.clone();
        computed(move || s.get() > 0)
    };
    let label_runs = counter();
    let label = {
        let (is_positive, label_runs) = (is_positive.clone(), label_runs.clone());
        computed(move || {
            bump(&label_runs);
            if is_positive.get() { "positive" } else { "not positive" }
        })
    };

    let runs = counter();
    let _watcher = {
        let runs = runs.clone();
        effect(move || {
            label.get();
            bump(&runs);
        })
    };

    s.set(5);
    s.set(9);
    assert_eq!(label_runs.get(), 1);
    assert_eq!(runs.get(), 1);

    s.set(-1);
    assert_eq!(label_runs.get(), 2);
    assert_eq!(runs.get(), 2);
}

/// Computeds do nothing until read.
#[test]
fn computed_is_lazy() {
    let s = signal(1);
    let runs = counter();
    let double = {
        let (s, runs) = (s.clone(), runs.clone());
        computed(move || {
            bump(&runs);
            s.get() * 2
        })
    };
    assert_eq!(runs.get(), 0);

    s.set(2);
    assert_eq!(runs.get(), 0);

    assert_eq!(double.get(), 4);
    assert_eq!(runs.get(), 1);

    s.set(3);
    assert_eq!(runs.get(), 1);
    assert_eq!(double.get(), 6);
    assert_eq!(runs.get(), 2);
}

/// A batch runs dependent effects once with the final value only.
#[test]
fn batch_coalesces_to_final_value() {
    let s = signal(1);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let _watcher = {
        let (s, seen) = (s.clone(), seen.clone());
        effect(move || seen.borrow_mut().push(s.get()))
    };

    batch(|| {
        s.set(2);
        s.set(3);
    });
    assert_eq!(*seen.borrow(), vec![1, 3]);
}

/// Three re-runs and a disposal give four cleanups, each before the next run.
#[test]
fn cleanup_ordering_across_reruns_and_disposal() {
    let s = signal(0);
    let events = Rc::new(RefCell::new(Vec::new()));

    let watcher = {
        let (s, events) = (s.clone(), events.clone());
        effect_with_cleanup(move || {
            let value = s.get();
            events.borrow_mut().push(format!("run {value}"));
            let events = events.clone();
            move || events.borrow_mut().push(format!("cleanup {value}"))
        })
    };

    s.set(1);
    s.set(2);
    s.set(3);
    watcher.dispose().unwrap();

    assert_eq!(
        *events.borrow(),
        vec![
            "run 0",
            "cleanup 0",
            "run 1",
            "cleanup 1",
            "run 2",
            "cleanup 2",
            "run 3",
            "cleanup 3",
        ]
    );
    let cleanups = events
        .borrow()
        .iter()
        .filter(|event| event.starts_with("cleanup"))
        .count();
    assert_eq!(cleanups, 4);
}

/// Reads inside `untrack` never subscribe.
#[test]
fn untrack_isolates_reads() {
    let x = signal(1);
    let y = signal(10);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let _watcher = {
        let (x, y, seen) = (x.clone(), y.clone(), seen.clone());
        effect(move || {
            let tracked = y.get();
            let untracked = untrack(|| x.get());
            seen.borrow_mut().push((tracked, untracked));
        })
    };

    x.set(2);
    assert_eq!(*seen.borrow(), vec![(10, 1)]);

    // Still sees the new value on the next run caused by something else.
    y.set(20);
    assert_eq!(*seen.borrow(), vec![(10, 1), (20, 2)]);
    assert_eq!(x.subscriber_count(), 0);
}

/// Providers shadow each other and unwind back to the default.
#[test]
fn context_shadowing() {
    let key = create_context("default");

    push_provider(&key, "outer");
    push_provider(&key, "inner");
    assert_eq!(read(&key), "inner");
    pop_provider(&key);
    assert_eq!(read(&key), "outer");
    pop_provider(&key);
    assert_eq!(read(&key), "default");
}

/// A snapshot carries context to code that runs after the provider is gone.
#[test]
fn snapshot_replay_restores_afterwards() {
    let key = create_context("default");

    push_provider(&key, "v");
    let snapshot = capture_snapshot();
    pop_provider(&key);
    assert_eq!(read(&key), "default");

    let replayed = run_with_snapshot(&snapshot, || read(&key));
    assert_eq!(replayed, "v");
    assert_eq!(read(&key), "default");
}

/// Snapshot values are removed even if the callback panics.
#[test]
fn snapshot_replay_restores_after_panic() {
    let key = create_context(0);
    let snapshot = key.provide(1, capture_snapshot);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        run_with_snapshot(&snapshot, || -> () { panic!("callback failed") })
    }));
    assert!(result.is_err());
    assert_eq!(read(&key), 0);
}

/// Disposed effects never run again and clean up exactly once.
#[test]
fn disposal_is_terminal() {
    let s = signal(0);
    let runs = counter();
    let cleanups = counter();

    let watcher = {
        let (s, runs, cleanups) = (s.clone(), runs.clone(), cleanups.clone());
        effect(move || {
            s.get();
            bump(&runs);
            let cleanups = cleanups.clone();
            on_cleanup(move || bump(&cleanups));
        })
    };

    watcher.dispose().unwrap();
    assert_eq!(cleanups.get(), 1);

    s.set(1);
    s.set(2);
    watcher.dispose().unwrap();
    assert_eq!(runs.get(), 1);
    assert_eq!(cleanups.get(), 1);
}

/// The canonical signal -> computed -> effect chain.
#[test]
fn end_to_end_scenario() {
    let count = signal(0);
    let doubled = {
        let count = count.clone();
        computed(move || count.get() * 2)
    };
    let log = Rc::new(RefCell::new(Vec::new()));
    let _watcher = {
        let log = log.clone();
        effect(move || log.borrow_mut().push(doubled.get()))
    };
    assert_eq!(*log.borrow(), vec![0]);

    count.set(5);
    assert_eq!(*log.borrow(), vec![0, 10]);

    batch(|| {
        count.set(1);
        count.set(2);
    });
    assert_eq!(*log.borrow(), vec![0, 10, 4]);
}

/// Disposing a root tears down nested effects and computeds in order.
#[test]
fn root_disposal_cascades() {
    let s = signal(0);
    let order = Rc::new(RefCell::new(Vec::new()));
    let runs = counter();

    let root = create_root(|root| {
        {
            let order = order.clone();
            on_cleanup(move || order.borrow_mut().push("root"));
        }
        let (s, order, runs) = (s.clone(), order.clone(), runs.clone());
        effect(move || {
            s.get();
            bump(&runs);
            let order = order.clone();
            on_cleanup(move || order.borrow_mut().push("effect"));
        });
        root
    });

    s.set(1);
    assert_eq!(runs.get(), 2);
    order.borrow_mut().clear();

    root.dispose().unwrap();
    assert_eq!(*order.borrow(), vec!["effect", "root"]);

    s.set(2);
    assert_eq!(runs.get(), 2);
    assert!(root.is_disposed());
}

/// An effect panicking inside a batch surfaces after the others have run.
#[test]
fn effect_failure_is_isolated_and_surfaced() {
    let s = signal(0);
    let healthy = counter();

    let _failing = {
        let s = s.clone();
        effect(move || {
            if s.get() == 1 {
                panic!("render failed");
            }
        })
    };
    let _healthy = {
        let (s, healthy) = (s.clone(), healthy.clone());
        effect(move || {
            s.get();
            bump(&healthy);
        })
    };

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| batch(|| s.set(1))));
    let payload = result.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"render failed"));
    assert_eq!(healthy.get(), 2);
}

/// An effect writing a signal it already read during its first run runs
/// again and sees the write.
#[test]
fn effect_writing_its_source_on_first_run_reruns() {
    let s = signal(0);
    let log = Rc::new(RefCell::new(Vec::new()));

    let _writer = {
        let (s, log) = (s.clone(), log.clone());
        effect(move || {
            let value = s.get();
            log.borrow_mut().push(value);
            if value == 0 {
                s.set(1);
            }
        })
    };

    assert_eq!(*log.borrow(), vec![0, 1]);
    assert_eq!(s.peek(), 1);
}

/// A nested effect writing its parent's source re-runs the parent.
#[test]
fn nested_effect_writing_parent_source_reruns_parent() {
    let s = signal(0);
    let log = Rc::new(RefCell::new(Vec::new()));

    let _parent = {
        let (s, log) = (s.clone(), log.clone());
        effect(move || {
            log.borrow_mut().push(s.get());
            let s = s.clone();
            effect(move || {
                if s.peek() == 0 {
                    s.set(5);
                }
            });
        })
    };

    assert_eq!(*log.borrow(), vec![0, 5]);
    assert_eq!(s.peek(), 5);
}

/// A write that reaches an effect through a computed it already read
/// re-runs the effect.
#[test]
fn effect_writing_through_a_computed_reruns() {
    let s = signal(0);
    let log = Rc::new(RefCell::new(Vec::new()));

    let doubled = {
        let s = s.clone();
        computed(move || s.get() * 2)
    };
    let _writer = {
        let (s, doubled, log) = (s.clone(), doubled.clone(), log.clone());
        effect(move || {
            let value = doubled.get();
            log.borrow_mut().push(value);
            if value == 0 {
                s.set(1);
            }
        })
    };

    assert_eq!(*log.borrow(), vec![0, 2]);
    assert_eq!(doubled.get(), 2);
}

/// An effect whose first run panics still re-runs once its input changes.
#[test]
fn effect_recovers_after_failed_first_run() {
    let s = signal(0);
    let runs = counter();

    let created = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let (s, runs) = (s.clone(), runs.clone());
        effect(move || {
            bump(&runs);
            if s.get() == 0 {
                panic!("not ready");
            }
        })
    }));
    assert!(created.is_err());
    assert_eq!(runs.get(), 1);
    assert_eq!(s.subscriber_count(), 1);

    s.set(1);
    assert_eq!(runs.get(), 2);
}

/// An effect reading a computed whose first evaluation panicked re-runs
/// once the computed's input changes.
#[test]
fn effect_recovers_after_failed_computed() {
    let s = signal(0);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let checked = {
        let s = s.clone();
        computed(move || {
            let value = s.get();
            if value == 0 {
                panic!("no value yet");
            }
            value
        })
    };
    let created = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let (checked, seen) = (checked.clone(), seen.clone());
        effect(move || seen.borrow_mut().push(checked.get()))
    }));
    assert!(created.is_err());
    assert!(seen.borrow().is_empty());

    batch(|| s.set(3));
    assert_eq!(*seen.borrow(), vec![3]);
}

/// Effects owned by an owner keep reading context provided on it.
#[test]
fn effects_see_context_of_their_owner() {
    let theme = create_context("light");
    let mode = signal(0);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let owner = Owner::new_root();
    owner.with(|| {
        push_provider(&theme, "dark");
        let (theme, mode, seen) = (theme.clone(), mode.clone(), seen.clone());
        effect(move || {
            mode.get();
            seen.borrow_mut().push(read(&theme));
        });
    });

    // The effect re-runs outside of `owner.with`, yet still sees "dark".
    mode.set(1);
    assert_eq!(*seen.borrow(), vec!["dark", "dark"]);
    assert_eq!(read(&theme), "light");

    owner.dispose().unwrap();
}

/// Context survives an await point inside a scoped future.
#[tokio::test(flavor = "current_thread")]
async fn scoped_future_keeps_context_across_await() {
    let request_id = create_context(0_u32);

    let task = {
        let key = request_id.clone();
        request_id.provide(42, || {
            scoped(async move {
                let before = read(&key);
                tokio::task::yield_now().await;
                let after = read(&key);
                (before, after)
            })
        })
    };

    assert_eq!(read(&request_id), 0);
    assert_eq!(task.await, (42, 42));
    assert_eq!(read(&request_id), 0);
}

/// Signals are plain values that can be stored and passed around.
#[test]
fn signals_in_collections() {
    let cells: Vec<Signal<i32>> = (0..3).map(signal).collect();
    let total = {
        let cells = cells.clone();
        computed(move || cells.iter().map(Signal::get).sum::<i32>())
    };
    assert_eq!(total.get(), 3);

    batch(|| {
        for cell in &cells {
            cell.update(|value| *value *= 10);
        }
    });
    assert_eq!(total.get(), 30);
}
