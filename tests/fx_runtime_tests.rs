//! Tests for the run entry points, schedulers, and fibers.
//!
//! Tests cover:
//! - Blocking, non-blocking, and cancelable entry points
//! - Already-settled effects bypassing the run loop
//! - continue_on re-homing execution onto a pool
//! - fork/join round trips on both schedulers
//! - Joining a completed fiber and joining from several observers

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use parking_lot::Mutex;
use rstest::rstest;

use fxcore::concurrent::{Immediate, Scheduler, ThreadPool};
use fxcore::fx::{Fx, FxError};

fn pool(workers: usize) -> Arc<dyn Scheduler> {
    Arc::new(ThreadPool::new(workers).unwrap())
}

fn immediate() -> Arc<dyn Scheduler> {
    Arc::new(Immediate)
}

// =============================================================================
// Entry Points
// =============================================================================

#[rstest]
fn run_unsafe_returns_the_value() {
    assert_eq!(Fx::pure(1).run_unsafe(), Ok(1));
    assert_eq!(
        Fx::<i32>::raise_error(FxError::Canceled).run_unsafe(),
        Err(FxError::Canceled)
    );
}

#[rstest]
fn run_unsafe_blocks_for_asynchronous_work() {
    let effect = Fx::async_(|_connection, callback| {
        thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(10));
            callback.complete(Ok("eventually"));
        });
    });
    assert_eq!(effect.run_unsafe(), Ok("eventually"));
}

#[rstest]
fn run_unsafe_non_blocking_delivers_synchronously_when_possible() {
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);

    Fx::pure(3)
        .map(|x| x * 3)
        .run_unsafe_non_blocking(move |result| {
            *sink.lock() = Some(result);
        });

    assert_eq!(*seen.lock(), Some(Ok(9)));
}

#[rstest]
fn run_unsafe_non_blocking_delivers_failures_to_the_callback() {
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);

    Fx::<i32>::new(|| panic!("deferred"))
        .run_unsafe_non_blocking(move |result| {
            *sink.lock() = Some(result);
        });

    assert_eq!(
        *seen.lock(),
        Some(Err(FxError::Panicked("deferred".into())))
    );
}

#[rstest]
fn run_unsafe_cancelable_completes_normally_without_dispose() {
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);

    let _disposable = Fx::pure(11).run_unsafe_cancelable(move |result| {
        *sink.lock() = Some(result);
    });

    assert_eq!(*seen.lock(), Some(Ok(11)));
}

// =============================================================================
// Scheduler Hops
// =============================================================================

#[rstest]
fn continue_on_moves_execution_to_the_pool() {
    let scheduler = pool(2);
    let effect = Fx::new(|| {
        thread::current()
            .name()
            .map(str::to_owned)
            .unwrap_or_default()
    })
    .continue_on(&scheduler);

    let name = effect.run_unsafe().unwrap();
    assert!(
        name.starts_with("fxcore-worker-"),
        "ran on unexpected thread: {name}"
    );
}

#[rstest]
fn continue_on_immediate_stays_on_the_calling_thread() {
    let scheduler = immediate();
    let here = thread::current().id();
    let effect = Fx::new(move || thread::current().id() == here).continue_on(&scheduler);
    assert_eq!(effect.run_unsafe(), Ok(true));
}

// =============================================================================
// Fork / Join
// =============================================================================

#[rstest]
fn fork_then_join_yields_the_body_value() {
    for scheduler in [immediate(), pool(2)] {
        let program = Fx::pure(21)
            .map(|x| x * 2)
            .fork(&scheduler)
            .flat_map(|fiber| fiber.join());
        assert_eq!(program.run_unsafe(), Ok(42));
    }
}

#[rstest]
fn fork_propagates_the_body_failure_to_join() {
    let scheduler = immediate();
    let program = Fx::<i32>::raise_error(FxError::Panicked("inside".into()))
        .fork(&scheduler)
        .flat_map(|fiber| fiber.join());
    assert_eq!(
        program.run_unsafe(),
        Err(FxError::Panicked("inside".into()))
    );
}

#[rstest]
fn joining_a_completed_fiber_settles_immediately() {
    let scheduler = immediate();
    let fiber = Fx::pure("done").fork(&scheduler).run_unsafe().unwrap();

    assert!(fiber.is_complete());
    assert_eq!(fiber.join().run_unsafe(), Ok("done"));
    // A fresh join effect can be built and run any number of times.
    assert_eq!(fiber.join().run_unsafe(), Ok("done"));
}

#[rstest]
fn several_joiners_observe_the_same_completion() {
    let scheduler = pool(2);
    let body = Fx::async_(|_connection, callback| {
        thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(10));
            callback.complete(Ok(5));
        });
    });
    let fiber = Arc::new(body.fork(&scheduler).run_unsafe().unwrap());

    let observed = Arc::new(AtomicU32::new(0));
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let fiber = Arc::clone(&fiber);
            let observed = Arc::clone(&observed);
            thread::spawn(move || {
                assert_eq!(fiber.join().run_unsafe(), Ok(5));
                observed.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(observed.load(Ordering::SeqCst), 3);
}

#[rstest]
fn cancel_then_join_delivers_the_cancellation_failure() {
    let scheduler = immediate();

    // The body parks, but wires a cancel action that interrupts its own
    // suspension — the shape of any well-behaved cancelable registration.
    let body = Fx::async_(|connection, callback| {
        let interrupt: fxcore::fx::AsyncCallback<i32> = callback.clone();
        connection.push(Fx::new(move || {
            interrupt.complete(Err(FxError::Canceled));
        }));
    });

    let program = body
        .fork(&scheduler)
        .flat_map(|fiber| fiber.cancel().flat_map(move |()| fiber.join()));

    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    program.run_unsafe_non_blocking(move |result| {
        *sink.lock() = Some(result);
    });

    assert_eq!(*seen.lock(), Some(Err(FxError::Canceled)));
}

#[rstest]
fn forked_work_runs_concurrently_with_the_parent() {
    let scheduler = pool(2);
    let program = Fx::new(|| 1)
        .fork(&scheduler)
        .flat_map(move |fiber| Fx::new(|| 2).map(move |local| (fiber, local)))
        .flat_map(|(fiber, local)| fiber.join().map(move |forked| forked + local));
    assert_eq!(program.run_unsafe(), Ok(3));
}
