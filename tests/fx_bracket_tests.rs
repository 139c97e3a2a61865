//! Tests for resource-safe acquisition.
//!
//! Tests cover:
//! - Release firing exactly once on every exit path
//! - ExitCase reporting (Completed, Failed, Canceled)
//! - The overall outcome mirroring the use computation
//! - Cancellation overriding the outcome and still releasing
//! - guarantee / guarantee_case finalizers

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use rstest::rstest;

use fxcore::fx::{AsyncCallback, ExitCase, Fx, FxError};

/// Records every exit signal the release function observes.
struct ReleaseLog {
    exits: Mutex<Vec<ExitCase>>,
}

impl ReleaseLog {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            exits: Mutex::new(Vec::new()),
        })
    }

    fn recorded(&self) -> Vec<ExitCase> {
        self.exits.lock().clone()
    }
}

fn releaser(log: &Arc<ReleaseLog>) -> impl FnOnce(&'static str, ExitCase) -> Fx<()> + Send + 'static {
    let log = Arc::clone(log);
    move |_resource, exit| {
        Fx::new(move || {
            log.exits.lock().push(exit);
        })
    }
}

// =============================================================================
// Exit Cases
// =============================================================================

#[rstest]
fn successful_use_releases_with_completed() {
    let log = ReleaseLog::new();

    let program = Fx::pure("file").bracket_case(|resource| Fx::pure(resource.len()), releaser(&log));

    assert_eq!(program.run_unsafe(), Ok(4));
    assert_eq!(log.recorded(), vec![ExitCase::Completed]);
}

#[rstest]
fn failing_use_releases_with_failed_and_propagates() {
    let log = ReleaseLog::new();
    let error = FxError::Panicked("use blew up".into());
    let raised = error.clone();

    let program = Fx::pure("file").bracket_case(
        move |_resource| Fx::<usize>::raise_error(raised),
        releaser(&log),
    );

    assert_eq!(program.run_unsafe(), Err(error.clone()));
    assert_eq!(log.recorded(), vec![ExitCase::Failed(error)]);
}

#[rstest]
fn panicking_use_still_releases() {
    let log = ReleaseLog::new();

    let program = Fx::pure("file").bracket_case(
        |_resource| Fx::new(|| -> usize { panic!("torn") }),
        releaser(&log),
    );

    assert_eq!(
        program.run_unsafe(),
        Err(FxError::Panicked("torn".into()))
    );
    assert_eq!(
        log.recorded(),
        vec![ExitCase::Failed(FxError::Panicked("torn".into()))]
    );
}

#[rstest]
fn failing_acquire_never_runs_use_or_release() {
    let log = ReleaseLog::new();
    let used = Arc::new(AtomicU32::new(0));
    let counter = used.clone();

    let program = Fx::<&'static str>::raise_error(FxError::Panicked("no resource".into()))
        .bracket_case(
            move |_resource| {
                counter.fetch_add(1, Ordering::SeqCst);
                Fx::pure(0usize)
            },
            releaser(&log),
        );

    assert!(program.run_unsafe().is_err());
    assert_eq!(used.load(Ordering::SeqCst), 0);
    assert_eq!(log.recorded(), vec![]);
}

// =============================================================================
// Exactly-Once Release
// =============================================================================

#[rstest]
fn release_runs_exactly_once_on_success() {
    let log = ReleaseLog::new();

    let program = Fx::pure("conn")
        .bracket_case(|resource| Fx::new(move || resource.len()), releaser(&log))
        .map(|n| n * 10);

    assert_eq!(program.run_unsafe(), Ok(40));
    assert_eq!(log.recorded().len(), 1);
}

#[rstest]
fn cancellation_during_use_releases_with_canceled() {
    let log = ReleaseLog::new();
    let slot: Arc<Mutex<Option<AsyncCallback<usize>>>> = Arc::new(Mutex::new(None));
    let parked = Arc::clone(&slot);

    let program = Fx::pure("socket").bracket_case(
        move |_resource| {
            Fx::async_(move |_connection, callback| {
                *parked.lock() = Some(callback);
            })
        },
        releaser(&log),
    );

    let outcome = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&outcome);
    let disposable = program.run_unsafe_cancelable(move |result| {
        *sink.lock() = Some(result);
    });

    // Cancel while use is suspended: release must fire with Canceled.
    disposable.dispose();
    assert_eq!(log.recorded(), vec![ExitCase::Canceled]);

    // The late resume only observes the canceled token.
    slot.lock().take().unwrap().complete(Ok(99));
    assert_eq!(*outcome.lock(), Some(Err(FxError::Canceled)));
    assert_eq!(log.recorded().len(), 1);
}

#[rstest]
fn cancellation_before_acquire_settles_still_releases() {
    let log = ReleaseLog::new();
    let slot: Arc<Mutex<Option<AsyncCallback<&'static str>>>> = Arc::new(Mutex::new(None));
    let parked = Arc::clone(&slot);

    let acquire = Fx::async_(move |_connection, callback| {
        *parked.lock() = Some(callback);
    });
    let program = acquire.bracket_case(|_resource| Fx::pure(0usize), releaser(&log));

    let disposable = program.run_unsafe_cancelable(|_result| {});
    disposable.dispose();
    assert_eq!(log.recorded(), vec![]);

    // Acquire settles after the cancel: the resource must not leak.
    slot.lock().take().unwrap().complete(Ok("late"));
    assert_eq!(log.recorded(), vec![ExitCase::Canceled]);
}

// =============================================================================
// Guarantees
// =============================================================================

#[rstest]
fn guarantee_runs_finalizer_on_success() {
    let ran = Arc::new(AtomicU32::new(0));
    let counter = ran.clone();

    let program = Fx::pure(7).guarantee(Fx::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    assert_eq!(program.run_unsafe(), Ok(7));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[rstest]
fn guarantee_runs_finalizer_on_failure() {
    let ran = Arc::new(AtomicU32::new(0));
    let counter = ran.clone();

    let program = Fx::<i32>::raise_error(FxError::Canceled).guarantee(Fx::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    assert_eq!(program.run_unsafe(), Err(FxError::Canceled));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[rstest]
fn guarantee_case_reports_the_exit_signal() {
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);

    let program = Fx::<i32>::raise_error(FxError::Panicked("down".into())).guarantee_case(
        move |exit| {
            Fx::new(move || {
                *sink.lock() = Some(exit);
            })
        },
    );

    assert!(program.run_unsafe().is_err());
    assert_eq!(
        *seen.lock(),
        Some(ExitCase::Failed(FxError::Panicked("down".into())))
    );
}

#[rstest]
fn bracket_ignores_the_exit_signal() {
    let closed = Arc::new(AtomicU32::new(0));
    let counter = closed.clone();

    let program = Fx::pure(vec![1, 2, 3]).bracket(
        |resource| Fx::pure(resource.len()),
        move |_resource| {
            Fx::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        },
    );

    assert_eq!(program.run_unsafe(), Ok(3));
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}
