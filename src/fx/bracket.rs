//! Resource-safe acquisition: `bracket_case` and exit signals.
//!
//! The bracket discipline: acquire runs once, shielded from cancellation;
//! `use` runs with the acquired resource under the caller's token; release
//! runs exactly once with an [`ExitCase`] describing how `use` ended —
//! completed, failed, or canceled — no matter which way it ended. The
//! overall outcome matches `use`'s outcome, except cancellation always
//! overrides.
//!
//! Exactly-once release under concurrent cancellation is enforced by a
//! forward-release state machine ([`ReleaseGuard`]): a cancellation hook is
//! pushed on the caller's token *before* acquire starts, and is armed with
//! the resource the instant acquire settles (still inside acquire's
//! uncancelable window). A cancel that drains the hook before arming
//! leaves a marker; arming then runs the release itself. Every transition
//! happens under one lock, so exactly one path ever takes the release
//! function.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::concurrent::Connection;
use crate::fx::Fx;
use crate::fx::error::FxError;
use crate::fx::node::Node;
use crate::fx::runloop;

/// How a bracketed `use` computation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitCase {
    /// `use` produced a value.
    Completed,
    /// `use` failed with the carried error.
    Failed(FxError),
    /// The computation was canceled before `use` settled.
    Canceled,
}

enum ReleaseState<A, R> {
    /// Acquire still running; no resource to release yet.
    Pending(R),
    /// The token fired before acquire settled; arming must release.
    EarlyCancel(R),
    /// Resource acquired; the hook or the completion path will release.
    Armed(R, A),
    /// Release has been taken by exactly one path.
    Done,
}

/// The take-once owner of the release function and the resource.
struct ReleaseGuard<A, R> {
    state: Mutex<ReleaseState<A, R>>,
}

impl<A, R> ReleaseGuard<A, R>
where
    A: Clone + Send + 'static,
    R: FnOnce(A, ExitCase) -> Fx<()> + Send + 'static,
{
    fn new(release: R) -> Self {
        Self {
            state: Mutex::new(ReleaseState::Pending(release)),
        }
    }

    /// The cancellation-hook path. Runs the release synchronously when a
    /// resource is armed; otherwise records that cancellation came first.
    fn on_cancel(&self) {
        let mut guard = self.state.lock();
        match std::mem::replace(&mut *guard, ReleaseState::Done) {
            ReleaseState::Pending(release) => {
                *guard = ReleaseState::EarlyCancel(release);
            }
            ReleaseState::Armed(release, resource) => {
                drop(guard);
                let _ = runloop::run_sync(release(resource, ExitCase::Canceled).into_node());
            }
            ReleaseState::EarlyCancel(release) => {
                // Cancel drained twice before arming; keep waiting.
                *guard = ReleaseState::EarlyCancel(release);
            }
            ReleaseState::Done => {}
        }
    }

    /// Arms the guard with the acquired resource. Called inside acquire's
    /// uncancelable window; if cancellation already fired, releases now.
    fn arm(&self, resource: A) {
        let mut guard = self.state.lock();
        match std::mem::replace(&mut *guard, ReleaseState::Done) {
            ReleaseState::Pending(release) => {
                *guard = ReleaseState::Armed(release, resource);
            }
            ReleaseState::EarlyCancel(release) => {
                drop(guard);
                let _ = runloop::run_sync(release(resource, ExitCase::Canceled).into_node());
            }
            other => {
                *guard = other;
            }
        }
    }

    /// The normal completion path: returns the release effect, or a no-op
    /// when cancellation already released.
    fn release_effect(&self, exit: ExitCase) -> Fx<()> {
        let mut guard = self.state.lock();
        match std::mem::replace(&mut *guard, ReleaseState::Done) {
            ReleaseState::Armed(release, resource) => release(resource, exit),
            other => {
                *guard = other;
                Fx::unit()
            }
        }
    }
}

/// See [`Fx::bracket_case`] for the public contract.
pub(crate) fn bracket_case<A, B, U, R>(acquire: Fx<A>, use_: U, release: R) -> Fx<B>
where
    A: Clone + Send + 'static,
    B: Send + 'static,
    U: FnOnce(A) -> Fx<B> + Send + 'static,
    R: FnOnce(A, ExitCase) -> Fx<()> + Send + 'static,
{
    let guard = Arc::new(ReleaseGuard::new(release));
    Fx::from_node(Node::Async {
        register: Box::new(move |connection: &Connection, callback| {
            let hook_guard = Arc::clone(&guard);
            connection.push_node(Node::Single(Box::new(move || {
                hook_guard.on_cancel();
                Box::new(())
            })));

            let arm_guard = Arc::clone(&guard);
            let complete_guard = Arc::clone(&guard);
            let program = acquire
                .map(move |resource: A| {
                    arm_guard.arm(resource.clone());
                    resource
                })
                .uncancelable()
                .flat_map(move |resource| {
                    Fx::defer(move || use_(resource)).attempt().flat_map(
                        move |outcome: Result<B, FxError>| {
                            let exit = match &outcome {
                                Ok(_) => ExitCase::Completed,
                                Err(error) if error.is_canceled() => ExitCase::Canceled,
                                Err(error) => ExitCase::Failed(error.clone()),
                            };
                            // Release is shielded from external cancellation
                            // for its own execution window.
                            complete_guard
                                .release_effect(exit)
                                .uncancelable()
                                .flat_map(move |()| match outcome {
                                    Ok(value) => Fx::pure(value),
                                    Err(error) => Fx::raise_error(error),
                                })
                        },
                    )
                });

            let settle_connection = connection.clone();
            runloop::start_cancelable(
                program.into_node(),
                connection.clone(),
                Box::new(move |outcome| {
                    // Normal settlement: drop the cancellation hook.
                    settle_connection.pop();
                    callback(outcome);
                }),
            );
        }),
    })
}
