//! The run loop: an iterative stepper driving a node graph to completion.
//!
//! The loop owns three pieces of state: the node currently being evaluated,
//! an explicit frame stack (the data-structure rendering of what would
//! otherwise be native call-stack frames), and the active cancellation
//! token. Every composite shape is unfolded by pushing a frame and
//! descending into its source; terminal shapes settle an outcome that
//! unwinds the stack until a frame consumes it or the stack empties and the
//! terminal callback fires — exactly once per started loop.
//!
//! Recursion never tracks composition depth: like
//! `Trampoline::run`, the loop converts nesting into iteration. The only
//! place the loop leaves the thread is an `Async` node, where the remaining
//! frame stack parks in a shared cell and evaluation continues on whichever
//! thread completes the registration. A registration that completes before
//! returning hands its outcome straight back to the loop instead, so a
//! chain of synchronously completing registrations iterates like any other
//! composition and never grows the native stack.
//!
//! The active token is checked before each step; a canceled token
//! short-circuits the loop with the cancellation sentinel without running
//! any further user code.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

use crate::concurrent::Connection;
use crate::fx::error::{self, FxError};
use crate::fx::node::{
    Continuation, Erased, Node, NodeCallback, Outcome, RestoreFn, apply_stages,
};

/// A suspended piece of the evaluation, waiting for the current source to
/// settle.
enum Frame {
    /// A `FlatMap` continuation (bind, recover, or attempt).
    Continue(Continuation),
    /// Restores the cancellation token installed by a `ConnectionSwitch`.
    Restore {
        restore: RestoreFn,
        previous: Connection,
    },
}

/// What unwinding the frame stack produced.
enum Unwound {
    /// A frame consumed the outcome; evaluation continues with this node.
    Next(Node),
    /// The stack is empty; this is the loop's terminal outcome.
    Done(Outcome),
}

/// Where an `Async` registration stands relative to the loop that issued it.
///
/// Both sides transition it under one lock: the resume callback and the loop
/// race, and whichever arrives second carries the evaluation forward.
enum Suspension {
    /// `register` has not returned and no completion has arrived.
    Registering,
    /// The completion arrived while `register` was still running on the
    /// loop's thread; the loop picks it up and keeps iterating.
    Finished(Outcome),
    /// `register` returned without completing; the loop state waits here
    /// for the completion to resume it.
    Parked {
        stack: Vec<Frame>,
        connection: Connection,
        callback: NodeCallback,
    },
    /// The handoff happened; a late duplicate fire finds nothing to do.
    Settled,
}

/// Starts the loop under the uncancelable token.
pub(crate) fn start(node: Node, callback: NodeCallback) {
    execute(node, Vec::new(), Connection::uncancelable(), callback);
}

/// Starts the loop bound to `connection`; cancellation of that token
/// short-circuits evaluation with [`FxError::Canceled`].
pub(crate) fn start_cancelable(node: Node, connection: Connection, callback: NodeCallback) {
    execute(node, Vec::new(), connection, callback);
}

/// Runs a node to completion on the calling thread.
///
/// `Pure` and `RaiseError` settle without touching the loop. Anything else
/// starts the loop and parks the calling thread on a condition variable
/// until the terminal callback fires; an async completion arriving from
/// another thread wakes it. This is the dispatch seam every delegating
/// shape reduces through, and the cooperative replacement for a spin wait.
pub(crate) fn run_sync(node: Node) -> Outcome {
    match node {
        Node::Pure { value, .. } => Ok(value),
        Node::RaiseError(error) => Err(error),
        node => {
            let cell = Arc::new((Mutex::new(None::<Outcome>), Condvar::new()));
            let completion = Arc::clone(&cell);
            start(
                node,
                Box::new(move |outcome| {
                    let (slot, signal) = &*completion;
                    *slot.lock() = Some(outcome);
                    signal.notify_one();
                }),
            );
            let (slot, signal) = &*cell;
            let mut guard = slot.lock();
            loop {
                if let Some(outcome) = guard.take() {
                    return outcome;
                }
                signal.wait(&mut guard);
            }
        }
    }
}

/// The evaluation loop proper.
fn execute(node: Node, stack: Vec<Frame>, connection: Connection, callback: NodeCallback) {
    let mut node = node;
    let mut stack = stack;
    let mut connection = connection;
    loop {
        if connection.is_canceled() {
            callback(Err(FxError::Canceled));
            return;
        }
        match node {
            Node::Pure { value, .. } => {
                match unwind(Ok(value), &mut stack, &mut connection) {
                    Unwound::Next(next) => node = next,
                    Unwound::Done(outcome) => {
                        callback(outcome);
                        return;
                    }
                }
            }
            Node::RaiseError(error) => {
                match unwind(Err(error), &mut stack, &mut connection) {
                    Unwound::Next(next) => node = next,
                    Unwound::Done(outcome) => {
                        callback(outcome);
                        return;
                    }
                }
            }
            Node::Single(thunk) => {
                node = match error::catch_non_fatal(thunk) {
                    Ok(value) => Node::pure(value),
                    Err(error) => Node::RaiseError(error),
                };
            }
            Node::Map { source, stages } => {
                stack.push(Frame::Continue(Continuation::Bind(Box::new(move |value| {
                    Node::pure(apply_stages(stages, value))
                }))));
                node = *source;
            }
            Node::FlatMap {
                source,
                continuation,
                ..
            } => {
                stack.push(Frame::Continue(continuation));
                node = *source;
            }
            Node::ConnectionSwitch {
                source,
                modify,
                restore,
            } => {
                let previous = connection.clone();
                connection = modify(previous.clone());
                if let Some(restore) = restore {
                    stack.push(Frame::Restore { restore, previous });
                }
                node = *source;
            }
            Node::Async { register } => {
                let cell = Arc::new(Mutex::new(Suspension::Registering));
                let fire = Arc::clone(&cell);
                let resume: NodeCallback = Box::new(move |outcome| {
                    let (stack, connection, callback) = {
                        let mut guard = fire.lock();
                        match std::mem::replace(&mut *guard, Suspension::Settled) {
                            Suspension::Registering => {
                                *guard = Suspension::Finished(outcome);
                                return;
                            }
                            Suspension::Parked {
                                stack,
                                connection,
                                callback,
                            } => (stack, connection, callback),
                            Suspension::Finished(_) | Suspension::Settled => return,
                        }
                    };
                    execute(Node::from_outcome(outcome), stack, connection, callback);
                });
                register(&connection, resume);
                let mut guard = cell.lock();
                match std::mem::replace(&mut *guard, Suspension::Settled) {
                    // The registration completed on this thread: keep
                    // iterating instead of recursing, so a chain of
                    // synchronously completing registrations stays on a
                    // bounded native stack.
                    Suspension::Finished(outcome) => {
                        drop(guard);
                        node = Node::from_outcome(outcome);
                    }
                    Suspension::Registering => {
                        *guard = Suspension::Parked {
                            stack,
                            connection,
                            callback,
                        };
                        return;
                    }
                    Suspension::Parked { .. } | Suspension::Settled => return,
                }
            }
        }
    }
}

/// Unwinds the frame stack with a settled outcome.
///
/// Successes look for the next bind (recovery frames are transparent);
/// failures skip binds until a recovery or attempt frame absorbs them.
/// Restore frames run on both paths so a swapped token is always put back.
fn unwind(outcome: Outcome, stack: &mut Vec<Frame>, connection: &mut Connection) -> Unwound {
    let mut outcome = outcome;
    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Continue(Continuation::Bind(bind)) => match outcome {
                Ok(value) => return Unwound::Next(apply(move || bind(value))),
                Err(error) => outcome = Err(error),
            },
            Frame::Continue(Continuation::Recover(recover)) => match outcome {
                Ok(value) => outcome = Ok(value),
                Err(error) => return Unwound::Next(apply(move || recover(error))),
            },
            Frame::Continue(Continuation::Attempt) => {
                outcome = Ok(Box::new(outcome) as Erased);
            }
            Frame::Restore { restore, previous } => {
                let current = connection.clone();
                *connection = restore(&outcome, previous, current);
            }
        }
    }
    Unwound::Done(outcome)
}

/// Invokes a continuation, catching non-fatal panics into the error channel.
fn apply(produce: impl FnOnce() -> Node) -> Node {
    match error::catch_non_fatal(produce) {
        Ok(node) => node,
        Err(error) => Node::RaiseError(error),
    }
}
