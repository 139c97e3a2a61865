//! Fibers: lightweight, cancelable, joinable units of evaluation.
//!
//! A [`Fiber`] is the handle returned by [`Fx::fork`](crate::fx::Fx::fork).
//! It pairs the fiber's single-assignment [`Promise`] with its cancellation
//! [`Connection`]; `join` and `cancel` are effects built from those two
//! pieces, so the handle itself is freely shareable and a fresh `join`
//! effect can be constructed any number of times.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::concurrent::connection::Connection;
use crate::concurrent::promise::{CallbackId, Promise};
use crate::fx::Fx;
use crate::fx::FxError;
use crate::fx::node::{Erased, Node};

/// A running computation that can be joined or canceled.
///
/// The fiber completes exactly once, with a value or an error; canceling it
/// before completion makes every `join` observe the cancellation sentinel.
/// Its token is linked bidirectionally with the forking computation's
/// token, so cancellation cascades either way.
///
/// `A: Clone` because one completion may be observed by several joins.
pub struct Fiber<A> {
    promise: Arc<Promise<A>>,
    connection: Connection,
}

impl<A: Clone + Send + 'static> Fiber<A> {
    pub(crate) fn new(promise: Arc<Promise<A>>, connection: Connection) -> Self {
        Self {
            promise,
            connection,
        }
    }

    /// An effect that waits for the fiber's outcome.
    ///
    /// Joining an already-completed fiber settles immediately. Canceling
    /// the joining computation deregisters it from the fiber's promise;
    /// canceling the fiber delivers [`FxError::Canceled`] to the join.
    #[must_use]
    pub fn join(&self) -> Fx<A> {
        let promise = Arc::clone(&self.promise);
        let fiber_connection = self.connection.clone();
        Fx::from_node(Node::Async {
            register: Box::new(move |join_connection: &Connection, callback| {
                let registration: Arc<Mutex<Option<CallbackId>>> = Arc::new(Mutex::new(None));

                // Canceling the joiner must stop it observing the promise.
                let cleanup_promise = Arc::clone(&promise);
                let cleanup_slot = Arc::clone(&registration);
                join_connection.push_node(Node::Single(Box::new(move || {
                    if let Some(id) = cleanup_slot.lock().take() {
                        cleanup_promise.remove(id);
                    }
                    Box::new(())
                })));

                // Canceling the fiber interrupts the joiner.
                fiber_connection.push_node(join_connection.cancel_node());

                let join_side = join_connection.clone();
                let fiber_side = fiber_connection.clone();
                let id = promise.get(Box::new(move |result: Result<A, FxError>| {
                    callback(result.map(|value| Box::new(value) as Erased));
                    join_side.pop();
                    fiber_side.pop();
                }));
                *registration.lock() = Some(id);
            }),
        })
    }

    /// An effect that cancels the fiber.
    ///
    /// Idempotent; running it drains the fiber token's cancel stack, which
    /// cascades to the linked parent token.
    #[must_use]
    pub fn cancel(&self) -> Fx<()> {
        self.connection.cancel()
    }

    /// Returns `true` once the fiber has settled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.promise.is_complete()
    }
}
