//! The cancellation token: a LIFO stack of cancel effects.
//!
//! A [`Connection`] scopes the interruptibility of a running computation.
//! Code that acquires something cancel-sensitive pushes a cancel effect;
//! code that finishes cleanly pops it again. Canceling the connection is
//! idempotent and drains the stack last-in-first-out, running each effect
//! to completion.
//!
//! The distinguished [`Connection::uncancelable`] instance is shared and
//! immutable: push and pop are no-ops, cancel does nothing, and
//! [`is_canceled`](Connection::is_canceled) is always `false`. The run loop
//! installs it around windows that must not observe outside cancel signals
//! (brackets, [`Fx::uncancelable`](crate::fx::Fx::uncancelable)).
//!
//! # Shared-state policy
//!
//! The action stack is one of the two places in the crate where mutable
//! state genuinely crosses thread boundaries (the other is the
//! single-assignment promise), so it lives behind a `parking_lot` mutex.
//! Pushing onto an already-canceled connection runs the pushed effect
//! immediately instead of enqueueing it: a cleanup action registered after
//! the fact must still happen, and this is the policy the crate documents
//! and tests rather than leaving the race unspecified.

use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::fx::Fx;
use crate::fx::node::Node;
use crate::fx::runloop;

/// The shared uncancelable instance.
static UNCANCELABLE: LazyLock<Connection> = LazyLock::new(|| Connection {
    inner: Arc::new(Inner::Uncancelable),
});

/// A cancellation token: a shareable handle to a LIFO stack of cancel
/// effects.
///
/// Cloning is cheap and shares the underlying stack; canceling any clone
/// cancels them all.
///
/// # Examples
///
/// ```rust
/// use fxcore::concurrent::Connection;
/// use fxcore::fx::Fx;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// let connection = Connection::new();
/// let released = Arc::new(AtomicBool::new(false));
/// let flag = released.clone();
///
/// connection.push(Fx::new(move || flag.store(true, Ordering::SeqCst)));
/// assert!(!connection.is_canceled());
///
/// connection.cancel().run_unsafe().unwrap();
/// assert!(connection.is_canceled());
/// assert!(released.load(Ordering::SeqCst));
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

enum Inner {
    /// Push/pop/cancel are no-ops; never reports canceled.
    Uncancelable,
    Cancelable(Mutex<State>),
}

struct State {
    canceled: bool,
    actions: SmallVec<[Node; 2]>,
}

impl Connection {
    /// Creates a fresh cancelable connection with an empty action stack.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::Cancelable(Mutex::new(State {
                canceled: false,
                actions: SmallVec::new(),
            }))),
        }
    }

    /// Returns the shared uncancelable instance.
    #[must_use]
    pub fn uncancelable() -> Self {
        UNCANCELABLE.clone()
    }

    /// Returns `true` when this connection has been canceled.
    ///
    /// The uncancelable instance never reports canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        match &*self.inner {
            Inner::Uncancelable => false,
            Inner::Cancelable(state) => state.lock().canceled,
        }
    }

    /// Pushes a cancel effect onto the stack.
    ///
    /// If the connection is already canceled the effect runs immediately on
    /// the calling thread (see the module policy note). No-op on the
    /// uncancelable instance.
    pub fn push(&self, action: Fx<()>) {
        self.push_node(action.into_node());
    }

    /// Pops the most recently pushed cancel effect without running it.
    ///
    /// No-op on the uncancelable instance or an empty stack.
    pub fn pop(&self) {
        if let Inner::Cancelable(state) = &*self.inner {
            state.lock().actions.pop();
        }
    }

    /// Returns the cancel effect of this connection.
    ///
    /// Running the returned effect cancels the connection: it marks it
    /// canceled (idempotently) and drains the action stack LIFO, running
    /// each effect to completion before the next.
    #[must_use]
    pub fn cancel(&self) -> Fx<()> {
        let connection = self.clone();
        Fx::new(move || connection.cancel_now())
    }

    /// Adapts this connection to an imperative disposer.
    #[must_use]
    pub fn to_disposable(&self) -> Disposable {
        Disposable {
            connection: self.clone(),
        }
    }

    /// Internal: push an already-erased node.
    pub(crate) fn push_node(&self, action: Node) {
        match &*self.inner {
            Inner::Uncancelable => {}
            Inner::Cancelable(state) => {
                let pending = {
                    let mut guard = state.lock();
                    if guard.canceled {
                        Some(action)
                    } else {
                        guard.actions.push(action);
                        None
                    }
                };
                if let Some(action) = pending {
                    // Late registration on a canceled connection: run the
                    // cleanup immediately, outcome ignored.
                    let _ = runloop::run_sync(action);
                }
            }
        }
    }

    /// Internal: the node form of [`cancel`](Self::cancel), for wiring into
    /// other connections without the typed wrapper.
    pub(crate) fn cancel_node(&self) -> Node {
        let connection = self.clone();
        Node::Single(Box::new(move || {
            connection.cancel_now();
            Box::new(())
        }))
    }

    /// Internal: synchronous cancellation.
    ///
    /// Marks the connection canceled, then drains the stack. The lock is
    /// released while each effect runs, so effects may themselves push
    /// (self-executing, per the module policy) or cancel linked
    /// connections; cycles terminate because every connection marks itself
    /// canceled before draining and each action is popped before it runs.
    pub(crate) fn cancel_now(&self) {
        if let Inner::Cancelable(state) = &*self.inner {
            loop {
                let action = {
                    let mut guard = state.lock();
                    guard.canceled = true;
                    guard.actions.pop()
                };
                match action {
                    Some(node) => {
                        // Cleanup failures have nowhere to propagate.
                        let _ = runloop::run_sync(node);
                    }
                    None => break,
                }
            }
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

/// An imperative handle that cancels its connection when invoked.
///
/// Returned by
/// [`Fx::run_unsafe_cancelable`](crate::fx::Fx::run_unsafe_cancelable).
pub struct Disposable {
    connection: Connection,
}

impl Disposable {
    /// Cancels the underlying connection, cascading to every cancel effect
    /// pushed during execution. Idempotent.
    pub fn dispose(&self) {
        self.connection.cancel_now();
    }
}
