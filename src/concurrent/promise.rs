//! The single-assignment promise used to join fibers.
//!
//! A [`Promise`] is a write-once cell completed from exactly one producer
//! side (first write wins — a documented policy, not an accident) and read
//! by any number of consumers, each registering a callback. It is the
//! second of the crate's two genuinely cross-thread mutable primitives, so
//! its state lives behind a `parking_lot` mutex; callbacks always run
//! outside the lock.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::fx::FxError;

type Waiter<T> = Box<dyn FnOnce(Result<T, FxError>) + Send>;

/// Identifies a registered callback for best-effort deregistration.
///
/// Rust closures cannot be compared, so [`Promise::get`] hands back an id
/// and [`Promise::remove`] takes it — the idiomatic rendering of
/// remove-by-reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackId(u64);

enum State<T> {
    Pending(Vec<(CallbackId, Waiter<T>)>),
    Complete(Result<T, FxError>),
}

/// A single-assignment result cell.
///
/// The result type must be `Clone` because one completion may be delivered
/// to several registered readers (every pending `join` of the same fiber).
///
/// # Examples
///
/// ```rust
/// use fxcore::concurrent::Promise;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicI32, Ordering};
///
/// let promise = Promise::new();
/// let seen = Arc::new(AtomicI32::new(0));
/// let sink = seen.clone();
///
/// promise.get(Box::new(move |result: Result<i32, _>| {
///     sink.store(result.unwrap(), Ordering::SeqCst);
/// }));
///
/// assert!(promise.complete(Ok(42)));
/// assert!(!promise.complete(Ok(7))); // first write wins
/// assert_eq!(seen.load(Ordering::SeqCst), 42);
/// ```
pub struct Promise<T> {
    state: Mutex<State<T>>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Creates an empty promise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Pending(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Completes the promise, waking every registered reader.
    ///
    /// Returns `true` when this call performed the assignment. A later call
    /// finds the cell already complete, drops its result, and returns
    /// `false` — first write wins.
    pub fn complete(&self, result: Result<T, FxError>) -> bool {
        let waiters = {
            let mut guard = self.state.lock();
            match &mut *guard {
                State::Complete(_) => return false,
                State::Pending(waiters) => {
                    let waiters = std::mem::take(waiters);
                    *guard = State::Complete(result.clone());
                    waiters
                }
            }
        };
        for (_, waiter) in waiters {
            waiter(result.clone());
        }
        true
    }

    /// Registers a reader.
    ///
    /// If the promise is already complete the callback fires immediately on
    /// the calling thread; otherwise it fires on whichever thread completes
    /// the promise. The returned id allows best-effort removal.
    pub fn get(&self, callback: Waiter<T>) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.state.lock();
        match &mut *guard {
            State::Complete(result) => {
                let result = result.clone();
                drop(guard);
                callback(result);
            }
            State::Pending(waiters) => waiters.push((id, callback)),
        }
        id
    }

    /// Deregisters a reader. Best-effort: a callback already fired (or
    /// firing concurrently) is not recalled.
    pub fn remove(&self, id: CallbackId) {
        if let State::Pending(waiters) = &mut *self.state.lock() {
            waiters.retain(|(registered, _)| *registered != id);
        }
    }

    /// Returns `true` once a result has been assigned.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(&*self.state.lock(), State::Complete(_))
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI32, AtomicU32};

    #[test]
    fn test_first_write_wins() {
        let promise = Promise::new();
        assert!(promise.complete(Ok(1)));
        assert!(!promise.complete(Ok(2)));
        assert!(!promise.complete(Err(FxError::Canceled)));
        assert!(promise.is_complete());
    }

    #[test]
    fn test_get_after_completion_fires_immediately() {
        let promise = Promise::new();
        promise.complete(Ok(41));

        let seen = Arc::new(AtomicI32::new(0));
        let sink = seen.clone();
        promise.get(Box::new(move |result| {
            sink.store(result.unwrap_or(-1), Ordering::SeqCst);
        }));
        assert_eq!(seen.load(Ordering::SeqCst), 41);
    }

    #[test]
    fn test_every_registered_reader_is_woken() {
        let promise = Promise::new();
        let fired = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let counter = fired.clone();
            promise.get(Box::new(move |_result: Result<i32, FxError>| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        promise.complete(Ok(7));
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_remove_deregisters_pending_callback() {
        let promise = Promise::new();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        let id = promise.get(Box::new(move |_result: Result<i32, FxError>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        promise.remove(id);
        promise.complete(Ok(7));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
