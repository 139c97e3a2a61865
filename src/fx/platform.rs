//! Platform constants and the at-most-once callback adapter.

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::concurrent::Connection;
use crate::fx::FxError;
use crate::fx::node::{Erased, NodeCallback};

/// Maximum number of consecutive eager fusions (`Pure` maps, fused binds)
/// applied without yielding to the run loop.
///
/// Reaching this depth forces the next composition to go through the run
/// loop, bounding native call-stack growth independently of program size.
pub const FUSION_DEPTH: u32 = 127;

/// An at-most-once completion handle for asynchronous registrations.
///
/// The callback handed to [`Fx::async_`](super::Fx::async_) and
/// [`Fx::async_f`](super::Fx::async_f) registrations. The first call to
/// [`complete`](Self::complete) delivers the result; later or duplicate
/// calls are silently ignored. The handle is `Clone` so a registration can
/// wire it into several possible completion paths (success, error, timer)
/// without coordination.
///
/// A token-aware handle (created for `async_f`) additionally drops a late
/// completion when its connection has already been canceled, so a result
/// racing a cancellation never reaches the caller.
pub struct AsyncCallback<A> {
    slot: Arc<Mutex<Option<NodeCallback>>>,
    gate: Option<Connection>,
    _marker: PhantomData<fn(A)>,
}

impl<A> Clone for AsyncCallback<A> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            gate: self.gate.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A: Send + 'static> AsyncCallback<A> {
    /// Wraps a raw run-loop callback into an at-most-once handle.
    pub(crate) fn new(callback: NodeCallback) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(callback))),
            gate: None,
            _marker: PhantomData,
        }
    }

    /// Like [`new`](Self::new), but ignores completions arriving after
    /// `connection` has been canceled.
    pub(crate) fn gated(connection: Connection, callback: NodeCallback) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(callback))),
            gate: Some(connection),
            _marker: PhantomData,
        }
    }

    /// Delivers the result of the asynchronous computation.
    ///
    /// Only the first call has any effect. When the handle is token-aware
    /// and its connection is already canceled, the result is discarded.
    pub fn complete(&self, result: Result<A, FxError>) {
        if let Some(gate) = &self.gate
            && gate.is_canceled()
        {
            return;
        }
        if let Some(callback) = self.slot.lock().take() {
            callback(result.map(|value| Box::new(value) as Erased));
        }
    }

    /// Returns `true` once a result has been delivered.
    ///
    /// A completion discarded by the cancellation gate does not count as
    /// delivered: the slot stays occupied and this keeps returning `false`.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.slot.lock().is_none()
    }
}
