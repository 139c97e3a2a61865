//! Error types for the effect system.
//!
//! This module provides [`FxError`], the single failure channel of an
//! [`Fx`](super::Fx) computation, together with the panic-capture helpers
//! used at every composition boundary.
//!
//! # Failure kinds
//!
//! 1. **Declared failure** — raised explicitly with
//!    [`Fx::raise_error`](super::Fx::raise_error) and carried as
//!    [`FxError::Raised`]. It propagates until a recovery combinator catches
//!    it or it escapes through an entry point.
//! 2. **Synchronous panic** — a panic thrown from a producer or a
//!    transformation. If its payload is a `&str` or `String` message it is
//!    classified non-fatal, captured as [`FxError::Panicked`], and flows
//!    through the same channel as declared failures. Any other payload is
//!    fatal and is re-raised with [`std::panic::resume_unwind`]; recovering
//!    from fatal panics is deliberately unsupported.
//! 3. **Cancellation** — the designated sentinel [`FxError::Canceled`],
//!    delivered when a computation observes its cancellation token.
//!    Cancellation-aware code branches on it via [`FxError::is_canceled`].

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;

/// The failure channel of an [`Fx`](super::Fx) computation.
///
/// The error value is cheap to clone: declared failures hold their source
/// behind an `Arc`, and panic messages are shared `Arc<str>` slices. Cloning
/// matters because a single failure may be delivered to several observers
/// (for example every pending `join` of a failed fiber).
///
/// # Examples
///
/// ```rust
/// use fxcore::fx::FxError;
///
/// let error = FxError::raised(std::io::Error::other("disk on fire"));
/// assert!(!error.is_canceled());
/// assert_eq!(format!("{error}"), "disk on fire");
///
/// assert!(FxError::Canceled.is_canceled());
/// ```
#[derive(Clone)]
pub enum FxError {
    /// A failure raised explicitly through the effect's error channel.
    Raised(Arc<dyn Error + Send + Sync>),
    /// A non-fatal panic captured at a composition boundary.
    ///
    /// Holds the panic message. Only panics whose payload is a `&str` or a
    /// `String` end up here; anything else is considered fatal.
    Panicked(Arc<str>),
    /// The cancellation sentinel.
    ///
    /// Signals that the computation was interrupted by its cancellation
    /// token rather than finishing with a value or an ordinary failure.
    Canceled,
}

impl FxError {
    /// Wraps an ordinary error value as a declared failure.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fxcore::fx::FxError;
    ///
    /// let error = FxError::raised(std::io::Error::other("boom"));
    /// assert_eq!(format!("{error}"), "boom");
    /// ```
    pub fn raised<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Raised(Arc::new(error))
    }

    /// Returns `true` when this error is the cancellation sentinel.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Returns `true` when this error is a captured panic.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}

impl fmt::Display for FxError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raised(error) => write!(formatter, "{error}"),
            Self::Panicked(message) => write!(formatter, "panicked: {message}"),
            Self::Canceled => write!(formatter, "computation canceled"),
        }
    }
}

impl fmt::Debug for FxError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raised(error) => formatter.debug_tuple("Raised").field(&error.to_string()).finish(),
            Self::Panicked(message) => formatter.debug_tuple("Panicked").field(message).finish(),
            Self::Canceled => formatter.write_str("Canceled"),
        }
    }
}

impl PartialEq for FxError {
    /// Compares by variant, using the rendered message for `Raised` since
    /// trait objects themselves cannot be compared.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Raised(left), Self::Raised(right)) => left.to_string() == right.to_string(),
            (Self::Panicked(left), Self::Panicked(right)) => left == right,
            (Self::Canceled, Self::Canceled) => true,
            _ => false,
        }
    }
}

impl Error for FxError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Raised(error) => Some(error.as_ref()),
            _ => None,
        }
    }
}

/// Payload used for internal invariant violations.
///
/// A `Defect` panic deliberately carries a non-string payload so the
/// non-fatal classification in [`panic_to_error`] never converts it into a
/// recoverable [`FxError`]: an invariant violation is an implementation bug
/// and must crash.
pub(crate) struct Defect(pub(crate) &'static str);

impl fmt::Debug for Defect {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "fxcore bug: {}", self.0)
    }
}

/// Classifies a caught panic payload.
///
/// `&str` and `String` payloads are the message-carrying panics ordinary
/// code produces; they convert to [`FxError::Panicked`]. Every other payload
/// (including [`Defect`]) is fatal and resumes unwinding.
pub(crate) fn panic_to_error(payload: Box<dyn Any + Send>) -> FxError {
    if let Some(message) = payload.downcast_ref::<&str>() {
        FxError::Panicked(Arc::from(*message))
    } else if let Some(message) = payload.downcast_ref::<String>() {
        FxError::Panicked(Arc::from(message.as_str()))
    } else {
        resume_unwind(payload)
    }
}

/// Runs a closure, converting a non-fatal panic into an [`FxError`].
///
/// Fatal panics (non-message payloads) propagate unchanged.
pub(crate) fn catch_non_fatal<T>(body: impl FnOnce() -> T) -> Result<T, FxError> {
    catch_unwind(AssertUnwindSafe(body)).map_err(panic_to_error)
}
