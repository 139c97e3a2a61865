//! Concurrency primitives backing the effect system.
//!
//! Three collaborators with fixed contracts live here:
//!
//! - [`Connection`]: the cancellation token — a LIFO stack of cancel
//!   effects scoping a computation's interruptibility.
//! - [`Promise`]: the single-assignment cell used to join fibers.
//! - [`Scheduler`] (with [`ThreadPool`] and [`Immediate`]): opaque
//!   execution contexts for [`Fx::fork`](crate::fx::Fx::fork) and
//!   [`Fx::continue_on`](crate::fx::Fx::continue_on).
//!
//! [`Fiber`] combines the first two into a joinable, cancelable handle.
//!
//! These are the only places in the crate where mutable state crosses
//! thread boundaries; everything else mutates nodes it exclusively owns.

// =============================================================================
// Cancellation
// =============================================================================

mod connection;

pub use connection::{Connection, Disposable};

// =============================================================================
// Fiber Plumbing
// =============================================================================

mod fiber;
mod promise;

pub use fiber::Fiber;
pub use promise::{CallbackId, Promise};

// =============================================================================
// Scheduling Contexts
// =============================================================================

mod scheduler;

pub use scheduler::{Immediate, PoolError, Scheduler, Task, ThreadPool};
