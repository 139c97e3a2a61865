//! # fxcore
//!
//! A purely functional effect system for Rust: lazy, composable, cancelable
//! computations with guaranteed resource safety.
//!
//! ## Overview
//!
//! The central type is [`fx::Fx`], a value describing a computation that
//! may suspend, fail, or complete asynchronously. Nothing runs until one of
//! the `run_unsafe*` entry points is called at the program's edge. On top
//! of that value the library provides:
//!
//! - **Stack-safe composition**: `map`/`flat_map` chains of any depth,
//!   flattened by fusion and an iterative run loop
//! - **Error channel**: declared failures, captured panics, and a
//!   cancellation sentinel, with `attempt`/`handle_error` recovery
//! - **Cooperative cancellation**: LIFO cancel-effect tokens, maskable
//!   with `uncancelable`
//! - **Resource safety**: `bracket`/`guarantee` with exactly-once release
//!   under success, failure, and cancellation
//! - **Concurrency**: `fork`/`join` fibers on pluggable schedulers, and an
//!   async bridge for callback-based APIs
//!
//! ## Example
//!
//! ```rust
//! use fxcore::prelude::*;
//!
//! let program = Fx::pure(20)
//!     .map(|x| x * 2)
//!     .flat_map(|x| Fx::new(move || x + 2));
//!
//! assert_eq!(program.run_unsafe(), Ok(42));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Note: Disabling redundant_closure_for_method_calls due to clippy 0.1.92 panic bug
#![allow(clippy::redundant_closure_for_method_calls)]

/// Prelude module for convenient imports.
///
/// Re-exports commonly used types and traits.
///
/// # Usage
///
/// ```rust
/// use fxcore::prelude::*;
/// ```
pub mod prelude {
    pub use crate::concurrent::{Connection, Disposable, Fiber, Immediate, Scheduler, ThreadPool};
    pub use crate::fx::{AsyncCallback, ExitCase, Fx, FxError};
}

pub mod concurrent;
pub mod fx;
