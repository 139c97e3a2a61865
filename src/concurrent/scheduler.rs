//! Scheduling contexts for `continue_on` and `fork`.
//!
//! A [`Scheduler`] is an opaque execution context: the effect system only
//! ever asks it to run a boxed task. The crate ships two implementations —
//! a fixed-size [`ThreadPool`] for real concurrency and [`Immediate`],
//! which runs tasks inline on the calling thread (useful in tests and for
//! single-threaded drivers).
//!
//! # Design
//!
//! The pool enforces a fixed worker count decided at construction
//! (defaulting to the number of logical CPUs). Tasks are queued FIFO behind
//! a mutex and picked up by parked workers through a condition variable.
//! Dropping the pool signals shutdown: workers finish the queued backlog
//! and exit; tasks submitted after shutdown are dropped.

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};

/// A unit of work handed to a scheduler.
pub type Task = Box<dyn FnOnce() + Send>;

/// An opaque execution context.
///
/// Implementations must accept tasks from any thread. No ordering is
/// guaranteed between tasks beyond what the implementation provides.
pub trait Scheduler: Send + Sync {
    /// Runs `task`, now or later, on some thread.
    fn execute(&self, task: Task);
}

/// Errors that can occur when constructing a [`ThreadPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The worker count was set to zero.
    ///
    /// A pool must have at least one worker thread.
    InvalidCapacity,
}

impl fmt::Display for PoolError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCapacity => {
                write!(formatter, "pool capacity must be greater than 0")
            }
        }
    }
}

impl Error for PoolError {}

struct PoolState {
    queue: VecDeque<Task>,
    shutdown: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    available: Condvar,
}

/// A fixed-size worker pool.
///
/// # Examples
///
/// ```rust
/// use fxcore::concurrent::{Scheduler, ThreadPool};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// let pool = ThreadPool::new(2).unwrap();
/// let ran = Arc::new(AtomicBool::new(false));
/// let flag = ran.clone();
///
/// pool.execute(Box::new(move || flag.store(true, Ordering::SeqCst)));
///
/// while !ran.load(Ordering::SeqCst) {
///     std::thread::yield_now();
/// }
/// ```
pub struct ThreadPool {
    shared: Arc<PoolShared>,
}

impl ThreadPool {
    /// Creates a pool with `capacity` worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidCapacity`] when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, PoolError> {
        if capacity == 0 {
            return Err(PoolError::InvalidCapacity);
        }
        Ok(Self::spawn(capacity))
    }

    fn spawn(capacity: usize) -> Self {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });
        for index in 0..capacity {
            let worker_shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("fxcore-worker-{index}"))
                .spawn(move || worker(&worker_shared))
                .ok();
        }
        Self { shared }
    }
}

impl Default for ThreadPool {
    /// A pool sized to the number of logical CPUs (at least one).
    fn default() -> Self {
        Self::spawn(num_cpus::get().max(1))
    }
}

impl Scheduler for ThreadPool {
    fn execute(&self, task: Task) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                // Task submitted after shutdown: dropped.
                return;
            }
            state.queue.push_back(task);
        }
        self.shared.available.notify_one();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.available.notify_all();
    }
}

fn worker(shared: &PoolShared) {
    loop {
        let task = {
            let mut state = shared.state.lock();
            loop {
                if let Some(task) = state.queue.pop_front() {
                    break task;
                }
                if state.shutdown {
                    return;
                }
                shared.available.wait(&mut state);
            }
        };
        task();
    }
}

/// A scheduler that runs every task synchronously on the calling thread.
///
/// Turns scheduler hops into no-ops, which makes execution deterministic —
/// the trivial scheduling context.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl Scheduler for Immediate {
    fn execute(&self, task: Task) {
        task();
    }
}
