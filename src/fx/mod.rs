//! The effect value: a deferred, possibly asynchronous, possibly failing
//! computation.
//!
//! An [`Fx<A>`] "describes" a computation producing `A` but doesn't
//! "execute" it. Execution happens only through the `run_unsafe*` entry
//! points, which should be called at the program's edge. Everything in
//! between — composition, error recovery, resource brackets, forking —
//! rewrites the description.
//!
//! # Examples
//!
//! ```rust
//! use fxcore::fx::Fx;
//!
//! // Describe, then run.
//! let program = Fx::pure(10)
//!     .map(|x| x * 2)
//!     .flat_map(|x| Fx::pure(x + 1));
//! assert_eq!(program.run_unsafe(), Ok(21));
//! ```
//!
//! # Side Effect Deferral
//!
//! ```rust
//! use fxcore::fx::Fx;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! let executed = Arc::new(AtomicBool::new(false));
//! let flag = executed.clone();
//!
//! let program = Fx::new(move || {
//!     flag.store(true, Ordering::SeqCst);
//!     42
//! });
//!
//! // Nothing has run yet.
//! assert!(!executed.load(Ordering::SeqCst));
//!
//! assert_eq!(program.run_unsafe(), Ok(42));
//! assert!(executed.load(Ordering::SeqCst));
//! ```
//!
//! # Stack Safety
//!
//! Composition depth is bounded by data, not by the native call stack:
//! adjacent synchronous transformations fuse into flat chains, and past a
//! fixed fusion depth rewrites route through the run loop. A hundred
//! thousand nested `map` calls evaluate without overflowing.
//!
//! # Cancellation
//!
//! Cancellation is cooperative. Every running computation is bound to a
//! [`Connection`] — a LIFO stack of cancel effects — checked before each
//! step. [`Fx::uncancelable`] masks a region from outside cancellation;
//! [`Fx::bracket_case`] guarantees release even when `use` is interrupted;
//! [`Fx::fork`] links child and parent tokens so cancellation cascades.

use std::any::Any;
use std::ops::ControlFlow;
use std::sync::Arc;

use static_assertions::assert_impl_all;

use crate::concurrent::{Connection, Disposable, Fiber, Promise, Scheduler};

// =============================================================================
// Submodules
// =============================================================================

mod bracket;
mod error;
mod platform;

pub(crate) mod node;
pub(crate) mod runloop;

pub use bracket::ExitCase;
pub use error::FxError;
pub use platform::{AsyncCallback, FUSION_DEPTH};

use node::{Continuation, Erased, Node};

/// A deferred, possibly asynchronous, possibly failing computation
/// producing `A`.
///
/// `Fx` is a description: building one performs no work, and composing it
/// allocates at most a node. Values are one-shot — running consumes the
/// description, which is what lets composition fuse nodes in place without
/// ever sharing them between evaluators.
///
/// # Monad Laws
///
/// `Fx` satisfies the monad laws for arbitrary finite composition depth,
/// including depths past the internal fusion threshold:
///
/// 1. **Left Identity**: `Fx::pure(a).flat_map(f) == f(a)`
/// 2. **Right Identity**: `m.flat_map(Fx::pure) == m`
/// 3. **Associativity**: `m.flat_map(f).flat_map(g) == m.flat_map(|x| f(x).flat_map(g))`
pub struct Fx<A> {
    node: Node,
    _marker: std::marker::PhantomData<fn() -> A>,
}

assert_impl_all!(Fx<i32>: Send);
assert_impl_all!(FxError: Send, Sync, Clone);
assert_impl_all!(Connection: Send, Sync, Clone);

impl<A: Send + 'static> Fx<A> {
    pub(crate) fn from_node(node: Node) -> Self {
        Self {
            node,
            _marker: std::marker::PhantomData,
        }
    }

    pub(crate) fn into_node(self) -> Node {
        self.node
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    /// Suspends a computation with exactly one suspension point.
    ///
    /// The producer runs when the effect is run, on whichever thread drives
    /// it. A non-fatal panic inside the producer is captured into the error
    /// channel.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fxcore::fx::Fx;
    ///
    /// let effect = Fx::new(|| 21 * 2);
    /// assert_eq!(effect.run_unsafe(), Ok(42));
    /// ```
    pub fn new<F>(producer: F) -> Self
    where
        F: FnOnce() -> A + Send + 'static,
    {
        Self::from_node(Node::Single(Box::new(move || {
            Box::new(producer()) as Erased
        })))
    }

    /// Lifts an already-computed value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fxcore::fx::Fx;
    ///
    /// assert_eq!(Fx::pure(42).run_unsafe(), Ok(42));
    /// ```
    pub fn pure(value: A) -> Self {
        Self::from_node(Node::pure(Box::new(value)))
    }

    /// Lifts a failure.
    ///
    /// The resulting effect always fails with `error`; functions mapped or
    /// bound over it are never invoked.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fxcore::fx::{Fx, FxError};
    ///
    /// let effect: Fx<i32> = Fx::raise_error(FxError::Canceled);
    /// assert_eq!(effect.run_unsafe(), Err(FxError::Canceled));
    /// ```
    pub fn raise_error(error: FxError) -> Self {
        Self::from_node(Node::RaiseError(error))
    }

    /// Defers the construction of an effect until run time.
    pub fn defer<F>(thunk: F) -> Self
    where
        F: FnOnce() -> Self + Send + 'static,
    {
        Self::from_node(Node::FlatMap {
            source: Box::new(Node::pure(Box::new(()))),
            continuation: Continuation::Bind(Box::new(move |_| thunk().node)),
            fusion: 0,
        })
    }

    /// Stack-safe monadic recursion.
    ///
    /// Repeatedly runs `step`, feeding each `Continue` state back in, until
    /// it yields `Break`. The loop depth lives in run-loop data, so any
    /// number of iterations is safe.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fxcore::fx::Fx;
    /// use std::ops::ControlFlow;
    ///
    /// let countdown = Fx::tail_rec_m(100_000u32, |n| {
    ///     Fx::pure(if n == 0 {
    ///         ControlFlow::Break("done")
    ///     } else {
    ///         ControlFlow::Continue(n - 1)
    ///     })
    /// });
    /// assert_eq!(countdown.run_unsafe(), Ok("done"));
    /// ```
    pub fn tail_rec_m<S, F>(initial: S, step: F) -> Self
    where
        S: Send + 'static,
        F: Fn(S) -> Fx<ControlFlow<A, S>> + Send + Sync + 'static,
    {
        fn go<A, S, F>(state: S, step: Arc<F>) -> Fx<A>
        where
            A: Send + 'static,
            S: Send + 'static,
            F: Fn(S) -> Fx<ControlFlow<A, S>> + Send + Sync + 'static,
        {
            step(state).flat_map(move |flow| match flow {
                ControlFlow::Continue(next) => go(next, step),
                ControlFlow::Break(value) => Fx::pure(value),
            })
        }
        go(initial, Arc::new(step))
    }

    // =========================================================================
    // Composition
    // =========================================================================

    /// Transforms the produced value.
    ///
    /// Adjacent `map`s fuse into a single flat transformation chain; maps
    /// over already-computed values apply eagerly up to the fusion
    /// threshold. A non-fatal panic in `function` is captured into the
    /// error channel; over a failed effect, `function` is never invoked.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fxcore::fx::Fx;
    ///
    /// assert_eq!(Fx::pure(21).map(|x| x * 2).run_unsafe(), Ok(42));
    /// ```
    pub fn map<B, F>(self, function: F) -> Fx<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        Fx::from_node(self.node.map_stage(Box::new(move |value| {
            Box::new(function(node::reify::<A>(value))) as Erased
        })))
    }

    /// Sequences a dependent effect.
    ///
    /// Over a failed effect, `function` is never invoked. Arbitrarily deep
    /// bind chains are safe: depth past the fusion threshold moves into
    /// run-loop data.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fxcore::fx::Fx;
    ///
    /// let program = Fx::pure(10).flat_map(|x| Fx::pure(x * 2));
    /// assert_eq!(program.run_unsafe(), Ok(20));
    /// ```
    pub fn flat_map<B, F>(self, function: F) -> Fx<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Fx<B> + Send + 'static,
    {
        Fx::from_node(self.node.flat_map_bind(Box::new(move |value| {
            function(node::reify::<A>(value)).node
        })))
    }

    /// Alias for [`flat_map`](Self::flat_map), the conventional Rust name.
    pub fn and_then<B, F>(self, function: F) -> Fx<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Fx<B> + Send + 'static,
    {
        self.flat_map(function)
    }

    /// Sequences two effects, discarding this one's value.
    pub fn then<B>(self, next: Fx<B>) -> Fx<B>
    where
        B: Send + 'static,
    {
        self.flat_map(move |_| next)
    }

    /// Combines two effects with a function, left to right.
    pub fn map2<B, C, F>(self, other: Fx<B>, function: F) -> Fx<C>
    where
        B: Send + 'static,
        C: Send + 'static,
        F: FnOnce(A, B) -> C + Send + 'static,
    {
        self.flat_map(move |a| other.map(move |b| function(a, b)))
    }

    /// Combines two effects into a tuple, left to right.
    pub fn product<B>(self, other: Fx<B>) -> Fx<(A, B)>
    where
        B: Send + 'static,
    {
        self.map2(other, |a, b| (a, b))
    }

    // =========================================================================
    // Error Handling
    // =========================================================================

    /// Materializes the outcome, never failing.
    ///
    /// A success becomes `Ok`, a failure becomes `Err`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fxcore::fx::{Fx, FxError};
    ///
    /// let failed: Fx<i32> = Fx::raise_error(FxError::Canceled);
    /// assert_eq!(failed.attempt().run_unsafe(), Ok(Err(FxError::Canceled)));
    /// ```
    pub fn attempt(self) -> Fx<Result<A, FxError>> {
        let attempted = Node::FlatMap {
            source: Box::new(self.node),
            continuation: Continuation::Attempt,
            fusion: 0,
        };
        Fx::from_node(attempted.map_stage(Box::new(|value| {
            let outcome = node::reify::<Result<Erased, FxError>>(value);
            Box::new(outcome.map(node::reify::<A>)) as Erased
        })))
    }

    /// Recovers from a failure with a fallback effect.
    ///
    /// Successes pass through untouched; `handler` is never invoked for
    /// them.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fxcore::fx::{Fx, FxError};
    ///
    /// let recovered = Fx::<i32>::raise_error(FxError::Canceled)
    ///     .handle_error_with(|_| Fx::pure(0));
    /// assert_eq!(recovered.run_unsafe(), Ok(0));
    /// ```
    pub fn handle_error_with<F>(self, handler: F) -> Self
    where
        F: FnOnce(FxError) -> Self + Send + 'static,
    {
        Self::from_node(Node::FlatMap {
            source: Box::new(self.node),
            continuation: Continuation::Recover(Box::new(move |error| handler(error).node)),
            fusion: 0,
        })
    }

    /// Recovers from a failure with a pure fallback value.
    pub fn handle_error<F>(self, handler: F) -> Self
    where
        F: FnOnce(FxError) -> A + Send + 'static,
    {
        match self.node {
            Node::RaiseError(error) => Self::new(move || handler(error)),
            node @ Node::Pure { .. } => Self::from_node(node),
            node => Self::from_node(node)
                .handle_error_with(move |error| Self::new(move || handler(error))),
        }
    }

    /// Fails with `error_factory()` unless the produced value satisfies
    /// `predicate`.
    pub fn ensure<E, P>(self, error_factory: E, predicate: P) -> Self
    where
        E: FnOnce() -> FxError + Send + 'static,
        P: FnOnce(&A) -> bool + Send + 'static,
    {
        match self.node {
            node @ Node::RaiseError(_) => Self::from_node(node),
            Node::Pure { value, fusion } => {
                let value = node::reify::<A>(value);
                match error::catch_non_fatal(move || {
                    if predicate(&value) {
                        Ok(value)
                    } else {
                        Err(error_factory())
                    }
                }) {
                    Ok(Ok(value)) => Self::from_node(Node::Pure {
                        value: Box::new(value),
                        fusion,
                    }),
                    Ok(Err(error)) | Err(error) => Self::from_node(Node::RaiseError(error)),
                }
            }
            node => Self::from_node(node).flat_map(move |value| {
                if predicate(&value) {
                    Self::pure(value)
                } else {
                    Self::raise_error(error_factory())
                }
            }),
        }
    }

    // =========================================================================
    // Resource Safety
    // =========================================================================

    /// Acquires this effect's value as a resource, guaranteeing release.
    ///
    /// Acquisition (this effect) is shielded from cancellation. `use_` runs
    /// with the acquired value under the caller's token. `release` runs
    /// exactly once with an [`ExitCase`] matching how `use_` ended,
    /// regardless of success, failure, or cancellation; it is itself
    /// shielded for its own execution window. The overall outcome matches
    /// `use_`'s outcome, except cancellation always overrides.
    ///
    /// `A: Clone` because the resource reaches both `use_` and `release`;
    /// hold non-clonable resources in an [`Arc`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fxcore::fx::{ExitCase, Fx};
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicU32, Ordering};
    ///
    /// let closed = Arc::new(AtomicU32::new(0));
    /// let sink = closed.clone();
    ///
    /// let program = Fx::pure("resource").bracket_case(
    ///     |resource| Fx::pure(resource.len()),
    ///     move |_resource, _exit| {
    ///         let sink = sink.clone();
    ///         Fx::new(move || {
    ///             sink.fetch_add(1, Ordering::SeqCst);
    ///         })
    ///     },
    /// );
    ///
    /// assert_eq!(program.run_unsafe(), Ok(8));
    /// assert_eq!(closed.load(Ordering::SeqCst), 1);
    /// ```
    pub fn bracket_case<B, U, R>(self, use_: U, release: R) -> Fx<B>
    where
        A: Clone,
        B: Send + 'static,
        U: FnOnce(A) -> Fx<B> + Send + 'static,
        R: FnOnce(A, ExitCase) -> Fx<()> + Send + 'static,
    {
        bracket::bracket_case(self, use_, release)
    }

    /// [`bracket_case`](Self::bracket_case) with a release that ignores the
    /// exit signal.
    pub fn bracket<B, U, R>(self, use_: U, release: R) -> Fx<B>
    where
        A: Clone,
        B: Send + 'static,
        U: FnOnce(A) -> Fx<B> + Send + 'static,
        R: FnOnce(A) -> Fx<()> + Send + 'static,
    {
        self.bracket_case(use_, move |resource, _exit| release(resource))
    }

    /// Runs `finalizer` with the exit signal once this effect settles, no
    /// matter how it settles.
    pub fn guarantee_case<F>(self, finalizer: F) -> Self
    where
        F: FnOnce(ExitCase) -> Fx<()> + Send + 'static,
    {
        Fx::unit().bracket_case(move |()| self, move |(), exit| finalizer(exit))
    }

    /// Runs `finalizer` once this effect settles, no matter how it settles.
    pub fn guarantee(self, finalizer: Fx<()>) -> Self {
        self.guarantee_case(move |_exit| finalizer)
    }

    // =========================================================================
    // Cancellation & Scheduling
    // =========================================================================

    /// Masks this effect from outside cancellation.
    ///
    /// While the masked region runs, external cancel signals are not
    /// observed; they take effect again once the region settles and the
    /// previous token is restored. Ordinary failures are unaffected.
    pub fn uncancelable(self) -> Self {
        Self::from_node(Node::ConnectionSwitch {
            source: Box::new(self.node),
            modify: Box::new(|_current| Connection::uncancelable()),
            restore: Some(Box::new(|_outcome, previous, _current| previous)),
        })
    }

    /// Re-homes subsequent execution onto `scheduler`.
    ///
    /// Value semantics are unchanged; only the thread driving the rest of
    /// the computation moves.
    pub fn continue_on(self, scheduler: &Arc<dyn Scheduler>) -> Self {
        let scheduler = Arc::clone(scheduler);
        Fx::async_(move |_connection: &Connection, callback: AsyncCallback<()>| {
            scheduler.execute(Box::new(move || callback.complete(Ok(()))));
        })
        .flat_map(move |()| self)
    }

    /// Starts this effect concurrently on `scheduler`, returning a
    /// [`Fiber`] handle.
    ///
    /// The fiber gets a fresh cancellation token linked bidirectionally
    /// with the caller's: canceling either cascades to the other. The
    /// outcome is published to a single-assignment promise the fiber's
    /// `join` observes.
    pub fn fork(self, scheduler: &Arc<dyn Scheduler>) -> Fx<Fiber<A>>
    where
        A: Clone,
    {
        let scheduler = Arc::clone(scheduler);
        Fx::from_node(Node::Async {
            register: Box::new(move |parent: &Connection, callback| {
                let promise = Arc::new(Promise::<A>::new());
                let child = Connection::new();
                // Bidirectional cancel link: either token firing cascades.
                parent.push_node(child.cancel_node());
                child.push_node(parent.cancel_node());

                let fiber = Fiber::new(Arc::clone(&promise), child.clone());
                let body = self.node;
                scheduler.execute(Box::new(move || {
                    runloop::start_cancelable(
                        body,
                        child,
                        Box::new(move |outcome| {
                            let _ = promise.complete(outcome.map(node::reify::<A>));
                        }),
                    );
                }));
                callback(Ok(Box::new(fiber)));
            }),
        })
    }

    // =========================================================================
    // Async Bridge
    // =========================================================================

    /// Lifts a callback-based registration into an effect.
    ///
    /// `register` receives the active cancellation token and an
    /// [`AsyncCallback`] that fires at most once — duplicate completions
    /// are silently ignored. A non-fatal panic thrown synchronously by
    /// `register` is delivered as a failure through the callback; a fatal
    /// panic propagates uncaught.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fxcore::fx::Fx;
    /// use std::thread;
    ///
    /// let effect = Fx::async_(|_connection, callback| {
    ///     thread::spawn(move || callback.complete(Ok(42)));
    /// });
    /// assert_eq!(effect.run_unsafe(), Ok(42));
    /// ```
    pub fn async_<F>(register: F) -> Self
    where
        F: FnOnce(&Connection, AsyncCallback<A>) + Send + 'static,
    {
        Self::from_node(Node::Async {
            register: Box::new(move |connection, callback| {
                let handle = AsyncCallback::new(callback);
                let rescue = handle.clone();
                if let Err(error) = error::catch_non_fatal(|| register(connection, handle)) {
                    rescue.complete(Err(error));
                }
            }),
        })
    }

    /// Like [`async_`](Self::async_), but the registration itself is an
    /// effect.
    ///
    /// The registration effect runs on a freshly created child token linked
    /// to the caller's. If it settles with the cancellation sentinel while
    /// the caller's token is still live, the caller's cancel path is
    /// triggered — a cancellation consumed inside the registrar is never
    /// silently dropped. The completion callback is token-aware: a result
    /// arriving after the caller's token is canceled is discarded.
    pub fn async_f<F>(register: F) -> Self
    where
        F: FnOnce(&Connection, AsyncCallback<A>) -> Fx<()> + Send + 'static,
    {
        Self::from_node(Node::Async {
            register: Box::new(move |connection, callback| {
                let child = Connection::new();
                connection.push_node(child.cancel_node());
                let handle = AsyncCallback::gated(connection.clone(), callback);
                let rescue = handle.clone();
                let registration = match error::catch_non_fatal(|| register(&child, handle)) {
                    Ok(effect) => effect,
                    Err(error) => Fx::new(move || rescue.complete(Err(error))),
                };
                let parent = connection.clone();
                runloop::start_cancelable(
                    registration.into_node(),
                    child,
                    Box::new(move |outcome| {
                        // A cancellation consumed by the registrar must not
                        // vanish: echo it to the parent token.
                        if matches!(outcome, Err(FxError::Canceled)) && !parent.is_canceled() {
                            parent.cancel_now();
                        }
                    }),
                );
            }),
        })
    }

    // =========================================================================
    // Entry Points
    // =========================================================================

    /// Runs the effect on the calling thread and blocks for its outcome.
    ///
    /// "Unsafe" in the referential-transparency sense: this executes the
    /// described side effects. Already-settled effects (`pure`,
    /// `raise_error`) return without involving the run loop; anything else
    /// drives the run loop, parking the thread on a condition variable
    /// while asynchronous work completes elsewhere.
    ///
    /// # Errors
    ///
    /// Returns the effect's failure, if it settles with one.
    pub fn run_unsafe(self) -> Result<A, FxError> {
        runloop::run_sync(self.node).map(node::reify::<A>)
    }

    /// Runs the effect, delivering the outcome to `callback` exactly once.
    ///
    /// May complete synchronously on the calling thread or later on another
    /// thread, depending on the nodes involved. Failures are always
    /// delivered through the callback, never thrown at the caller.
    pub fn run_unsafe_non_blocking<C>(self, callback: C)
    where
        C: FnOnce(Result<A, FxError>) + Send + 'static,
    {
        runloop::start(
            self.node,
            Box::new(move |outcome| callback(outcome.map(node::reify::<A>))),
        );
    }

    /// Like [`run_unsafe_non_blocking`](Self::run_unsafe_non_blocking), but
    /// cancelable.
    ///
    /// Binds the run to a fresh cancellation token and returns a
    /// [`Disposable`] that cancels it, cascading to every cancel effect
    /// pushed during execution.
    pub fn run_unsafe_cancelable<C>(self, callback: C) -> Disposable
    where
        C: FnOnce(Result<A, FxError>) + Send + 'static,
    {
        let connection = Connection::new();
        runloop::start_cancelable(
            self.node,
            connection.clone(),
            Box::new(move |outcome| callback(outcome.map(node::reify::<A>))),
        );
        connection.to_disposable()
    }
}

impl Fx<()> {
    /// The no-op effect.
    #[must_use]
    pub fn unit() -> Self {
        Self::pure(())
    }
}

impl<A: Any> std::fmt::Debug for Fx<A> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match &self.node {
            Node::RaiseError(_) => "RaiseError",
            Node::Pure { .. } => "Pure",
            Node::Single(_) => "Single",
            Node::Map { .. } => "Map",
            Node::FlatMap { .. } => "FlatMap",
            Node::ConnectionSwitch { .. } => "ConnectionSwitch",
            Node::Async { .. } => "Async",
        };
        formatter.debug_tuple("Fx").field(&tag).finish()
    }
}
