//! The internal, type-erased effect node ADT and its fusion rules.
//!
//! A public [`Fx<A>`](super::Fx) is a thin typed facade over [`Node`]. The
//! erasure exists because `Map` and `FlatMap` hide an existential
//! intermediate type: the node that produced the input of a composed
//! function is long gone by the time the run loop applies it. Values travel
//! as `Box<dyn Any + Send>` and are reified back to their concrete type at
//! the typed boundary ([`reify`]), the same type-erasure move the crate's
//! continuation frames use for composition.
//!
//! # Fusion
//!
//! `map` and `flat_map` rewrite nodes per tag instead of blindly nesting:
//!
//! - mapping a `Pure` value applies the function eagerly (bounded by
//!   [`FUSION_DEPTH`](super::platform::FUSION_DEPTH));
//! - mapping a `Map` pushes onto its flat stage chain, a left-to-right
//!   `SmallVec` of transformations applied in a loop rather than nested
//!   closures;
//! - binding over a `Map` fuses the stage chain into the continuation,
//!   skipping the intermediate node;
//! - past the fusion threshold, rewrites route the new work through the run
//!   loop so native stack depth stays bounded no matter how deep the
//!   composition grows.
//!
//! Fusion mutates nodes (stage chains grow, `Pure` values are overwritten),
//! which is sound because every combinator consumes `self`: a node being
//! rewritten is exclusively owned and can never be observed by a concurrent
//! evaluator.

use std::any::Any;

use smallvec::{SmallVec, smallvec};

use crate::concurrent::Connection;
use crate::fx::error::{self, Defect, FxError};
use crate::fx::platform::FUSION_DEPTH;

/// A type-erased computed value.
pub(crate) type Erased = Box<dyn Any + Send>;

/// The terminal outcome of evaluating a node.
pub(crate) type Outcome = Result<Erased, FxError>;

/// A suspended producer (the body of a `Single` node).
pub(crate) type Thunk = Box<dyn FnOnce() -> Erased + Send>;

/// One link of a `Map` node's flat stage chain.
pub(crate) type Stage = Box<dyn FnOnce(Erased) -> Erased + Send>;

/// A monadic continuation: consumes a value, produces the next node.
pub(crate) type BindFn = Box<dyn FnOnce(Erased) -> Node + Send>;

/// An error continuation: consumes a failure, produces the recovery node.
pub(crate) type RecoverFn = Box<dyn FnOnce(FxError) -> Node + Send>;

/// Swaps the active cancellation token for the duration of a subtree.
pub(crate) type ModifyFn = Box<dyn FnOnce(Connection) -> Connection + Send>;

/// Restores the cancellation token after a `ConnectionSwitch` subtree,
/// given the subtree's outcome, the previous token, and the active token.
pub(crate) type RestoreFn = Box<dyn FnOnce(&Outcome, Connection, Connection) -> Connection + Send>;

/// The terminal callback the run loop fires exactly once.
pub(crate) type NodeCallback = Box<dyn FnOnce(Outcome) + Send>;

/// An asynchronous registration: receives the active cancellation token and
/// the callback that eventually delivers the node's outcome.
pub(crate) type RegisterFn = Box<dyn FnOnce(&Connection, NodeCallback) + Send>;

/// The continuation stored in a `FlatMap` node.
///
/// Besides the plain bind, two special frames ride the same slot so error
/// recovery and `attempt` reuse the ordinary continuation machinery: a
/// `Recover` frame passes successes through untouched and rewrites
/// failures, while `Attempt` reflects either outcome into a value.
pub(crate) enum Continuation {
    /// Ordinary monadic bind.
    Bind(BindFn),
    /// Error handler: invoked on failure, transparent to success.
    Recover(RecoverFn),
    /// Materializes the outcome as a `Result` value, never failing.
    Attempt,
}

/// One deferred computation shape.
pub(crate) enum Node {
    /// Always fails with the carried error.
    RaiseError(FxError),
    /// An already-computed value. `fusion` counts consecutive eager
    /// transformations applied without yielding.
    Pure {
        /// The erased value.
        value: Erased,
        /// Eager-fusion counter, capped at [`FUSION_DEPTH`].
        fusion: u32,
    },
    /// Exactly one suspension point.
    Single(Thunk),
    /// A source with a flat chain of synchronous transformations.
    Map {
        /// The node producing the chain's input.
        source: Box<Node>,
        /// Left-to-right composed transformations.
        stages: SmallVec<[Stage; 4]>,
    },
    /// Monadic sequencing. `fusion` bounds consecutive fused binds.
    FlatMap {
        /// The node producing the continuation's input.
        source: Box<Node>,
        /// The continuation applied to the source's outcome.
        continuation: Continuation,
        /// Bind-fusion counter, capped at [`FUSION_DEPTH`].
        fusion: u32,
    },
    /// Temporarily swaps the active cancellation token around `source`.
    ConnectionSwitch {
        /// The subtree evaluated under the swapped token.
        source: Box<Node>,
        /// Produces the token active inside the subtree.
        modify: ModifyFn,
        /// Restores the token once the subtree settles; `None` leaves the
        /// swapped token in place.
        restore: Option<RestoreFn>,
    },
    /// Awaits an external completion. The registration is invoked exactly
    /// once by the run loop.
    Async {
        /// Arranges for the callback to eventually fire.
        register: RegisterFn,
    },
}

impl Node {
    /// A `Pure` node with a fresh fusion counter.
    pub(crate) fn pure(value: Erased) -> Self {
        Self::Pure { value, fusion: 0 }
    }

    /// Converts a run-loop outcome back into a node.
    pub(crate) fn from_outcome(outcome: Outcome) -> Self {
        match outcome {
            Ok(value) => Self::pure(value),
            Err(error) => Self::RaiseError(error),
        }
    }

    /// Per-tag `map` rewrite.
    pub(crate) fn map_stage(self, stage: Stage) -> Self {
        match self {
            Self::RaiseError(error) => Self::RaiseError(error),
            Self::Pure { value, fusion } => {
                if fusion < FUSION_DEPTH {
                    match error::catch_non_fatal(move || stage(value)) {
                        Ok(mapped) => Self::Pure {
                            value: mapped,
                            fusion: fusion + 1,
                        },
                        Err(error) => Self::RaiseError(error),
                    }
                } else {
                    // Threshold reached: defer the function into a Map node,
                    // a yield point the run loop flushes with bounded stack.
                    Self::Map {
                        source: Box::new(Self::pure(value)),
                        stages: smallvec![stage],
                    }
                }
            }
            source @ (Self::Single(_) | Self::ConnectionSwitch { .. } | Self::Async { .. }) => {
                Self::Map {
                    source: Box::new(source),
                    stages: smallvec![stage],
                }
            }
            Self::Map { source, mut stages } => {
                // Flat composition: extend the chain in place instead of
                // nesting closures.
                stages.push(stage);
                Self::Map { source, stages }
            }
            Self::FlatMap {
                source,
                continuation,
                fusion,
            } => match continuation {
                // Rotate the stage under the continuation so the depth
                // moves into data the run loop unwinds iteratively.
                Continuation::Bind(bind) if fusion >= FUSION_DEPTH => Self::FlatMap {
                    source,
                    continuation: Continuation::Bind(Box::new(move |value| Node::Map {
                        source: Box::new(bind(value)),
                        stages: smallvec![stage],
                    })),
                    fusion: 0,
                },
                continuation => Self::Map {
                    source: Box::new(Self::FlatMap {
                        source,
                        continuation,
                        fusion,
                    }),
                    stages: smallvec![stage],
                },
            },
        }
    }

    /// Per-tag `flat_map` rewrite.
    pub(crate) fn flat_map_bind(self, bind: BindFn) -> Self {
        match self {
            Self::RaiseError(error) => Self::RaiseError(error),
            source @ (Self::Pure { .. }
            | Self::Single(_)
            | Self::ConnectionSwitch { .. }
            | Self::Async { .. }) => Self::FlatMap {
                source: Box::new(source),
                continuation: Continuation::Bind(bind),
                fusion: 0,
            },
            Self::Map { source, stages } => {
                // Map/flat_map fusion: fold the stage chain into the new
                // continuation and skip the intermediate node.
                Self::FlatMap {
                    source,
                    continuation: Continuation::Bind(Box::new(move |value| {
                        bind(apply_stages(stages, value))
                    })),
                    fusion: 1,
                }
            }
            Self::FlatMap {
                source,
                continuation,
                fusion,
            } => match continuation {
                // Trampoline boundary: sequence the old continuation and the
                // new bind inside the continuation itself, resetting the
                // counter.
                Continuation::Bind(first) if fusion >= FUSION_DEPTH => Self::FlatMap {
                    source,
                    continuation: Continuation::Bind(Box::new(move |value| Node::FlatMap {
                        source: Box::new(first(value)),
                        continuation: Continuation::Bind(bind),
                        fusion: 0,
                    })),
                    fusion: 0,
                },
                continuation => Self::FlatMap {
                    source: Box::new(Self::FlatMap {
                        source,
                        continuation,
                        fusion,
                    }),
                    continuation: Continuation::Bind(bind),
                    fusion: 0,
                },
            },
        }
    }
}

/// Applies a flat stage chain left to right.
pub(crate) fn apply_stages(stages: SmallVec<[Stage; 4]>, value: Erased) -> Erased {
    let mut current = value;
    for stage in stages {
        current = stage(current);
    }
    current
}

/// Reifies an erased value back to its concrete type.
///
/// A failed downcast is an internal invariant violation: the node graph is
/// constructed so every value reaching a typed boundary has the type that
/// boundary expects. The defect panic is fatal and never converted into a
/// recoverable error.
pub(crate) fn reify<A: Any>(value: Erased) -> A {
    match value.downcast::<A>() {
        Ok(boxed) => *boxed,
        Err(_) => std::panic::panic_any(Defect("erased value had an unexpected concrete type")),
    }
}
