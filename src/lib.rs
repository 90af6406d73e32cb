//! `solvermux`: learned dispatch over a portfolio of external solving engines.
//!
//! You have K engines that all attack the same kind of problem (SMT solvers,
//! model checkers, any "feed it an instance, wait, parse the verdict" tool)
//! with wildly different per-instance behavior: the engine that cracks one
//! instance in a second can hang on the next. Given a stream of instances,
//! `solvermux` learns which engine to try first from cheap structural
//! features of each instance, instead of running the whole portfolio or
//! hard-coding a fixed order.
//!
//! The policy is hybrid linear UCB ([`HybridLinUcb`]): one shared
//! ridge-regression model captures feature effects common to every engine,
//! and a per-engine model captures each engine's residual behavior, coupled
//! through a cross matrix. Scores are optimistic (estimate plus an
//! uncertainty bonus), so rarely tried engines keep getting probed.
//!
//! **Per round** (one problem instance), the [`DispatchLoop`]:
//! 1. scales the instance's raw probe vector ([`FeatureScaler`]),
//! 2. ranks all K engines ([`HybridLinUcb::rank`]),
//! 3. attempts engines in that order via your [`AttemptRunner`], each under
//!    a `total_timeout / K` budget,
//! 4. converts each attempt's elapsed time into a reward
//!    ([`attempt_reward`]) and updates the policy immediately, so later
//!    attempts in the same round see the earlier evidence,
//! 5. stops at the first definitive answer.
//!
//! A run accumulates a [`RunLog`]; with the `serde` feature, the log and
//! policy snapshots serialize to JSON artifacts (see the `persist` module
//! re-exports).
//!
//! **Scope:**
//! - Single-threaded, synchronous, in-memory. One round at a time.
//! - Feature probing and process supervision are caller-provided seams
//!   ([`FeatureExtractor`], [`AttemptRunner`]); the crate owns scaling,
//!   scoring, learning, and bookkeeping.
//! - Designed for small portfolios (a handful of engines) and probe-count
//!   feature dimensions; dense O(d^3) linear algebra is deliberate.
//!
//! **A note on rank direction:** the default attempt order is *ascending*
//! by score, matching the system this policy's behavior was measured
//! against rather than the textbook "highest UCB first" convention. See
//! [`RankOrder`] to flip it.

#![forbid(unsafe_code)]

/// Epsilon used for floating-point tie-breaking when ordering engine scores.
///
/// Avoids exact equality comparisons on f64 scores; ties within this band
/// resolve toward the lower engine index.
pub(crate) const TIEBREAK_EPS: f64 = 1e-12;

mod linalg;

mod features;
pub use features::*;

mod model;
pub use model::{ArmModelState, SharedModelState};

mod policy;
pub use policy::*;

mod dispatch;
pub use dispatch::*;

#[cfg(feature = "serde")]
mod persist;
#[cfg(feature = "serde")]
pub use persist::*;

pub const SOLVERMUX_VERSION: &str = env!("CARGO_PKG_VERSION");
