//! Round dispatch: rank engines, try them in order, learn from outcomes.
//!
//! One round = one problem instance. The loop asks the policy for an attempt
//! order, hands engines to the external [`AttemptRunner`] one at a time
//! (each with a fixed `total_timeout / K` slice of the round budget), turns
//! each attempt's elapsed time into a reward, and feeds that reward back into
//! the policy *before* the next attempt runs. The round stops at the first
//! definitive answer or when the order is exhausted.
//!
//! Attempt failures (unknown, error, timeout) are data, not errors: they
//! contribute a low reward and the loop moves on. Only configuration and
//! numerical-model failures abort; see [`ConfigError`] and [`PolicyError`].
//!
//! Everything here is single-threaded and synchronous. One problem is fully
//! dispatched before the next round begins, so model state needs no locking;
//! the runner may isolate processes internally, but that is its business.

use std::time::Instant;

use crate::policy::{ConfigError, HybridLinUcb, PolicyError};

/// One engine in the portfolio: a display name plus the invocation template
/// the runner uses to launch it. The core never interprets the template.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Engine {
    /// Human-readable engine name (e.g. `"z3"`).
    pub name: String,
    /// Opaque invocation template consumed by the runner.
    pub invocation: String,
}

impl Engine {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, invocation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            invocation: invocation.into(),
        }
    }
}

/// Ordered, fixed engine portfolio. Engine index = position in this list;
/// K = `len()` feeds both the reward formula and the per-attempt budget.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineRegistry {
    engines: Vec<Engine>,
}

impl EngineRegistry {
    /// Build a registry from an ordered engine list. Rejects an empty list.
    pub fn new(engines: Vec<Engine>) -> Result<Self, ConfigError> {
        if engines.is_empty() {
            return Err(ConfigError::EmptyPortfolio);
        }
        Ok(Self { engines })
    }

    /// Portfolio size K.
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    /// Whether the registry is empty (never true for a constructed registry).
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Engine at `index`, if in range.
    pub fn get(&self, index: usize) -> Option<&Engine> {
        self.engines.get(index)
    }

    /// Iterate engines in portfolio order.
    pub fn iter(&self) -> impl Iterator<Item = &Engine> {
        self.engines.iter()
    }
}

/// Outcome of a single engine attempt, as parsed by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AttemptOutcome {
    /// Definitive affirmative answer.
    Sat,
    /// Definitive refutative answer.
    Unsat,
    /// Engine finished but could not decide.
    Unknown,
    /// Engine crashed or produced unparseable output.
    Error,
    /// Engine exceeded its per-attempt budget.
    Timeout,
}

impl AttemptOutcome {
    /// Whether this outcome ends the round (a definitive solve either way).
    pub fn is_definitive(self) -> bool {
        matches!(self, AttemptOutcome::Sat | AttemptOutcome::Unsat)
    }
}

/// What the runner reports back for one attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttemptReport {
    /// Parsed outcome.
    pub outcome: AttemptOutcome,
    /// Wall-clock seconds the attempt took, `0 <= elapsed <= budget`.
    pub elapsed: f64,
}

/// External collaborator contract: run one engine on one problem under a
/// hard wall-clock budget (seconds) and report what happened.
///
/// The runner owns process supervision, output parsing, and kill-on-timeout;
/// the core only consumes `(outcome, elapsed)`. An attempt that exceeds its
/// budget must come back as [`AttemptOutcome::Timeout`] with
/// `elapsed == budget`.
pub trait AttemptRunner {
    /// Attempt `problem` with `engine` under `budget` seconds.
    fn attempt(&mut self, engine: &Engine, problem: &str, budget: f64) -> AttemptReport;
}

/// Reward for one attempt: `(1 - K * elapsed / total_timeout)^4`, clipped so
/// an attempt burning its whole `total_timeout / K` slice earns 0 and a
/// near-instant solve earns close to 1.
///
/// The 4th power is a deliberately steep, convex speed bonus: reward decays
/// fast as an attempt approaches its budget, so "solved, barely in time" is
/// worth little more than "timed out".
///
/// # Example
///
/// ```rust
/// use solvermux::attempt_reward;
///
/// // 2s of a 10s budget split across 2 engines: (1 - 2*2/10)^4 = 0.1296.
/// assert!((attempt_reward(2.0, 2, 10.0) - 0.1296).abs() < 1e-12);
/// assert_eq!(attempt_reward(5.0, 2, 10.0), 0.0);
/// assert_eq!(attempt_reward(0.0, 2, 10.0), 1.0);
/// ```
pub fn attempt_reward(elapsed: f64, portfolio_size: usize, total_timeout: f64) -> f64 {
    let k = portfolio_size.max(1) as f64;
    let total = if total_timeout.is_finite() && total_timeout > 0.0 {
        total_timeout
    } else {
        return 0.0;
    };
    let elapsed = if elapsed.is_finite() { elapsed.max(0.0) } else { total / k };
    let base = (1.0 - k * elapsed / total).clamp(0.0, 1.0);
    base.powi(4)
}

/// Dispatch-loop configuration.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DispatchConfig {
    /// Total wall-clock budget per round, in seconds, divided evenly across
    /// the full portfolio (`total_timeout / K` per attempt, regardless of
    /// how many engines actually run).
    pub total_timeout: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            total_timeout: 60.0,
        }
    }
}

/// One attempt's record within a round.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttemptRecord {
    /// Engine index attempted.
    pub engine: usize,
    /// Parsed outcome.
    pub outcome: AttemptOutcome,
    /// Seconds charged to this attempt. Non-definitive attempts are charged
    /// the full per-attempt budget even if they returned early.
    pub elapsed: f64,
    /// Reward fed back into the policy for this attempt.
    pub reward: f64,
}

/// Full record of one dispatched round.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoundResult {
    /// Problem identifier as given to `process`.
    pub problem: String,
    /// The attempt order the policy chose (a permutation of `0..K`).
    pub order: Vec<usize>,
    /// Attempts actually made, in order (may be shorter than `order`).
    pub attempts: Vec<AttemptRecord>,
    /// Whether a definitive answer was reached.
    pub solved: bool,
    /// Outcome of the last attempt (the definitive one when `solved`).
    pub outcome: AttemptOutcome,
    /// Engine that produced `outcome` (last engine attempted).
    pub engine_used: usize,
    /// Seconds charged across all attempts in the round.
    pub total_elapsed: f64,
    /// Seconds spent inside the policy (rank + updates) this round.
    pub policy_time: f64,
}

/// One row of the end-of-run record list: `(problem, outcome, engine-used,
/// total-elapsed)` for every round attempted, solved or not.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunRecord {
    /// Problem identifier.
    pub problem: String,
    /// Final outcome for the round.
    pub outcome: AttemptOutcome,
    /// Name of the engine that produced the final outcome.
    pub engine: String,
    /// Seconds charged across the round's attempts.
    pub total_elapsed: f64,
}

/// Cumulative log of a run, built up round by round.
///
/// Carries the three artifacts the reporting side consumes: per-round policy
/// timing, the full round record list, and (via
/// [`elapsed_times`][RunLog::elapsed_times]) the elapsed-only projection.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunLog {
    /// Seconds spent inside the policy (rank + updates), one entry per round.
    pub policy_times: Vec<f64>,
    /// One record per round attempted, solved or not.
    pub rounds: Vec<RunRecord>,
}

impl RunLog {
    /// The elapsed-time projection of [`rounds`][RunLog::rounds].
    pub fn elapsed_times(&self) -> Vec<f64> {
        self.rounds.iter().map(|r| r.total_elapsed).collect()
    }

    /// Only the rounds that reached a definitive answer.
    pub fn solved_rounds(&self) -> impl Iterator<Item = &RunRecord> {
        self.rounds.iter().filter(|r| r.outcome.is_definitive())
    }

    /// Number of rounds that reached a definitive answer.
    pub fn solved_count(&self) -> usize {
        self.solved_rounds().count()
    }

    /// Number of rounds that did not.
    pub fn unsolved_count(&self) -> usize {
        self.rounds.len() - self.solved_count()
    }

    /// Aggregate counts for the run so far.
    pub fn summary(&self) -> RunSummary {
        let solved = self.solved_count();
        RunSummary {
            rounds: self.rounds.len(),
            solved,
            unsolved: self.rounds.len() - solved,
        }
    }
}

/// Aggregate view of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunSummary {
    /// Rounds dispatched.
    pub rounds: usize,
    /// Rounds that ended in a definitive answer.
    pub solved: usize,
    /// Rounds that exhausted the portfolio without one.
    pub unsolved: usize,
}

/// The dispatch loop: policy + registry + runner + accumulated log.
///
/// # Example
///
/// ```rust
/// use solvermux::{
///     AttemptOutcome, AttemptReport, AttemptRunner, DispatchConfig, DispatchLoop, Engine,
///     EngineRegistry, HybridLinUcb, HybridLinUcbConfig,
/// };
///
/// struct AlwaysSolves;
/// impl AttemptRunner for AlwaysSolves {
///     fn attempt(&mut self, _e: &Engine, _p: &str, _budget: f64) -> AttemptReport {
///         AttemptReport { outcome: AttemptOutcome::Sat, elapsed: 0.5 }
///     }
/// }
///
/// let registry = EngineRegistry::new(vec![
///     Engine::new("fast", "fast --solve"),
///     Engine::new("slow", "slow --solve"),
/// ])
/// .unwrap();
/// let policy = HybridLinUcb::new(
///     HybridLinUcbConfig { dim: 2, ..Default::default() },
///     registry.len(),
/// )
/// .unwrap();
/// let mut loop_ = DispatchLoop::new(policy, registry, AlwaysSolves, DispatchConfig::default())
///     .unwrap();
///
/// let round = loop_.process("p0", &[0.3, 0.7]).unwrap();
/// assert!(round.solved);
/// assert_eq!(round.attempts.len(), 1);
/// ```
#[derive(Debug)]
pub struct DispatchLoop<R> {
    policy: HybridLinUcb,
    registry: EngineRegistry,
    runner: R,
    total_timeout: f64,
    log: RunLog,
}

impl<R: AttemptRunner> DispatchLoop<R> {
    /// Wire up a loop. Rejects a non-positive timeout and a policy whose
    /// portfolio size disagrees with the registry.
    pub fn new(
        policy: HybridLinUcb,
        registry: EngineRegistry,
        runner: R,
        cfg: DispatchConfig,
    ) -> Result<Self, ConfigError> {
        if !cfg.total_timeout.is_finite() || cfg.total_timeout <= 0.0 {
            return Err(ConfigError::NonPositiveTimeout(cfg.total_timeout));
        }
        if policy.portfolio_size() != registry.len() {
            return Err(ConfigError::PortfolioSizeMismatch {
                policy: policy.portfolio_size(),
                registry: registry.len(),
            });
        }
        Ok(Self {
            policy,
            registry,
            runner,
            total_timeout: cfg.total_timeout,
            log: RunLog::default(),
        })
    }

    /// Per-attempt budget: `total_timeout / K`.
    pub fn attempt_budget(&self) -> f64 {
        self.total_timeout / self.registry.len() as f64
    }

    /// The policy (e.g. for snapshotting at shutdown).
    pub fn policy(&self) -> &HybridLinUcb {
        &self.policy
    }

    /// The log accumulated so far.
    pub fn log(&self) -> &RunLog {
        &self.log
    }

    /// Tear down the loop, yielding the learned policy and the run log.
    pub fn finish(self) -> (HybridLinUcb, RunLog) {
        (self.policy, self.log)
    }

    /// Dispatch one round for `problem` with its normalized feature vector.
    ///
    /// Tries engines in policy rank order until one produces a definitive
    /// answer, updating the policy after every attempt (including failed
    /// ones). Unknown/error/timeout attempts are charged the full
    /// per-attempt budget and earn their (low) reward; they never abort the
    /// round.
    pub fn process(&mut self, problem: &str, x: &[f64]) -> Result<RoundResult, PolicyError> {
        let k = self.registry.len();
        let budget = self.attempt_budget();

        let policy_start = Instant::now();
        let order = self.policy.rank(x)?;
        let mut policy_time = policy_start.elapsed().as_secs_f64();

        let mut attempts = Vec::new();
        let mut total_elapsed = 0.0;
        let mut last_outcome = AttemptOutcome::Unknown;
        let mut engine_used = order.first().copied().unwrap_or(0);

        for &engine_idx in &order {
            let engine = self.registry.get(engine_idx).ok_or_else(|| {
                PolicyError::UnknownEngine {
                    engine: engine_idx,
                    portfolio: k,
                }
            })?;
            let report = self.runner.attempt(engine, problem, budget);

            // Clamp the runner's elapsed into [0, budget]; charge the full
            // slice for anything that did not decide the problem.
            let raw = if report.elapsed.is_finite() {
                report.elapsed.clamp(0.0, budget)
            } else {
                budget
            };
            let charged = if report.outcome.is_definitive() {
                raw
            } else {
                budget
            };
            let reward = attempt_reward(charged, k, self.total_timeout);

            tracing::debug!(
                problem,
                engine = engine.name.as_str(),
                outcome = ?report.outcome,
                elapsed = charged,
                reward,
                "attempt finished"
            );

            let update_start = Instant::now();
            self.policy.update(engine_idx, x, reward)?;
            policy_time += update_start.elapsed().as_secs_f64();

            attempts.push(AttemptRecord {
                engine: engine_idx,
                outcome: report.outcome,
                elapsed: charged,
                reward,
            });
            total_elapsed += charged;
            last_outcome = report.outcome;
            engine_used = engine_idx;

            if report.outcome.is_definitive() {
                break;
            }
        }

        let solved = last_outcome.is_definitive();
        tracing::info!(
            problem,
            solved,
            attempts = attempts.len(),
            total_elapsed,
            "round finished"
        );

        let engine_name = self
            .registry
            .get(engine_used)
            .map(|e| e.name.clone())
            .unwrap_or_default();
        self.log.policy_times.push(policy_time);
        self.log.rounds.push(RunRecord {
            problem: problem.to_string(),
            outcome: last_outcome,
            engine: engine_name,
            total_elapsed,
        });

        Ok(RoundResult {
            problem: problem.to_string(),
            order,
            attempts,
            solved,
            outcome: last_outcome,
            engine_used,
            total_elapsed,
            policy_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::HybridLinUcbConfig;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    /// Runner that replays a scripted sequence of reports.
    struct Scripted {
        reports: VecDeque<AttemptReport>,
        calls: Vec<(String, f64)>,
    }

    impl Scripted {
        fn new(reports: Vec<AttemptReport>) -> Self {
            Self {
                reports: reports.into(),
                calls: Vec::new(),
            }
        }
    }

    impl AttemptRunner for Scripted {
        fn attempt(&mut self, engine: &Engine, _problem: &str, budget: f64) -> AttemptReport {
            self.calls.push((engine.name.clone(), budget));
            self.reports.pop_front().unwrap_or(AttemptReport {
                outcome: AttemptOutcome::Timeout,
                elapsed: budget,
            })
        }
    }

    fn registry(k: usize) -> EngineRegistry {
        EngineRegistry::new(
            (0..k)
                .map(|i| Engine::new(format!("engine{i}"), format!("engine{i} --run")))
                .collect(),
        )
        .unwrap()
    }

    fn policy(dim: usize, k: usize) -> HybridLinUcb {
        HybridLinUcb::new(
            HybridLinUcbConfig {
                dim,
                alpha: 1.0,
                ..Default::default()
            },
            k,
        )
        .unwrap()
    }

    #[test]
    fn reward_matches_reference_value() {
        assert!((attempt_reward(2.0, 2, 10.0) - 0.1296).abs() < 1e-12);
    }

    #[test]
    fn reward_is_bounded_and_edge_cases_hold() {
        assert_eq!(attempt_reward(0.0, 4, 60.0), 1.0);
        // Full per-attempt budget => 0.
        assert_eq!(attempt_reward(15.0, 4, 60.0), 0.0);
        // Degenerate inputs sanitize to 0 reward.
        assert_eq!(attempt_reward(1.0, 4, 0.0), 0.0);
        assert_eq!(attempt_reward(f64::NAN, 4, 60.0), 0.0);
    }

    #[test]
    fn all_timeouts_round_is_unsolved_with_full_budget_charged() {
        let k = 3;
        let total = 30.0;
        let mut loop_ = DispatchLoop::new(
            policy(2, k),
            registry(k),
            Scripted::new(vec![
                AttemptReport { outcome: AttemptOutcome::Timeout, elapsed: 10.0 };
                k
            ]),
            DispatchConfig {
                total_timeout: total,
            },
        )
        .unwrap();

        let round = loop_.process("hard", &[0.5, 0.5]).unwrap();
        assert!(!round.solved);
        assert_eq!(round.attempts.len(), k);
        assert!((round.total_elapsed - total).abs() < 1e-9);
        for a in &round.attempts {
            assert_eq!(a.outcome, AttemptOutcome::Timeout);
            assert_eq!(a.reward, 0.0);
        }
        assert_eq!(loop_.log().unsolved_count(), 1);
    }

    #[test]
    fn instant_solve_stops_after_one_attempt_with_reward_near_one() {
        let k = 4;
        let mut loop_ = DispatchLoop::new(
            policy(2, k),
            registry(k),
            Scripted::new(vec![AttemptReport {
                outcome: AttemptOutcome::Sat,
                elapsed: 0.001,
            }]),
            DispatchConfig {
                total_timeout: 60.0,
            },
        )
        .unwrap();

        let round = loop_.process("easy", &[1.0, 0.0]).unwrap();
        assert!(round.solved);
        assert_eq!(round.outcome, AttemptOutcome::Sat);
        assert_eq!(round.attempts.len(), 1);
        assert!(round.attempts[0].reward > 0.999);
        // Exactly one update happened.
        assert_eq!(loop_.policy().engine_uses(round.engine_used), 1);
        let others: u64 = (0..k)
            .filter(|&e| e != round.engine_used)
            .map(|e| loop_.policy().engine_uses(e))
            .sum();
        assert_eq!(others, 0);
    }

    #[test]
    fn non_definitive_attempts_are_charged_the_full_slice() {
        let k = 2;
        let mut loop_ = DispatchLoop::new(
            policy(2, k),
            registry(k),
            Scripted::new(vec![
                // Errors out quickly, but the round still pays the slice.
                AttemptReport {
                    outcome: AttemptOutcome::Error,
                    elapsed: 0.1,
                },
                AttemptReport {
                    outcome: AttemptOutcome::Unsat,
                    elapsed: 3.0,
                },
            ]),
            DispatchConfig {
                total_timeout: 10.0,
            },
        )
        .unwrap();

        let round = loop_.process("flaky", &[0.2, 0.8]).unwrap();
        assert!(round.solved);
        assert_eq!(round.outcome, AttemptOutcome::Unsat);
        assert_eq!(round.attempts[0].elapsed, 5.0);
        assert_eq!(round.attempts[0].reward, 0.0);
        assert!((round.total_elapsed - 8.0).abs() < 1e-9);
    }

    #[test]
    fn runner_sees_constant_budget_regardless_of_attempt_count() {
        let k = 3;
        let mut loop_ = DispatchLoop::new(
            policy(2, k),
            registry(k),
            Scripted::new(vec![
                AttemptReport {
                    outcome: AttemptOutcome::Unknown,
                    elapsed: 1.0,
                };
                k
            ]),
            DispatchConfig {
                total_timeout: 30.0,
            },
        )
        .unwrap();
        let _ = loop_.process("p", &[0.5, 0.5]).unwrap();
        // Budget is total/K even when fewer engines would have run.
        assert_eq!(loop_.runner.calls.len(), k);
        for (_, budget) in &loop_.runner.calls {
            assert!((budget - 10.0).abs() < 1e-12);
        }
        let (_, log) = loop_.finish();
        assert_eq!(log.rounds.len(), 1);
    }

    #[test]
    fn log_accumulates_across_rounds_and_projects_elapsed() {
        let k = 2;
        let mut loop_ = DispatchLoop::new(
            policy(2, k),
            registry(k),
            Scripted::new(vec![
                AttemptReport {
                    outcome: AttemptOutcome::Sat,
                    elapsed: 1.0,
                },
                AttemptReport {
                    outcome: AttemptOutcome::Timeout,
                    elapsed: 5.0,
                },
                AttemptReport {
                    outcome: AttemptOutcome::Timeout,
                    elapsed: 5.0,
                },
            ]),
            DispatchConfig {
                total_timeout: 10.0,
            },
        )
        .unwrap();

        loop_.process("a", &[1.0, 0.0]).unwrap();
        loop_.process("b", &[0.0, 1.0]).unwrap();

        let log = loop_.log();
        assert_eq!(log.rounds.len(), 2);
        assert_eq!(log.policy_times.len(), 2);
        assert_eq!(
            log.summary(),
            RunSummary {
                rounds: 2,
                solved: 1,
                unsolved: 1
            }
        );
        assert_eq!(log.solved_rounds().count(), 1);
        let elapsed = log.elapsed_times();
        assert!((elapsed[0] - 1.0).abs() < 1e-9);
        assert!((elapsed[1] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_bad_wiring() {
        let err = DispatchLoop::new(
            policy(2, 2),
            registry(2),
            Scripted::new(vec![]),
            DispatchConfig { total_timeout: 0.0 },
        )
        .map(|_| ())
        .unwrap_err();
        assert_eq!(err, ConfigError::NonPositiveTimeout(0.0));

        let err = DispatchLoop::new(
            policy(2, 3),
            registry(2),
            Scripted::new(vec![]),
            DispatchConfig::default(),
        )
        .map(|_| ())
        .unwrap_err();
        assert!(matches!(err, ConfigError::PortfolioSizeMismatch { .. }));
    }

    proptest! {
        #[test]
        fn reward_is_monotone_nonincreasing_and_bounded(
            k in 1usize..8,
            total in 1.0f64..120.0,
            e1 in 0.0f64..1.0,
            e2 in 0.0f64..1.0,
        ) {
            let budget = total / k as f64;
            let (lo, hi) = if e1 <= e2 { (e1, e2) } else { (e2, e1) };
            let (lo, hi) = (lo * budget, hi * budget);
            let r_lo = attempt_reward(lo, k, total);
            let r_hi = attempt_reward(hi, k, total);
            prop_assert!(r_lo >= r_hi);
            prop_assert!((0.0..=1.0).contains(&r_lo));
            prop_assert!((0.0..=1.0).contains(&r_hi));
        }
    }
}
