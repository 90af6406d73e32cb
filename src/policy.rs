//! Hybrid linear-UCB selection policy over a fixed engine portfolio.
//!
//! Engines are indexed `0..K-1` and the feature vector for the current
//! problem is the context. The policy maintains one shared ridge-regression
//! model (effects common to every engine) plus a per-engine model, and scores
//! each engine as
//!
//! ```text
//! score_i = theta_i . x + beta . x + alpha * sqrt(s_i)
//! ```
//!
//! where `beta = A0^-1 B0` is the shared coefficient estimate,
//! `theta_i = A_i^-1 (B_i - C_i beta)` is the engine estimate with the shared
//! component subtracted out (otherwise shared effects would be counted
//! twice), and `s_i` is the propagated variance of the joint estimator:
//!
//! ```text
//! s_i = x' A0^-1 x - 2 x' A0^-1 C_i' A_i^-1 x + x' A_i^-1 x
//!       + x' A_i^-1 C_i A0^-1 C_i' A_i^-1 x
//! ```
//!
//! `update` applies the hybrid rank-one correction: the shared model first
//! absorbs the arm's *pre-update* contribution, the arm accumulates
//! `x x'` / `reward x`, and the shared model is then corrected with the
//! *post-update* arm matrices. The ordering is load-bearing; see
//! [`HybridLinUcb::update`].
//!
//! ## Rank direction
//!
//! [`rank`][HybridLinUcb::rank] orders engines **ascending** by score by
//! default ([`RankOrder::LowestFirst`]), i.e. the lowest-scored engine is
//! attempted first. This preserves the behavior of the system this policy
//! was measured against, but it is the opposite of the textbook UCB
//! convention of trying the highest optimistic score first. The direction is
//! deliberately a configuration knob rather than a silent fix:
//! [`RankOrder::HighestFirst`] gives the textbook ordering.
//!
//! Inverses are recomputed from the accumulated matrices at every use.
//! Nothing caches `A^-1`, so there is no stale-factor hazard; at probe-count
//! dimensions the cost is irrelevant.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use thiserror::Error;

use crate::linalg::{
    add_assign, add_outer, axpy, dot, invert_ridge, mat_mul, mat_tvec, mat_vec, quad_form,
    sub_assign, transpose,
};
use crate::model::{ArmModel, ArmModelState, SharedModel, SharedModelState};
use crate::TIEBREAK_EPS;

/// Per-engine score tuple: `(score, predicted, bonus)`.
pub type EngineScore = (f64, f64, f64);

/// Configuration rejected before any round runs.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ConfigError {
    /// The engine portfolio has no members.
    #[error("engine portfolio is empty")]
    EmptyPortfolio,
    /// The feature vector has zero length.
    #[error("feature dimension must be at least 1")]
    ZeroFeatureDim,
    /// The exploration coefficient is not a finite positive number.
    #[error("alpha must be finite and > 0, got {0}")]
    NonPositiveAlpha(f64),
    /// The total per-round time budget is not a finite positive number.
    #[error("total timeout must be finite and > 0, got {0}")]
    NonPositiveTimeout(f64),
    /// The policy was built for a different portfolio size than the registry.
    #[error("policy portfolio size {policy} does not match registry size {registry}")]
    PortfolioSizeMismatch {
        /// Portfolio size the policy was built for.
        policy: usize,
        /// Number of engines in the registry.
        registry: usize,
    },
}

/// Fatal policy-level failures. Attempt-level failures are not errors; they
/// arrive as low rewards.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    /// A model matrix stayed singular even after the widening-ridge fallback.
    ///
    /// This should not happen: every design matrix is the identity plus
    /// positive-semidefinite rank-one terms. If it does, the model state is
    /// numerically wrecked and the run must stop rather than keep learning
    /// from garbage.
    #[error("model matrix {matrix} is singular even after ridge fallback")]
    SingularModel {
        /// Which matrix failed to invert (e.g. `"A0"`, `"A[3]"`).
        matrix: String,
    },
    /// An engine index outside `0..K` was passed to `update`.
    #[error("engine index {engine} out of range for portfolio of {portfolio}")]
    UnknownEngine {
        /// The offending index.
        engine: usize,
        /// Portfolio size K.
        portfolio: usize,
    },
    /// A snapshot's shape does not match this policy's shape.
    #[error(
        "snapshot shape mismatch: dim {snapshot_dim} vs {dim}, arms {snapshot_arms} vs {arms}"
    )]
    SnapshotMismatch {
        /// Dimension recorded in the snapshot.
        snapshot_dim: usize,
        /// Dimension of this policy.
        dim: usize,
        /// Arm count recorded in the snapshot.
        snapshot_arms: usize,
        /// Arm count of this policy.
        arms: usize,
    },
}

/// Which end of the score ordering gets attempted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RankOrder {
    /// Attempt the lowest-scored engine first (observed source behavior;
    /// the default).
    #[default]
    LowestFirst,
    /// Attempt the highest-scored engine first (textbook UCB).
    HighestFirst,
}

/// Configuration for the hybrid LinUCB policy.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HybridLinUcbConfig {
    /// Feature vector dimension (number of structural probes, must be >= 1).
    pub dim: usize,
    /// Exploration strength (must be finite and > 0; larger explores more).
    pub alpha: f64,
    /// Seed for the RNG used only by [`HybridLinUcb::rank_softmax`].
    pub seed: u64,
    /// Which end of the score ordering is attempted first.
    pub rank_order: RankOrder,
}

impl Default for HybridLinUcbConfig {
    fn default() -> Self {
        Self {
            // Eleven structural probes, the portfolio this was tuned on.
            dim: 11,
            alpha: 2.358,
            seed: 0,
            rank_order: RankOrder::LowestFirst,
        }
    }
}

/// Serializable policy snapshot (shared + per-arm sufficient statistics).
///
/// Excludes RNG state, mirroring the convention that callers manage seeds
/// externally. Restoring a snapshot and continuing yields scores and updates
/// identical to an uninterrupted run on the same input sequence.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PolicySnapshot {
    /// Feature dimension at capture time.
    pub dim: usize,
    /// Shared model state.
    pub shared: SharedModelState,
    /// Per-arm model state, indexed by engine.
    pub arms: Vec<ArmModelState>,
}

/// Hybrid LinUCB policy state: one shared model plus one model per engine.
///
/// Usage per round:
/// - `rank(x)` to get the attempt order,
/// - `update(engine, x, reward)` once per engine actually attempted, in
///   attempt order, immediately after each attempt's reward is known.
#[derive(Debug, Clone)]
pub struct HybridLinUcb {
    cfg: HybridLinUcbConfig,
    rng: StdRng,
    shared: SharedModel,
    arms: Vec<ArmModel>,
}

impl HybridLinUcb {
    /// Create a policy for a portfolio of `portfolio_size` engines.
    ///
    /// Rejects an empty portfolio, a zero feature dimension, and a
    /// non-positive `alpha` before any round runs.
    pub fn new(cfg: HybridLinUcbConfig, portfolio_size: usize) -> Result<Self, ConfigError> {
        if portfolio_size == 0 {
            return Err(ConfigError::EmptyPortfolio);
        }
        if cfg.dim == 0 {
            return Err(ConfigError::ZeroFeatureDim);
        }
        if !cfg.alpha.is_finite() || cfg.alpha <= 0.0 {
            return Err(ConfigError::NonPositiveAlpha(cfg.alpha));
        }
        Ok(Self {
            rng: StdRng::seed_from_u64(cfg.seed),
            shared: SharedModel::new(cfg.dim),
            arms: (0..portfolio_size).map(|_| ArmModel::new(cfg.dim)).collect(),
            cfg,
        })
    }

    /// Portfolio size K.
    pub fn portfolio_size(&self) -> usize {
        self.arms.len()
    }

    /// Feature dimension d.
    pub fn dim(&self) -> usize {
        self.cfg.dim
    }

    /// Number of updates applied to `engine` so far (0 if out of range).
    pub fn engine_uses(&self, engine: usize) -> u64 {
        self.arms.get(engine).map(|a| a.uses).unwrap_or(0)
    }

    /// Fix the length to `dim`, map missing or non-finite components to 0.
    fn sanitize(&self, x: &[f64]) -> Vec<f64> {
        let d = self.cfg.dim;
        let mut out = vec![0.0; d];
        for (i, v) in out.iter_mut().enumerate() {
            let raw = x.get(i).copied().unwrap_or(0.0);
            *v = if raw.is_finite() { raw } else { 0.0 };
        }
        out
    }

    /// Per-engine `(score, predicted, bonus)` for a feature vector.
    ///
    /// Scores are recomputed from the accumulated matrices on every call;
    /// nothing is cached across updates.
    pub fn scores(&self, x: &[f64]) -> Result<Vec<EngineScore>, PolicyError> {
        let d = self.cfg.dim;
        let x = self.sanitize(x);

        let a0_inv =
            invert_ridge(&self.shared.a0, d).ok_or_else(|| PolicyError::SingularModel {
                matrix: "A0".to_string(),
            })?;
        let beta = mat_vec(&a0_inv, d, &self.shared.b0);
        let beta_x = dot(&beta, &x);
        let a0inv_x = mat_vec(&a0_inv, d, &x);
        let shared_var = dot(&x, &a0inv_x);

        let mut out = Vec::with_capacity(self.arms.len());
        for (i, arm) in self.arms.iter().enumerate() {
            let a_inv = invert_ridge(&arm.a, d).ok_or_else(|| PolicyError::SingularModel {
                matrix: format!("A[{i}]"),
            })?;

            // theta = A^-1 (B - C beta): the arm's own estimate after
            // removing what the shared model already explains.
            let c_beta = mat_vec(&arm.c, d, &beta);
            let mut resid = arm.b.clone();
            sub_assign(&mut resid, &c_beta);
            let theta = mat_vec(&a_inv, d, &resid);
            let predicted = dot(&theta, &x) + beta_x;

            // Propagated variance of the joint global+local estimator.
            let ainv_x = mat_vec(&a_inv, d, &x);
            let c_a0inv_x = mat_vec(&arm.c, d, &a0inv_x);
            let cross = dot(&c_a0inv_x, &ainv_x);
            let local_var = dot(&x, &ainv_x);
            let u = mat_tvec(&arm.c, d, &ainv_x);
            let back = quad_form(&a0_inv, d, &u);
            let s = (shared_var - 2.0 * cross + local_var + back).max(0.0);

            let bonus = self.cfg.alpha * s.sqrt();
            out.push((predicted + bonus, predicted, bonus));
        }
        Ok(out)
    }

    /// Rank all engines for a feature vector, returning a permutation of
    /// `0..K` in attempt order.
    ///
    /// Direction follows [`HybridLinUcbConfig::rank_order`]; ties within
    /// [`TIEBREAK_EPS`] break toward the lower engine index, so the order is
    /// deterministic for a given model state.
    pub fn rank(&self, x: &[f64]) -> Result<Vec<usize>, PolicyError> {
        let scores = self.scores(x)?;
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| {
            let (sa, sb) = (scores[a].0, scores[b].0);
            if (sa - sb).abs() <= TIEBREAK_EPS {
                return a.cmp(&b);
            }
            match self.cfg.rank_order {
                RankOrder::LowestFirst => sa.total_cmp(&sb),
                RankOrder::HighestFirst => sb.total_cmp(&sa),
            }
        });
        Ok(order)
    }

    /// Sample an attempt order without replacement from a softmax over
    /// scores (seeded, reproducible).
    ///
    /// Under [`RankOrder::LowestFirst`] lower scores get higher weight, so
    /// the expected order agrees with [`rank`][Self::rank] while still
    /// occasionally swapping near-ties. `temperature <= 0` degenerates to
    /// the deterministic order.
    pub fn rank_softmax(&mut self, x: &[f64], temperature: f64) -> Result<Vec<usize>, PolicyError> {
        if !temperature.is_finite() || temperature <= 0.0 {
            return self.rank(x);
        }
        let scores = self.scores(x)?;
        let sign = match self.cfg.rank_order {
            RankOrder::LowestFirst => -1.0,
            RankOrder::HighestFirst => 1.0,
        };

        let mut remaining: Vec<usize> = (0..scores.len()).collect();
        let mut order = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            // Stable softmax over the remaining engines.
            let max_logit = remaining
                .iter()
                .map(|&i| sign * scores[i].0 / temperature)
                .fold(f64::NEG_INFINITY, f64::max);
            let weights: Vec<f64> = remaining
                .iter()
                .map(|&i| (sign * scores[i].0 / temperature - max_logit).exp())
                .collect();
            let total: f64 = weights.iter().sum();

            let pick = if total.is_finite() && total > 0.0 {
                let r: f64 = self.rng.random::<f64>() * total;
                let mut cdf = 0.0;
                let mut pick = remaining.len() - 1;
                for (j, w) in weights.iter().enumerate() {
                    cdf += w;
                    if r < cdf {
                        pick = j;
                        break;
                    }
                }
                pick
            } else {
                0
            };
            order.push(remaining.remove(pick));
        }
        Ok(order)
    }

    /// Apply the hybrid rank-one update for one attempted engine.
    ///
    /// Sequence (order matters: the first two shared-model terms read the
    /// *pre-update* arm matrices, the last two read the *post-update* ones):
    ///
    /// ```text
    /// A0 += C' A^-1 C
    /// B0 += C' A^-1 B
    /// A  += x x'
    /// B  += reward x
    /// C  += x x'
    /// A0 += x x' - C' A^-1 C      (new A, C)
    /// B0 += reward x - C' A^-1 B  (new A, B, C)
    /// ```
    ///
    /// Call once per engine actually attempted in a round, in attempt order,
    /// immediately after that attempt's reward is known. Later attempts in
    /// the same round must observe earlier attempts' updates, so this must
    /// not be deferred to round end.
    pub fn update(&mut self, engine: usize, x: &[f64], reward: f64) -> Result<(), PolicyError> {
        let d = self.cfg.dim;
        let k = self.arms.len();
        if engine >= k {
            return Err(PolicyError::UnknownEngine {
                engine,
                portfolio: k,
            });
        }
        let x = self.sanitize(x);
        let r = if reward.is_finite() {
            reward.clamp(0.0, 1.0)
        } else {
            0.0
        };

        // Shared model absorbs the arm's pre-update contribution.
        let (pre_m, pre_v) = {
            let arm = &self.arms[engine];
            let a_inv = invert_ridge(&arm.a, d).ok_or_else(|| PolicyError::SingularModel {
                matrix: format!("A[{engine}]"),
            })?;
            let ct_ainv = mat_mul(&transpose(&arm.c, d), &a_inv, d);
            (mat_mul(&ct_ainv, &arm.c, d), mat_vec(&ct_ainv, d, &arm.b))
        };
        add_assign(&mut self.shared.a0, &pre_m);
        add_assign(&mut self.shared.b0, &pre_v);

        // Arm accumulates the new observation.
        {
            let arm = &mut self.arms[engine];
            add_outer(&mut arm.a, d, &x, 1.0);
            axpy(&mut arm.b, r, &x);
            add_outer(&mut arm.c, d, &x, 1.0);
            arm.uses = arm.uses.saturating_add(1);
        }

        // Shared model corrected with the post-update arm matrices.
        let (post_m, post_v) = {
            let arm = &self.arms[engine];
            let a_inv = invert_ridge(&arm.a, d).ok_or_else(|| PolicyError::SingularModel {
                matrix: format!("A[{engine}]"),
            })?;
            let ct_ainv = mat_mul(&transpose(&arm.c, d), &a_inv, d);
            (mat_mul(&ct_ainv, &arm.c, d), mat_vec(&ct_ainv, d, &arm.b))
        };
        add_outer(&mut self.shared.a0, d, &x, 1.0);
        sub_assign(&mut self.shared.a0, &post_m);
        axpy(&mut self.shared.b0, r, &x);
        sub_assign(&mut self.shared.b0, &post_v);

        Ok(())
    }

    /// Capture a persistence snapshot of the full model state.
    pub fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            dim: self.cfg.dim,
            shared: self.shared.snapshot(),
            arms: self.arms.iter().map(ArmModel::snapshot).collect(),
        }
    }

    /// Restore a previously captured snapshot.
    ///
    /// The snapshot must match this policy's dimension and portfolio size
    /// exactly; a mismatch is an error rather than a partial restore, since
    /// resumption is only meaningful bit-for-bit.
    pub fn restore(&mut self, snap: PolicySnapshot) -> Result<(), PolicyError> {
        let d = self.cfg.dim;
        let k = self.arms.len();
        let shape_ok = snap.dim == d
            && snap.arms.len() == k
            && snap.shared.a0.len() == d * d
            && snap.shared.b0.len() == d
            && snap
                .arms
                .iter()
                .all(|a| a.a.len() == d * d && a.b.len() == d && a.c.len() == d * d);
        if !shape_ok {
            return Err(PolicyError::SnapshotMismatch {
                snapshot_dim: snap.dim,
                dim: d,
                snapshot_arms: snap.arms.len(),
                arms: k,
            });
        }
        self.shared.a0 = snap.shared.a0;
        self.shared.b0 = snap.shared.b0;
        for (arm, st) in self.arms.iter_mut().zip(snap.arms) {
            arm.a = st.a;
            arm.b = st.b;
            arm.c = st.c;
            arm.uses = st.uses;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn shared_a0(&self) -> &[f64] {
        &self.shared.a0
    }

    #[cfg(test)]
    pub(crate) fn shared_b0(&self) -> &[f64] {
        &self.shared.b0
    }

    #[cfg(test)]
    pub(crate) fn arm(&self, engine: usize) -> &ArmModel {
        &self.arms[engine]
    }
}
