//! Ridge-regression sufficient statistics for the hybrid policy.
//!
//! Two kinds of state, both flat row-major matrices sized by the feature
//! dimension `d`:
//!
//! - [`SharedModel`]: one global estimator (`A0`, `B0`) capturing feature
//!   effects common to every engine.
//! - [`ArmModel`]: per-engine estimator (`A`, `B`) plus the cross matrix `C`
//!   that ties the arm's observations back into the shared model.
//!
//! `A0` and every `A` start as the identity (the ridge prior) and only ever
//! accumulate positive-semidefinite rank-one terms, so they stay symmetric
//! positive-definite and invertible. Both are mutated exclusively by
//! [`HybridLinUcb::update`][crate::HybridLinUcb::update].
//!
//! The crate uses a single feature space for both roles: the same vector `x`
//! serves as the shared features and the arm features, so `C` accumulates the
//! same outer products as `A`. That collapses the general hybrid formulation
//! to one feature space; it is an intentional simplification, not an
//! accident of the update rule.

use crate::linalg::identity;

/// Global ridge-regression state shared across all engines.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedModel {
    /// `A0`: d x d design matrix, identity-initialized, always SPD.
    pub(crate) a0: Vec<f64>,
    /// `B0`: d-vector of reward-weighted features, zero-initialized.
    pub(crate) b0: Vec<f64>,
}

impl SharedModel {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            a0: identity(dim),
            b0: vec![0.0; dim],
        }
    }
}

/// Per-engine ridge-regression state.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmModel {
    /// `A`: d x d design matrix, identity-initialized, always SPD.
    pub(crate) a: Vec<f64>,
    /// `B`: d-vector of reward-weighted features, zero-initialized.
    pub(crate) b: Vec<f64>,
    /// `C`: d x d cross matrix linking this arm to the shared model,
    /// zero-initialized.
    pub(crate) c: Vec<f64>,
    /// Number of updates applied to this arm.
    pub(crate) uses: u64,
}

impl ArmModel {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            a: identity(dim),
            b: vec![0.0; dim],
            c: vec![0.0; dim * dim],
            uses: 0,
        }
    }
}

/// Serializable snapshot of the shared model.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SharedModelState {
    /// `A0` (d x d, row-major).
    pub a0: Vec<f64>,
    /// `B0` (d).
    pub b0: Vec<f64>,
}

/// Serializable snapshot of one arm's model.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArmModelState {
    /// `A` (d x d, row-major).
    pub a: Vec<f64>,
    /// `B` (d).
    pub b: Vec<f64>,
    /// `C` (d x d, row-major).
    pub c: Vec<f64>,
    /// Number of updates applied to this arm.
    pub uses: u64,
}

impl SharedModel {
    pub(crate) fn snapshot(&self) -> SharedModelState {
        SharedModelState {
            a0: self.a0.clone(),
            b0: self.b0.clone(),
        }
    }
}

impl ArmModel {
    pub(crate) fn snapshot(&self) -> ArmModelState {
        ArmModelState {
            a: self.a.clone(),
            b: self.b.clone(),
            c: self.c.clone(),
            uses: self.uses,
        }
    }
}
