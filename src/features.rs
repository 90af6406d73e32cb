//! Feature vectors and their online normalization.
//!
//! Feature extraction itself is an external collaborator: something turns a
//! raw problem instance into a fixed-length vector of non-negative structural
//! probe readings (term counts, depths, bit-widths, whatever the probe set
//! measures). The core never interprets individual probes; it only needs the
//! vector and its dimension. See [`FeatureExtractor`].
//!
//! What the core does own is scaling. Probe readings have wildly different
//! magnitudes and no known global maximum, so [`FeatureScaler`] normalizes
//! each component by the running maximum observed over a bounded window of
//! recent rounds. This bounds magnitudes online without a fixed global max,
//! at the cost of the scale drifting as the window rolls — acceptable for a
//! policy that relearns continuously anyway.

use std::collections::VecDeque;

/// Guard against division by zero when a probe reads zero across the window.
const SCALE_EPS: f64 = 1e-10;

/// External collaborator contract: turn one problem instance into a raw,
/// fixed-length, non-negative probe vector.
///
/// Must be deterministic for a given problem; called once per round.
pub trait FeatureExtractor {
    /// Probe the problem, returning `dim()` non-negative readings.
    fn extract(&mut self, problem: &str) -> Vec<f64>;

    /// Length of the vectors `extract` returns.
    fn dim(&self) -> usize;
}

/// Running-max normalizer over a bounded window of recent probe vectors.
///
/// `observe` pushes a raw vector and returns it scaled component-wise by the
/// maximum seen across the retained window (including the new vector), so
/// every output component lies in `[0, 1]` when inputs are non-negative.
///
/// # Example
///
/// ```rust
/// use solvermux::FeatureScaler;
///
/// let mut scaler = FeatureScaler::new(3, 5);
/// let first = scaler.observe(&[2.0, 0.0, 8.0]);
/// // Each component is its own running max so far.
/// assert!((first[0] - 1.0).abs() < 1e-6);
/// assert!((first[2] - 1.0).abs() < 1e-6);
///
/// let second = scaler.observe(&[1.0, 0.0, 16.0]);
/// assert!((second[0] - 0.5).abs() < 1e-6);
/// assert!((second[2] - 1.0).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct FeatureScaler {
    dim: usize,
    cap: usize,
    recent: VecDeque<Vec<f64>>,
}

impl FeatureScaler {
    /// Create a scaler for `dim`-length vectors retaining `cap` recent rounds
    /// (minimum 1).
    pub fn new(dim: usize, cap: usize) -> Self {
        Self {
            dim,
            cap: cap.max(1),
            recent: VecDeque::new(),
        }
    }

    /// Vector length this scaler expects.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of raw vectors currently retained.
    pub fn len(&self) -> usize {
        self.recent.len()
    }

    /// Whether no vectors have been observed yet.
    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    /// Sanitize a raw vector: fix the length to `dim`, map non-finite or
    /// negative readings to 0.
    fn sanitize(&self, raw: &[f64]) -> Vec<f64> {
        let mut x = vec![0.0; self.dim];
        for (i, v) in x.iter_mut().enumerate() {
            let r = raw.get(i).copied().unwrap_or(0.0);
            *v = if r.is_finite() && r > 0.0 { r } else { 0.0 };
        }
        x
    }

    /// Push a raw probe vector and return its normalized form.
    ///
    /// The new vector participates in its own maximum, so outputs are always
    /// in `[0, 1]`. The oldest vector is evicted once `cap` is exceeded.
    pub fn observe(&mut self, raw: &[f64]) -> Vec<f64> {
        let x = self.sanitize(raw);
        self.recent.push_back(x.clone());
        if self.recent.len() > self.cap {
            self.recent.pop_front();
        }

        let mut out = vec![0.0; self.dim];
        for (i, o) in out.iter_mut().enumerate() {
            let mut max = 0.0f64;
            for v in &self.recent {
                if v[i] > max {
                    max = v[i];
                }
            }
            *o = x[i] / (max + SCALE_EPS);
        }
        out
    }
}
