// crates/molt-drift/src/histogram.rs
//
// Cosine-similarity histogram and the divergence measures computed on it.

use serde::{Deserialize, Serialize};

pub use molt_core::embedding::{cosine_similarity, l2_norm};

/// Additive smoothing applied to both distributions before taking logs.
pub const KL_EPSILON: f64 = 1e-9;

/// Fixed-size histogram of cosine similarities over [-1, 1].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosineHistogram {
    counts: Vec<u64>,
}

impl CosineHistogram {
    /// Create an empty histogram with `buckets` buckets (at least 2).
    pub fn new(buckets: usize) -> Self {
        Self {
            counts: vec![0; buckets.max(2)],
        }
    }

    pub fn buckets(&self) -> usize {
        self.counts.len()
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Number of recorded pairs.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Bucket index for a cosine value: `round((cos + 1) / 2 * (B - 1))`.
    pub fn bucket_for(&self, cos: f64) -> usize {
        let last = self.counts.len() - 1;
        let c = cos.clamp(-1.0, 1.0);
        let idx = ((c + 1.0) / 2.0 * last as f64).round() as usize;
        idx.min(last)
    }

    /// Count one pair. Non-finite values are ignored.
    pub fn record(&mut self, cos: f64) {
        if !cos.is_finite() {
            return;
        }
        let idx = self.bucket_for(cos);
        self.counts[idx] += 1;
    }

    /// Probability mass per bucket. All zeros when empty.
    pub fn normalized(&self) -> Vec<f64> {
        let total = self.total();
        if total == 0 {
            return vec![0.0; self.counts.len()];
        }
        self.counts
            .iter()
            .map(|&c| c as f64 / total as f64)
            .collect()
    }
}

/// Center of bucket `i` out of `buckets`, on [-1, 1].
pub fn bucket_center(i: usize, buckets: usize) -> f64 {
    if buckets < 2 {
        return 0.0;
    }
    -1.0 + 2.0 * i as f64 / (buckets - 1) as f64
}

/// `KL(p ‖ q)` with additive smoothing, clamped to be non-negative.
///
/// Histograms of unequal length are compared on their common prefix.
pub fn kl_divergence(p: &[f64], q: &[f64]) -> f64 {
    let n = p.len().min(q.len());
    if n == 0 {
        return 0.0;
    }
    let p_sum: f64 = p[..n].iter().map(|v| v.max(0.0) + KL_EPSILON).sum();
    let q_sum: f64 = q[..n].iter().map(|v| v.max(0.0) + KL_EPSILON).sum();

    let kl: f64 = p[..n]
        .iter()
        .zip(&q[..n])
        .map(|(pi, qi)| {
            let ps = (pi.max(0.0) + KL_EPSILON) / p_sum;
            let qs = (qi.max(0.0) + KL_EPSILON) / q_sum;
            ps * (ps.ln() - qs.ln())
        })
        .sum();

    if kl.is_finite() {
        kl.max(0.0)
    } else {
        0.0
    }
}

/// Expected cosine value of a histogram, weighting bucket centers by mass.
pub fn expected_cosine(p: &[f64]) -> f64 {
    let mass: f64 = p.iter().sum();
    if mass <= 0.0 {
        return 0.0;
    }
    p.iter()
        .enumerate()
        .map(|(i, w)| w * bucket_center(i, p.len()))
        .sum::<f64>()
        / mass
}

/// Absolute difference of expected cosines; a cheap earth-mover proxy.
pub fn cosine_shift(p: &[f64], q: &[f64]) -> f64 {
    (expected_cosine(p) - expected_cosine(q)).abs()
}
