// crates/molt-drift/src/detection.rs
//
// Embedding-distribution drift detection.
//
// Each namespace keeps a bounded fingerprint of what is being written to it:
// a FIFO of vector norms, a uniform reservoir sample of vectors, and a
// histogram of cosine similarities between each new vector and a random
// reservoir member. Once enough samples arrive the histogram is frozen as the
// namespace's baseline; drift is the divergence of the live histogram from
// that baseline.
//
// Recording is monitoring: it never fails and never blocks on I/O.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use molt_core::traits::TelemetrySink;

use crate::histogram::{cosine_shift, cosine_similarity, kl_divergence, l2_norm, CosineHistogram};
use crate::registry::DriftRegistry;

/// Sizing and throttling for drift fingerprints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Capacity of the norms FIFO (N).
    pub norm_cap: usize,
    /// Number of histogram buckets spanning [-1, 1] (B).
    pub buckets: usize,
    /// Minimum wall-clock gap between two drift emissions for one namespace.
    pub emit_interval: Duration,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            norm_cap: 5000,
            buckets: 21,
            emit_interval: Duration::from_secs(300),
        }
    }
}

impl DriftConfig {
    /// Reservoir capacity: `clamp(floor(sqrt(N)), 50, 500)`.
    pub fn reservoir_cap(&self) -> usize {
        ((self.norm_cap as f64).sqrt() as usize).clamp(50, 500)
    }

    /// Samples required before the baseline freezes: `max(200, N / 10)`.
    pub fn baseline_min_samples(&self) -> u64 {
        (self.norm_cap as u64 / 10).max(200)
    }
}

/// Bounded statistical fingerprint of one namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftState {
    norms: VecDeque<f64>,
    norm_cap: usize,
    reservoir: Vec<Vec<f32>>,
    reservoir_cap: usize,
    histogram: CosineHistogram,
    baseline: Option<Vec<f64>>,
    baseline_min_samples: u64,
    last_emit: Option<DateTime<Utc>>,
    seen: u64,
}

impl DriftState {
    pub fn new(config: &DriftConfig) -> Self {
        let norm_cap = config.norm_cap.max(1);
        Self {
            norms: VecDeque::with_capacity(norm_cap.min(1024)),
            norm_cap,
            reservoir: Vec::new(),
            reservoir_cap: config.reservoir_cap(),
            histogram: CosineHistogram::new(config.buckets),
            baseline: None,
            baseline_min_samples: config.baseline_min_samples(),
            last_emit: None,
            seen: 0,
        }
    }

    /// Record one vector. Returns `true` if this sample froze the baseline.
    pub fn record<R: Rng + ?Sized>(&mut self, vector: &[f32], rng: &mut R) -> bool {
        self.seen += 1;

        self.norms.push_back(l2_norm(vector));
        while self.norms.len() > self.norm_cap {
            self.norms.pop_front();
        }

        // Algorithm R: the k-th sample is retained with probability cap / k.
        let inserted = if self.reservoir.len() < self.reservoir_cap {
            self.reservoir.push(vector.to_vec());
            Some(self.reservoir.len() - 1)
        } else {
            let j = rng.gen_range(0..self.seen);
            if (j as usize) < self.reservoir_cap {
                self.reservoir[j as usize] = vector.to_vec();
                Some(j as usize)
            } else {
                None
            }
        };

        let len = self.reservoir.len();
        if len >= 2 {
            let other = match inserted {
                Some(own) => {
                    let k = rng.gen_range(0..len - 1);
                    if k >= own {
                        k + 1
                    } else {
                        k
                    }
                }
                None => rng.gen_range(0..len),
            };
            let cos = cosine_similarity(vector, &self.reservoir[other]);
            self.histogram.record(cos);
        }

        if self.baseline.is_none()
            && self.seen >= self.baseline_min_samples
            && self.histogram.total() > 0
        {
            self.baseline = Some(self.histogram.normalized());
            return true;
        }
        false
    }

    pub fn samples_seen(&self) -> u64 {
        self.seen
    }

    pub fn norms_len(&self) -> usize {
        self.norms.len()
    }

    pub fn reservoir_len(&self) -> usize {
        self.reservoir.len()
    }

    pub fn reservoir_cap(&self) -> usize {
        self.reservoir_cap
    }

    pub fn norm_cap(&self) -> usize {
        self.norm_cap
    }

    pub fn histogram(&self) -> &CosineHistogram {
        &self.histogram
    }

    pub fn baseline(&self) -> Option<&[f64]> {
        self.baseline.as_deref()
    }

    pub fn last_emit(&self) -> Option<DateTime<Utc>> {
        self.last_emit
    }

    fn mean_norm(&self) -> Option<f64> {
        if self.norms.is_empty() {
            return None;
        }
        Some(self.norms.iter().sum::<f64>() / self.norms.len() as f64)
    }
}

/// One drift measurement for a namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub namespace: String,
    pub kl: f64,
    pub cosine_shift: f64,
    pub samples_seen: u64,
    pub emitted_at: DateTime<Utc>,
}

/// Read-only diagnostic view of a namespace's drift state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftSnapshot {
    pub namespace: String,
    pub samples_seen: u64,
    pub norms_len: usize,
    pub reservoir_len: usize,
    pub pairs: u64,
    pub mean_norm: Option<f64>,
    pub histogram: Vec<f64>,
    pub has_baseline: bool,
    pub last_emit: Option<DateTime<Utc>>,
}

/// Records samples into a `DriftRegistry` and computes drift on demand.
pub struct DriftMonitor {
    registry: Arc<DriftRegistry>,
    config: DriftConfig,
    telemetry: Arc<dyn TelemetrySink>,
}

impl DriftMonitor {
    pub fn new(
        registry: Arc<DriftRegistry>,
        config: DriftConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            registry,
            config,
            telemetry,
        }
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DriftRegistry> {
        &self.registry
    }

    /// Record one written vector for `namespace`.
    ///
    /// Empty or non-finite vectors are ignored.
    pub fn record_sample(&self, namespace: &str, vector: &[f32]) {
        if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
            tracing::trace!(namespace, "ignoring unusable drift sample");
            return;
        }

        let state = self
            .registry
            .get_or_create(namespace, || DriftState::new(&self.config));
        let froze = state.lock().record(vector, &mut rand::thread_rng());

        if froze {
            tracing::info!(namespace, "drift baseline frozen");
        }
    }

    /// Emit `drift.{namespace}` if a baseline exists and the namespace has
    /// not emitted within the configured interval.
    pub fn maybe_emit_drift(&self, namespace: &str) -> Option<DriftReport> {
        self.maybe_emit_drift_at(namespace, Utc::now())
    }

    /// [`maybe_emit_drift`](Self::maybe_emit_drift) against an explicit clock.
    pub fn maybe_emit_drift_at(&self, namespace: &str, now: DateTime<Utc>) -> Option<DriftReport> {
        let state = self.registry.get(namespace)?;
        let report = {
            let mut state = state.lock();
            let baseline = state.baseline.clone()?;

            if let Some(last) = state.last_emit {
                match now.signed_duration_since(last).to_std() {
                    Ok(elapsed) if elapsed >= self.config.emit_interval => {}
                    _ => return None,
                }
            }

            let current = state.histogram.normalized();
            state.last_emit = Some(now);
            DriftReport {
                namespace: namespace.to_string(),
                kl: kl_divergence(&baseline, &current),
                cosine_shift: cosine_shift(&baseline, &current),
                samples_seen: state.seen,
                emitted_at: now,
            }
        };

        tracing::debug!(
            namespace,
            kl = report.kl,
            cosine_shift = report.cosine_shift,
            "drift measured"
        );
        self.telemetry.emit(
            &format!("drift.{}", namespace),
            json!({ "kl": report.kl, "cosineShift": report.cosine_shift }),
        );
        Some(report)
    }

    /// Whether `namespace` has a frozen baseline.
    pub fn has_baseline(&self, namespace: &str) -> bool {
        self.registry
            .get(namespace)
            .map(|state| state.lock().baseline.is_some())
            .unwrap_or(false)
    }

    /// Diagnostic snapshot. Never mutates state.
    pub fn snapshot_stats(&self, namespace: &str) -> Option<DriftSnapshot> {
        let state = self.registry.get(namespace)?;
        let state = state.lock();
        Some(DriftSnapshot {
            namespace: namespace.to_string(),
            samples_seen: state.seen,
            norms_len: state.norms.len(),
            reservoir_len: state.reservoir.len(),
            pairs: state.histogram.total(),
            mean_norm: state.mean_norm(),
            histogram: state.histogram.normalized(),
            has_baseline: state.baseline.is_some(),
            last_emit: state.last_emit,
        })
    }

    /// `(kl, cosine_shift)` of `candidate`'s live histogram against
    /// `reference`'s frozen baseline.
    ///
    /// Returns `(0.0, 0.0)` when the reference has no baseline or the
    /// candidate has recorded no pairs.
    pub fn compare(&self, reference: &str, candidate: &str) -> (f64, f64) {
        let baseline = match self
            .registry
            .get(reference)
            .and_then(|s| {
                let baseline = s.lock().baseline.clone();
                baseline
            })
        {
            Some(b) => b,
            None => return (0.0, 0.0),
        };

        let current = match self.registry.get(candidate) {
            Some(s) => {
                let state = s.lock();
                if state.histogram.total() == 0 {
                    return (0.0, 0.0);
                }
                state.histogram.normalized()
            }
            None => return (0.0, 0.0),
        };

        (
            kl_divergence(&baseline, &current),
            cosine_shift(&baseline, &current),
        )
    }

    /// Forget everything recorded for `namespace`, including its baseline.
    pub fn reset(&self, namespace: &str) {
        if self.registry.remove(namespace) {
            tracing::debug!(namespace, "drift state reset");
        }
    }
}
