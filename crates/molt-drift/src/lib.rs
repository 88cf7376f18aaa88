// crates/molt-drift/src/lib.rs
//
// molt-drift: Drift detection and molting for Molt.
//
// This crate keeps a live vector index healthy: it fingerprints each
// namespace's embedding distribution (norms, reservoir sample, cosine
// histogram) to detect drift, and orchestrates "molting": re-embedding a
// namespace into a shadow, gating it with canary queries, and promoting it
// through an atomic alias switch.

pub mod canary;
pub mod cutover;
pub mod detection;
pub mod histogram;
pub mod molting;
pub mod registry;
pub mod saga;
pub mod shadow;
pub mod updater;

pub use canary::{load_canaries, median, Canary, CanaryEvaluator, CanaryResult};
pub use cutover::{BlueGreenCutover, CutoverOutcome};
pub use detection::{DriftConfig, DriftMonitor, DriftReport, DriftSnapshot, DriftState};
pub use histogram::CosineHistogram;
pub use molting::{
    decide, Decision, GateThresholds, ReembedJob, ReembedSummary, ReembeddingOrchestrator,
    RunPhase,
};
pub use registry::DriftRegistry;
pub use saga::{Saga, SagaStep};
pub use shadow::{BuildReport, ShadowIndexBuilder};
pub use updater::{DriftSample, DriftSampler, DriftUpdater};
