// crates/molt-drift/src/molting.rs
//
// Molting orchestration: re-embed a namespace into a shadow, gate the shadow
// with canaries and drift, and promote it through an alias switch.
//
// Molting is the process of re-embedding a live namespace when a new
// embedding model supersedes the old one, analogous to an arthropod shedding
// its exoskeleton. The old namespace stays untouched until the alias moves.

use std::fmt;
use std::sync::Arc;

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use molt_core::error::MoltError;
use molt_core::traits::{Embedder, TelemetrySink, VectorStore};
use molt_resilience::ResilienceConfig;

use crate::canary::{median, Canary, CanaryEvaluator};
use crate::cutover::BlueGreenCutover;
use crate::detection::DriftMonitor;
use crate::saga::Saga;
use crate::shadow::ShadowIndexBuilder;

/// Terminal verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Pass,
    Fail,
    Error,
    Disabled,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Pass => "pass",
            Decision::Fail => "fail",
            Decision::Error => "error",
            Decision::Disabled => "disabled",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phases of a run, in order. Each one is recorded as a saga step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    ShadowBuilding,
    Evaluating,
    Deciding,
    CuttingOver,
    Done,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Init => "init",
            RunPhase::ShadowBuilding => "shadow_building",
            RunPhase::Evaluating => "evaluating",
            RunPhase::Deciding => "deciding",
            RunPhase::CuttingOver => "cutting_over",
            RunPhase::Done => "done",
        }
    }
}

/// Pass/fail gate. All three conditions must hold for a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateThresholds {
    /// Maximum KL divergence of the shadow against the source baseline.
    pub kl_max: f64,
    /// Minimum `recall(shadow) - recall(source)`.
    pub recall_delta_min: f64,
    /// Maximum `median(shadow) - median(source)` search latency, in ms.
    pub latency_delta_max_ms: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            kl_max: 0.1,
            recall_delta_min: 0.0,
            latency_delta_max_ms: 50.0,
        }
    }
}

/// One re-embedding job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReembedJob {
    pub source_ns: String,
    pub shadow_ns: String,
    pub alias: String,
    pub batch_size: usize,
    /// Search depth for canary evaluation.
    pub k: usize,
    pub thresholds: GateThresholds,
    /// Promotion threshold, applied after a pass. Tuned separately from
    /// `thresholds.recall_delta_min`.
    pub min_recall_delta: f64,
}

impl Default for ReembedJob {
    fn default() -> Self {
        Self {
            source_ns: "memories_v1".to_string(),
            shadow_ns: "memories_v2".to_string(),
            alias: "memories".to_string(),
            batch_size: 64,
            k: 10,
            thresholds: GateThresholds::default(),
            min_recall_delta: 0.0,
        }
    }
}

/// Result of one run. Emitted once as `reembed.summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReembedSummary {
    pub correlation_id: String,
    pub decision: Decision,
    pub kl: f64,
    pub cosine_shift: f64,
    pub median_latency_shadow_ms: Option<f64>,
    pub median_latency_source_ms: Option<f64>,
    pub recall_source: f64,
    pub recall_shadow: f64,
    pub recall_delta: f64,
    pub alias: String,
    pub alias_before: Option<String>,
    pub alias_after: Option<String>,
    pub switched: bool,
    pub shadow_ns: String,
    pub source_ns: String,
    pub error: Option<String>,
}

impl ReembedSummary {
    fn new(correlation_id: String, job: &ReembedJob) -> Self {
        Self {
            correlation_id,
            decision: Decision::Error,
            kl: 0.0,
            cosine_shift: 0.0,
            median_latency_shadow_ms: None,
            median_latency_source_ms: None,
            recall_source: 0.0,
            recall_shadow: 0.0,
            recall_delta: 0.0,
            alias: job.alias.clone(),
            alias_before: None,
            alias_after: None,
            switched: false,
            shadow_ns: job.shadow_ns.clone(),
            source_ns: job.source_ns.clone(),
            error: None,
        }
    }
}

/// Apply the gate. A NaN input never passes.
pub fn decide(kl: f64, recall_delta: f64, latency_delta_ms: f64, gate: &GateThresholds) -> Decision {
    if kl <= gate.kl_max
        && recall_delta >= gate.recall_delta_min
        && latency_delta_ms <= gate.latency_delta_max_ms
    {
        Decision::Pass
    } else {
        Decision::Fail
    }
}

/// Marks a (source, shadow) pair busy for the lifetime of the guard.
struct RunGuard<'a> {
    in_flight: &'a DashSet<(String, String)>,
    key: (String, String),
}

impl<'a> RunGuard<'a> {
    fn acquire(in_flight: &'a DashSet<(String, String)>, source: &str, shadow: &str) -> Option<Self> {
        let key = (source.to_string(), shadow.to_string());
        if in_flight.insert(key.clone()) {
            Some(Self { in_flight, key })
        } else {
            None
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// Orchestrates re-embedding runs.
///
/// Safe to share across tasks. Runs for different namespace pairs proceed
/// in parallel; a second run for a pair already in flight is refused.
pub struct ReembeddingOrchestrator {
    builder: ShadowIndexBuilder,
    evaluator: CanaryEvaluator,
    cutover: BlueGreenCutover,
    drift: Arc<DriftMonitor>,
    store: Arc<dyn VectorStore>,
    telemetry: Arc<dyn TelemetrySink>,
    enabled: bool,
    in_flight: DashSet<(String, String)>,
}

impl ReembeddingOrchestrator {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        drift: Arc<DriftMonitor>,
        resilience: ResilienceConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let builder = ShadowIndexBuilder::new(
            store.clone(),
            embedder.clone(),
            resilience.clone(),
            telemetry.clone(),
        )
        .with_drift_monitor(drift.clone());
        let evaluator = CanaryEvaluator::new(embedder, store.clone())
            .with_call_timeout(resilience.attempt_timeout);
        let cutover = BlueGreenCutover::new(store.clone(), resilience, telemetry.clone());

        Self {
            builder,
            evaluator,
            cutover,
            drift,
            store,
            telemetry,
            enabled: true,
            in_flight: DashSet::new(),
        }
    }

    /// Administratively enable or disable runs.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Execute one job to completion. Never fails; errors are reported in
    /// the summary with `decision = error`.
    pub async fn run(
        &self,
        job: &ReembedJob,
        canaries: &[Canary],
        cancel: &CancellationToken,
    ) -> ReembedSummary {
        let mut saga = Saga::begin(self.telemetry.clone());
        let mut summary = ReembedSummary::new(saga.correlation_id().to_string(), job);

        saga.record(
            RunPhase::Init.as_str(),
            true,
            json!({
                "sourceNs": job.source_ns,
                "shadowNs": job.shadow_ns,
                "alias": job.alias,
                "enabled": self.enabled,
                "canaries": canaries.len(),
            }),
        );

        if !self.enabled {
            tracing::info!(source = %job.source_ns, shadow = %job.shadow_ns, "re-embedding disabled");
            summary.decision = Decision::Disabled;
            return self.finish(saga, summary);
        }

        let _guard = match RunGuard::acquire(&self.in_flight, &job.source_ns, &job.shadow_ns) {
            Some(guard) => guard,
            None => {
                let message = format!(
                    "a run for {} -> {} is already in progress",
                    job.source_ns, job.shadow_ns
                );
                tracing::warn!("{}", message);
                saga.record(RunPhase::Init.as_str(), false, json!({ "error": message }));
                summary.error = Some(message);
                return self.finish(saga, summary);
            }
        };

        summary.alias_before = self.read_alias(&job.alias).await;

        let mut phase = RunPhase::Init;
        if let Err(e) = self
            .execute(job, canaries, cancel, &mut phase, &mut saga, &mut summary)
            .await
        {
            tracing::error!(
                phase = phase.as_str(),
                source = %job.source_ns,
                shadow = %job.shadow_ns,
                error = %e,
                "re-embedding run failed"
            );
            saga.record(phase.as_str(), false, json!({ "error": e.to_string() }));
            summary.decision = Decision::Error;
            summary.error = Some(e.to_string());
        }

        summary.alias_after = self.read_alias(&job.alias).await;
        self.finish(saga, summary)
    }

    async fn execute(
        &self,
        job: &ReembedJob,
        canaries: &[Canary],
        cancel: &CancellationToken,
        phase: &mut RunPhase,
        saga: &mut Saga,
        summary: &mut ReembedSummary,
    ) -> Result<(), MoltError> {
        check_cancelled(cancel, *phase)?;
        *phase = RunPhase::ShadowBuilding;
        tracing::info!(source = %job.source_ns, shadow = %job.shadow_ns, "building shadow");
        let fingerprinted = match self.builder.fingerprint_source(&job.source_ns).await {
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(source = %job.source_ns, error = %err, "source fingerprint failed");
                0
            }
        };
        let report = self
            .builder
            .build(&job.source_ns, &job.shadow_ns, job.batch_size)
            .await?;
        saga.record(
            phase.as_str(),
            true,
            json!({
                "fingerprinted": fingerprinted,
                "scanned": report.scanned,
                "written": report.written,
                "skipped": report.skipped,
                "batches": report.batches,
            }),
        );

        check_cancelled(cancel, *phase)?;
        *phase = RunPhase::Evaluating;
        let source = self.evaluator.evaluate(&job.source_ns, canaries, job.k).await;
        let shadow = self.evaluator.evaluate(&job.shadow_ns, canaries, job.k).await;
        let (kl, cosine_shift) = self.drift.compare(&job.source_ns, &job.shadow_ns);

        summary.recall_source = source.recall_at_k;
        summary.recall_shadow = shadow.recall_at_k;
        summary.recall_delta = shadow.recall_at_k - source.recall_at_k;
        summary.median_latency_source_ms = median(&source.latencies_ms);
        summary.median_latency_shadow_ms = median(&shadow.latencies_ms);
        summary.kl = kl;
        summary.cosine_shift = cosine_shift;
        saga.record(
            phase.as_str(),
            true,
            json!({
                "recallSource": summary.recall_source,
                "recallShadow": summary.recall_shadow,
                "failedSource": source.failed,
                "failedShadow": shadow.failed,
                "kl": kl,
                "cosineShift": cosine_shift,
            }),
        );

        check_cancelled(cancel, *phase)?;
        *phase = RunPhase::Deciding;
        let latency_delta = summary.median_latency_shadow_ms.unwrap_or(0.0)
            - summary.median_latency_source_ms.unwrap_or(0.0);
        summary.decision = decide(kl, summary.recall_delta, latency_delta, &job.thresholds);
        tracing::info!(
            decision = %summary.decision,
            kl,
            recall_delta = summary.recall_delta,
            latency_delta,
            "gate evaluated"
        );
        saga.record(
            phase.as_str(),
            true,
            json!({
                "decision": summary.decision,
                "recallDelta": summary.recall_delta,
                "latencyDeltaMs": latency_delta,
            }),
        );

        if summary.decision == Decision::Pass && summary.recall_delta >= job.min_recall_delta {
            check_cancelled(cancel, *phase)?;
            *phase = RunPhase::CuttingOver;
            let outcome = self
                .cutover
                .cutover(&job.alias, &job.shadow_ns, job.min_recall_delta)
                .await;
            summary.switched = outcome.switched;
            saga.record(
                phase.as_str(),
                outcome.switched,
                json!({
                    "previousTarget": outcome.previous_target,
                    "newTarget": outcome.new_target,
                }),
            );
        }

        *phase = RunPhase::Done;
        Ok(())
    }

    async fn read_alias(&self, alias: &str) -> Option<String> {
        match self.store.get_alias_target(alias).await {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(alias, error = %e, "could not read alias target");
                None
            }
        }
    }

    fn finish(&self, mut saga: Saga, summary: ReembedSummary) -> ReembedSummary {
        let ok = summary.decision == Decision::Pass;
        saga.record(
            RunPhase::Done.as_str(),
            summary.decision != Decision::Error,
            json!({ "decision": summary.decision, "switched": summary.switched }),
        );
        match serde_json::to_value(&summary) {
            Ok(payload) => self.telemetry.emit("reembed.summary", payload),
            Err(e) => tracing::warn!(error = %e, "could not serialize summary"),
        }
        saga.close(ok);
        tracing::info!(
            correlation_id = %summary.correlation_id,
            decision = %summary.decision,
            switched = summary.switched,
            "re-embedding run finished"
        );
        summary
    }
}

fn check_cancelled(cancel: &CancellationToken, phase: RunPhase) -> Result<(), MoltError> {
    if cancel.is_cancelled() {
        Err(MoltError::Cancelled(format!("cancelled after {}", phase.as_str())))
    } else {
        Ok(())
    }
}
