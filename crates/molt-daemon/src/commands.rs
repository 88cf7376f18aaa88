// crates/molt-daemon/src/commands.rs
//
// Subcommand handlers. Each one wires library components from the loaded
// configuration and prints its result as JSON on stdout.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use molt_core::traits::{Embedder, TelemetrySink, VectorStore};
use molt_core::{HashEmbedder, TracingTelemetry};
use molt_drift::{
    load_canaries, BlueGreenCutover, Decision, DriftMonitor, DriftRegistry, DriftUpdater,
    ReembedSummary, ReembeddingOrchestrator,
};
use molt_store::QdrantStore;

use crate::config::{EmbedderKind, EmbedderSection, MoltConfig, StoreSection};
use crate::embedder::HttpEmbedder;
use crate::expand_tilde;

type CommandResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Page size used by `drift-scan`.
const SCAN_PAGE: usize = 256;

pub fn build_store(section: &StoreSection) -> CommandResult<Arc<dyn VectorStore>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(section.request_timeout_secs))
        .build()?;
    let store = QdrantStore::new(&section.url, section.api_key.clone()).with_client(client);
    tracing::info!("Vector store: Qdrant at {}", store.base_url);
    Ok(Arc::new(store))
}

pub fn build_embedder(section: &EmbedderSection) -> CommandResult<Arc<dyn Embedder>> {
    match section.kind {
        EmbedderKind::Hash => {
            tracing::info!(
                "Embedder: hash model '{}' ({} dims)",
                section.model,
                section.dimension
            );
            Ok(Arc::new(HashEmbedder::new(&section.model, section.dimension)))
        }
        EmbedderKind::Http => {
            let api_key = std::env::var(&section.api_key_env).ok();
            if api_key.is_none() {
                tracing::warn!(
                    "{} is not set; calling {} without credentials",
                    section.api_key_env,
                    section.url
                );
            }
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(section.request_timeout_secs))
                .build()?;
            tracing::info!(
                "Embedder: HTTP model '{}' at {} ({} dims)",
                section.model,
                section.url,
                section.dimension
            );
            Ok(Arc::new(
                HttpEmbedder::new(&section.url, &section.model, section.dimension, api_key)
                    .with_client(client),
            ))
        }
    }
}

fn drift_monitor(config: &MoltConfig, telemetry: Arc<dyn TelemetrySink>) -> Arc<DriftMonitor> {
    Arc::new(DriftMonitor::new(
        Arc::new(DriftRegistry::new()),
        config.drift.to_config(),
        telemetry,
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> CommandResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run one re-embedding job. Returns `true` when the decision is `pass` or
/// `disabled`.
pub async fn reembed(
    config: &MoltConfig,
    canary_override: Option<String>,
    cancel: CancellationToken,
) -> CommandResult<bool> {
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(TracingTelemetry);
    let store = build_store(&config.store)?;
    let embedder = build_embedder(&config.embedder)?;
    let drift = drift_monitor(config, telemetry.clone());

    let job = config.reembed.to_job();
    let canary_path = expand_tilde(canary_override.as_deref().unwrap_or(&config.reembed.canary_path));
    let canaries = if config.reembed.enabled {
        let canaries = load_canaries(Path::new(&canary_path))?;
        tracing::info!("Loaded {} canaries from {}", canaries.len(), canary_path);
        canaries
    } else {
        Vec::new()
    };

    let orchestrator = ReembeddingOrchestrator::new(
        store,
        embedder,
        drift,
        config.resilience.to_config(),
        telemetry,
    )
    .with_enabled(config.reembed.enabled);

    let summary: ReembedSummary = orchestrator.run(&job, &canaries, &cancel).await;
    print_json(&summary)?;
    Ok(matches!(summary.decision, Decision::Pass | Decision::Disabled))
}

/// Operator-triggered alias switch, e.g. to retry a failed cutover without
/// rebuilding the shadow.
pub async fn cutover(
    config: &MoltConfig,
    alias: &str,
    target: &str,
    min_recall_delta: f64,
) -> CommandResult<bool> {
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(TracingTelemetry);
    let store = build_store(&config.store)?;
    let cutover = BlueGreenCutover::new(store, config.resilience.to_config(), telemetry);

    let outcome = cutover.cutover(alias, target, min_recall_delta).await;
    print_json(&outcome)?;
    Ok(outcome.switched)
}

/// Scroll up to `limit` points of a namespace through the background drift
/// updater and print the resulting fingerprint.
pub async fn drift_scan(
    config: &MoltConfig,
    namespace: &str,
    limit: Option<usize>,
    cancel: CancellationToken,
) -> CommandResult<bool> {
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(TracingTelemetry);
    let store = build_store(&config.store)?;
    let drift = drift_monitor(config, telemetry);

    let (sampler, updater) =
        DriftUpdater::spawn(drift.clone(), config.drift.queue_capacity, cancel.clone());

    let mut offered = 0usize;
    let mut cursor: Option<String> = None;
    'scan: loop {
        if cancel.is_cancelled() {
            tracing::warn!("Drift scan cancelled after {} points", offered);
            break;
        }
        let page = store.scroll_points(namespace, SCAN_PAGE, cursor.take()).await?;
        for point in page.points {
            if limit.is_some_and(|max| offered >= max) {
                break 'scan;
            }
            sampler.offer(namespace, point.vector);
            offered += 1;
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
        tokio::task::yield_now().await;
    }

    let dropped = sampler.dropped();
    drop(sampler);
    let processed = updater.await?;
    tracing::info!(
        "Drift scan of '{}': {} offered, {} recorded, {} dropped",
        namespace,
        offered,
        processed,
        dropped
    );

    match drift.snapshot_stats(namespace) {
        Some(snapshot) => {
            print_json(&snapshot)?;
            Ok(true)
        }
        None => {
            tracing::warn!("No usable vectors found in '{}'", namespace);
            Ok(false)
        }
    }
}
