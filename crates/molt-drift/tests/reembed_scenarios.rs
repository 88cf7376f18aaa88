// crates/molt-drift/tests/reembed_scenarios.rs
//
// End-to-end re-embedding runs against the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

use molt_core::{
    HashEmbedder, MemoryTelemetry, MoltError, Point, ScrollPage, SearchHit, VectorStore,
};
use molt_drift::{
    Canary, Decision, DriftConfig, DriftMonitor, DriftRegistry, GateThresholds, ReembedJob,
    ReembeddingOrchestrator,
};
use molt_resilience::ResilienceConfig;
use molt_store::InMemoryVectorStore;

const DIM: usize = 16;
const MODEL: &str = "model-v1";

/// In-memory store with injectable faults.
struct FaultyStore {
    inner: InMemoryVectorStore,
    upserts: AtomicUsize,
    /// Upsert calls numbered at or above this fail.
    fail_upsert_from: Option<usize>,
    fail_set_alias: bool,
    /// When set, scrolling waits for a permit.
    scroll_gate: Option<Arc<Semaphore>>,
    scroll_entered: Arc<Notify>,
    /// Searches never complete.
    hang_search: bool,
    /// Searches against this namespace fail.
    fail_search_ns: Option<&'static str>,
}

impl FaultyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryVectorStore::new(),
            upserts: AtomicUsize::new(0),
            fail_upsert_from: None,
            fail_set_alias: false,
            scroll_gate: None,
            scroll_entered: Arc::new(Notify::new()),
            hang_search: false,
            fail_search_ns: None,
        }
    }
}

#[async_trait]
impl VectorStore for FaultyStore {
    async fn scroll_points(
        &self,
        namespace: &str,
        page_size: usize,
        cursor: Option<String>,
    ) -> Result<ScrollPage, MoltError> {
        if let Some(gate) = &self.scroll_gate {
            self.scroll_entered.notify_one();
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| MoltError::Storage(e.to_string()))?;
        }
        self.inner.scroll_points(namespace, page_size, cursor).await
    }

    async fn upsert_batch(&self, namespace: &str, points: &[Point]) -> Result<(), MoltError> {
        let call = self.upserts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(from) = self.fail_upsert_from {
            if call >= from {
                return Err(MoltError::Storage(format!("forced failure on upsert #{}", call)));
            }
        }
        self.inner.upsert_batch(namespace, points).await
    }

    async fn search(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, MoltError> {
        if self.hang_search {
            std::future::pending::<()>().await;
        }
        if self.fail_search_ns == Some(namespace) {
            return Err(MoltError::Storage(format!("search on {} refused", namespace)));
        }
        self.inner.search(namespace, vector, top_k).await
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool, MoltError> {
        self.inner.namespace_exists(namespace).await
    }

    async fn create_namespace(&self, namespace: &str, dimension: usize) -> Result<(), MoltError> {
        self.inner.create_namespace(namespace, dimension).await
    }

    async fn delete_all_points(&self, namespace: &str) -> Result<(), MoltError> {
        self.inner.delete_all_points(namespace).await
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<(), MoltError> {
        self.inner.drop_namespace(namespace).await
    }

    async fn get_alias_target(&self, alias: &str) -> Result<Option<String>, MoltError> {
        self.inner.get_alias_target(alias).await
    }

    async fn set_alias(&self, alias: &str, namespace: &str) -> Result<(), MoltError> {
        if self.fail_set_alias {
            return Err(MoltError::Network("alias endpoint unreachable".to_string()));
        }
        self.inner.set_alias(alias, namespace).await
    }
}

fn fast_resilience() -> ResilienceConfig {
    ResilienceConfig {
        backoff: vec![Duration::from_millis(1)],
        attempt_timeout: Duration::from_secs(5),
        ..ResilienceConfig::default()
    }
}

fn text_payload(text: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("text".to_string(), json!(text));
    payload
}

fn memory_text(i: usize) -> String {
    format!("the user mentioned fact number {}", i)
}

/// Fill `src` with `n` points embedded by the same model the shadow will use,
/// and point the alias at it.
async fn seed(store: &FaultyStore, n: usize) {
    let embedder = HashEmbedder::new(MODEL, DIM);
    store.inner.create_namespace("src", DIM).await.unwrap();
    let points: Vec<Point> = (0..n)
        .map(|i| {
            let text = memory_text(i);
            Point::new(format!("m{:03}", i), embedder.embed_one(&text), text_payload(&text))
        })
        .collect();
    store.inner.upsert_batch("src", &points).await.unwrap();
    store.inner.set_alias("memories", "src").await.unwrap();
}

fn canaries(n: usize) -> Vec<Canary> {
    (0..n)
        .map(|i| Canary::new(memory_text(i), vec![format!("m{:03}", i)]))
        .collect()
}

fn job(batch_size: usize) -> ReembedJob {
    ReembedJob {
        source_ns: "src".to_string(),
        shadow_ns: "shadow".to_string(),
        alias: "memories".to_string(),
        batch_size,
        k: 10,
        thresholds: GateThresholds {
            kl_max: 0.1,
            recall_delta_min: 0.0,
            latency_delta_max_ms: 1_000.0,
        },
        min_recall_delta: 0.0,
    }
}

struct Harness {
    store: Arc<FaultyStore>,
    drift: Arc<DriftMonitor>,
    telemetry: Arc<MemoryTelemetry>,
    orchestrator: Arc<ReembeddingOrchestrator>,
}

fn harness(store: FaultyStore) -> Harness {
    harness_with(store, fast_resilience())
}

fn harness_with(store: FaultyStore, resilience: ResilienceConfig) -> Harness {
    let store = Arc::new(store);
    let telemetry = Arc::new(MemoryTelemetry::new());
    let drift = Arc::new(DriftMonitor::new(
        Arc::new(DriftRegistry::new()),
        DriftConfig {
            norm_cap: 1_000,
            ..DriftConfig::default()
        },
        telemetry.clone(),
    ));
    let orchestrator = Arc::new(ReembeddingOrchestrator::new(
        store.clone(),
        Arc::new(HashEmbedder::new(MODEL, DIM)),
        drift.clone(),
        resilience,
        telemetry.clone(),
    ));
    Harness {
        store,
        drift,
        telemetry,
        orchestrator,
    }
}

fn closed_ok(telemetry: &MemoryTelemetry) -> Option<bool> {
    telemetry
        .by_topic("reembed.saga.closed")
        .last()
        .and_then(|s| s.payload["ok"].as_bool())
}

#[tokio::test]
async fn identical_reembedding_passes_and_switches() {
    let store = FaultyStore::new();
    seed(&store, 30).await;
    let h = harness(store);

    let summary = h
        .orchestrator
        .run(&job(10), &canaries(5), &CancellationToken::new())
        .await;

    assert_eq!(summary.decision, Decision::Pass);
    assert_eq!(summary.recall_delta, 0.0);
    assert_eq!(summary.recall_source, 1.0);
    assert_eq!(summary.recall_shadow, 1.0);
    assert_eq!(summary.kl, 0.0);
    assert!(summary.median_latency_source_ms.is_some());
    assert!(summary.switched);
    assert_eq!(summary.alias_before.as_deref(), Some("src"));
    assert_eq!(summary.alias_after.as_deref(), Some("shadow"));
    assert_eq!(h.store.inner.count("shadow"), 30);

    assert_eq!(closed_ok(&h.telemetry), Some(true));
    let emitted = h.telemetry.by_topic("reembed.summary");
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].payload["decision"], "pass");
    assert_eq!(emitted[0].payload["correlationId"], summary.correlation_id.as_str());
    assert_eq!(h.telemetry.by_topic("cutover.switched").len(), 1);

    let steps: Vec<String> = h
        .telemetry
        .by_prefix("reembed.saga.")
        .into_iter()
        .map(|s| s.topic)
        .collect();
    assert_eq!(
        steps,
        vec![
            "reembed.saga.init",
            "reembed.saga.shadow_building",
            "reembed.saga.evaluating",
            "reembed.saga.deciding",
            "reembed.saga.cutting_over",
            "reembed.saga.done",
            "reembed.saga.closed",
        ]
    );
}

#[tokio::test]
async fn high_kl_fails_without_cutover() {
    let store = FaultyStore::new();
    seed(&store, 20).await;
    let h = harness(store);

    // Source history: every vector points the same way.
    for i in 0..250 {
        let scale = 1.0 + i as f32;
        let mut v = vec![0.0f32; DIM];
        v[0] = scale;
        h.drift.record_sample("src", &v);
    }
    assert!(h.drift.snapshot_stats("src").unwrap().has_baseline);

    let summary = h
        .orchestrator
        .run(&job(10), &canaries(5), &CancellationToken::new())
        .await;

    assert_eq!(summary.decision, Decision::Fail);
    assert!(summary.kl > 0.1, "kl = {}", summary.kl);
    assert!(summary.cosine_shift > 0.0);
    assert!(!summary.switched);
    assert_eq!(summary.alias_after, summary.alias_before);
    assert_eq!(summary.alias_after.as_deref(), Some("src"));
    assert!(h.telemetry.by_topic("cutover.switched").is_empty());
    assert!(h.telemetry.by_topic("reembed.saga.cutting_over").is_empty());
    assert_eq!(closed_ok(&h.telemetry), Some(false));
}

#[tokio::test]
async fn third_batch_failure_keeps_committed_batches() {
    let mut store = FaultyStore::new();
    store.fail_upsert_from = Some(3);
    seed(&store, 25).await;
    let h = harness(store);

    let summary = h
        .orchestrator
        .run(&job(10), &canaries(5), &CancellationToken::new())
        .await;

    assert_eq!(summary.decision, Decision::Error);
    assert!(summary.error.as_deref().unwrap_or("").contains("forced failure"));
    assert!(!summary.switched);
    assert_eq!(summary.alias_after.as_deref(), Some("src"));
    assert_eq!(h.store.inner.count("shadow"), 20);
    assert_eq!(closed_ok(&h.telemetry), Some(false));

    let failed = h.telemetry.by_topic("reembed.saga.shadow_building");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].payload["ok"], false);
    assert_eq!(h.telemetry.by_topic("reembed.summary").len(), 1);
}

#[tokio::test]
async fn disabled_run_short_circuits() {
    let store = FaultyStore::new();
    seed(&store, 5).await;
    let store = Arc::new(store);
    let telemetry = Arc::new(MemoryTelemetry::new());
    let orchestrator = ReembeddingOrchestrator::new(
        store.clone(),
        Arc::new(HashEmbedder::new(MODEL, DIM)),
        Arc::new(DriftMonitor::new(
            Arc::new(DriftRegistry::new()),
            DriftConfig::default(),
            telemetry.clone(),
        )),
        fast_resilience(),
        telemetry.clone(),
    )
    .with_enabled(false);

    let summary = orchestrator
        .run(&job(10), &canaries(5), &CancellationToken::new())
        .await;

    assert_eq!(summary.decision, Decision::Disabled);
    assert!(!store.inner.namespace_exists("shadow").await.unwrap());
    assert_eq!(telemetry.by_topic("reembed.saga.init").len(), 1);
    assert_eq!(telemetry.by_topic("reembed.summary").len(), 1);
    assert_eq!(closed_ok(&telemetry), Some(false));
}

#[tokio::test]
async fn cancelled_run_reports_error() {
    let store = FaultyStore::new();
    seed(&store, 5).await;
    let h = harness(store);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = h.orchestrator.run(&job(10), &canaries(5), &cancel).await;

    assert_eq!(summary.decision, Decision::Error);
    assert!(summary.error.as_deref().unwrap_or("").contains("cancelled"));
    assert!(!h.store.inner.namespace_exists("shadow").await.unwrap());
    assert_eq!(closed_ok(&h.telemetry), Some(false));
}

#[tokio::test]
async fn failed_cutover_keeps_pass() {
    let mut store = FaultyStore::new();
    store.fail_set_alias = true;
    seed(&store, 15).await;
    let h = harness(store);

    let summary = h
        .orchestrator
        .run(&job(10), &canaries(5), &CancellationToken::new())
        .await;

    assert_eq!(summary.decision, Decision::Pass);
    assert!(!summary.switched);
    assert_eq!(summary.alias_after.as_deref(), Some("src"));
    assert_eq!(h.telemetry.by_topic("cutover.failed").len(), 1);
    assert_eq!(h.store.inner.count("shadow"), 15);
}

#[tokio::test]
async fn promotion_threshold_is_separate_from_gate() {
    let store = FaultyStore::new();
    seed(&store, 10).await;
    let h = harness(store);
    let mut job = job(10);
    job.min_recall_delta = 0.05;

    let summary = h
        .orchestrator
        .run(&job, &canaries(5), &CancellationToken::new())
        .await;

    assert_eq!(summary.decision, Decision::Pass);
    assert!(!summary.switched);
    assert_eq!(summary.alias_after.as_deref(), Some("src"));
    assert!(h.telemetry.by_topic("cutover.switched").is_empty());
}

#[tokio::test]
async fn concurrent_run_for_same_pair_is_refused() {
    let gate = Arc::new(Semaphore::new(0));
    let mut store = FaultyStore::new();
    store.scroll_gate = Some(gate.clone());
    let entered = store.scroll_entered.clone();
    seed(&store, 10).await;
    let h = harness(store);

    let first = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .run(&job(10), &canaries(5), &CancellationToken::new())
                .await
        })
    };
    entered.notified().await;

    let refused = h
        .orchestrator
        .run(&job(10), &canaries(5), &CancellationToken::new())
        .await;
    assert_eq!(refused.decision, Decision::Error);
    assert!(refused.error.as_deref().unwrap_or("").contains("in progress"));
    assert_ne!(refused.correlation_id, "");

    gate.add_permits(1_000);
    let summary = first.await.unwrap();
    assert_eq!(summary.decision, Decision::Pass);
    assert_ne!(summary.correlation_id, refused.correlation_id);
}

#[tokio::test]
async fn stored_source_vectors_form_the_baseline() {
    let store = FaultyStore::new();
    store.inner.create_namespace("src", DIM).await.unwrap();
    // Stored vectors from an older model: all nearly collinear.
    let points: Vec<Point> = (0..300)
        .map(|i| {
            let mut v = vec![0.0f32; DIM];
            v[0] = 1.0;
            v[1] = 0.001 * i as f32;
            let text = memory_text(i);
            Point::new(format!("m{:03}", i), v, text_payload(&text))
        })
        .collect();
    store.inner.upsert_batch("src", &points).await.unwrap();
    store.inner.set_alias("memories", "src").await.unwrap();
    let h = harness(store);
    assert!(h.drift.snapshot_stats("src").is_none());

    let summary = h
        .orchestrator
        .run(&job(64), &canaries(5), &CancellationToken::new())
        .await;

    assert!(h.drift.snapshot_stats("src").unwrap().has_baseline);
    assert_eq!(summary.decision, Decision::Fail);
    assert!(summary.kl > 0.1, "kl = {}", summary.kl);
    assert!(!summary.switched);
    assert_eq!(summary.alias_after.as_deref(), Some("src"));
    assert_eq!(h.store.inner.count("shadow"), 300);

    let building = h.telemetry.by_topic("reembed.saga.shadow_building");
    assert_eq!(building[0].payload["info"]["fingerprinted"], 256);
}

#[tokio::test]
async fn hung_searches_time_out_instead_of_stalling_the_run() {
    let mut store = FaultyStore::new();
    store.hang_search = true;
    seed(&store, 10).await;
    let h = harness_with(
        store,
        ResilienceConfig {
            attempt_timeout: Duration::from_millis(50),
            ..fast_resilience()
        },
    );

    let summary = tokio::time::timeout(
        Duration::from_secs(2),
        h.orchestrator
            .run(&job(10), &canaries(5), &CancellationToken::new()),
    )
    .await
    .expect("run must finish despite hung searches");

    assert_ne!(summary.decision, Decision::Error);
    assert_eq!(summary.recall_source, 0.0);
    assert_eq!(summary.recall_shadow, 0.0);
    assert!(summary.median_latency_source_ms.is_none());
    assert!(summary.median_latency_shadow_ms.is_none());

    let evaluating = h.telemetry.by_topic("reembed.saga.evaluating");
    assert_eq!(evaluating[0].payload["info"]["failedSource"], 5);
    assert_eq!(evaluating[0].payload["info"]["failedShadow"], 5);
}

#[tokio::test]
async fn failing_shadow_searches_still_reach_the_gate() {
    let mut store = FaultyStore::new();
    store.fail_search_ns = Some("shadow");
    seed(&store, 10).await;
    let h = harness(store);

    let mut job = job(10);
    job.thresholds.recall_delta_min = -1.0;
    job.thresholds.latency_delta_max_ms = 0.0;

    let summary = h
        .orchestrator
        .run(&job, &canaries(5), &CancellationToken::new())
        .await;

    assert!(summary.median_latency_shadow_ms.is_none());
    assert!(summary.median_latency_source_ms.is_some());
    assert_eq!(summary.recall_source, 1.0);
    assert_eq!(summary.recall_shadow, 0.0);
    assert_eq!(summary.recall_delta, -1.0);
    // A missing shadow median counts as zero latency.
    assert_eq!(summary.decision, Decision::Pass);
    // Promotion still requires recall not to drop.
    assert!(!summary.switched);
    assert_eq!(summary.alias_after.as_deref(), Some("src"));
    assert!(h.telemetry.by_topic("reembed.saga.cutting_over").is_empty());
}
