// crates/molt-drift/src/shadow.rs
//
// Shadow index construction: scroll every point of a source namespace,
// re-embed its text with the current embedder, and write the result into a
// freshly reset shadow namespace in batches.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use molt_core::error::MoltError;
use molt_core::point::Point;
use molt_core::traits::{Embedder, TelemetrySink, VectorStore};
use molt_resilience::{ResiliencyLayer, ResilienceConfig};

use crate::detection::DriftMonitor;

/// Page size used when scrolling the source namespace.
const SCROLL_PAGE: usize = 256;

/// Counters and per-batch upsert latencies of one build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildReport {
    /// Wall-clock duration of each upsert call, in milliseconds.
    pub latencies_ms: Vec<f64>,
    pub scanned: usize,
    pub written: usize,
    pub skipped: usize,
    pub batches: usize,
    pub pages: usize,
}

/// Builds shadow namespaces.
pub struct ShadowIndexBuilder {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    resilience: ResilienceConfig,
    telemetry: Arc<dyn TelemetrySink>,
    drift: Option<Arc<DriftMonitor>>,
}

impl ShadowIndexBuilder {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        resilience: ResilienceConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            store,
            embedder,
            resilience,
            telemetry,
            drift: None,
        }
    }

    /// Record every written vector under the shadow namespace.
    pub fn with_drift_monitor(mut self, drift: Arc<DriftMonitor>) -> Self {
        self.drift = Some(drift);
        self
    }

    /// Rebuild `shadow` from the contents of `source`.
    ///
    /// Points without embeddable text, or whose embedding fails, are skipped.
    /// A store failure that survives retries aborts the build; batches that
    /// were already written stay written.
    pub async fn build(
        &self,
        source: &str,
        shadow: &str,
        batch_size: usize,
    ) -> Result<BuildReport, MoltError> {
        if source == shadow {
            return Err(MoltError::InvalidState(format!(
                "shadow namespace must differ from source '{}'",
                source
            )));
        }
        let batch_size = batch_size.max(1);
        let layer = ResiliencyLayer::new(self.resilience.clone(), self.telemetry.clone());
        let started = Instant::now();

        self.reset_shadow(&layer, shadow).await?;

        let mut report = BuildReport::default();
        let mut batch: Vec<Point> = Vec::with_capacity(batch_size);
        let mut cursor: Option<String> = None;

        loop {
            let store = &self.store;
            let page = layer
                .call("store.scroll", || {
                    store.scroll_points(source, SCROLL_PAGE, cursor.clone())
                })
                .await?;
            report.pages += 1;
            report.scanned += page.points.len();

            for point in self.embed_page(&layer, &page.points, &mut report).await {
                batch.push(point);
                if batch.len() >= batch_size {
                    self.flush(&layer, shadow, &mut batch, &mut report).await?;
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        self.flush(&layer, shadow, &mut batch, &mut report).await?;

        if let Err(e) = self.store.optimize(shadow).await {
            tracing::debug!(shadow, error = %e, "optimize skipped");
        }

        tracing::info!(
            source,
            shadow,
            scanned = report.scanned,
            written = report.written,
            skipped = report.skipped,
            batches = report.batches,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "shadow build complete"
        );
        Ok(report)
    }

    /// Scroll the stored vectors of `source` into the drift monitor until
    /// its baseline freezes or the namespace is exhausted.
    ///
    /// Without a drift monitor, or when `source` already has a baseline, this
    /// does nothing. Returns the number of vectors recorded.
    pub async fn fingerprint_source(&self, source: &str) -> Result<u64, MoltError> {
        let drift = match &self.drift {
            Some(drift) if !drift.has_baseline(source) => drift,
            _ => return Ok(0),
        };
        let layer = ResiliencyLayer::new(self.resilience.clone(), self.telemetry.clone());
        let store = &self.store;
        let mut recorded = 0u64;
        let mut cursor: Option<String> = None;

        loop {
            let page = layer
                .call("store.scroll", || {
                    store.scroll_points(source, SCROLL_PAGE, cursor.clone())
                })
                .await?;
            for point in page.points.iter().filter(|p| !p.vector.is_empty()) {
                drift.record_sample(source, &point.vector);
                recorded += 1;
            }
            if drift.has_baseline(source) {
                break;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::info!(
            source,
            recorded,
            baseline = drift.has_baseline(source),
            "source fingerprinted"
        );
        Ok(recorded)
    }

    /// Make `shadow` exist and be empty.
    async fn reset_shadow(&self, layer: &ResiliencyLayer, shadow: &str) -> Result<(), MoltError> {
        let store = &self.store;
        let dimension = self.embedder.dimension();

        let exists = layer
            .call("store.namespace_exists", || store.namespace_exists(shadow))
            .await?;
        if !exists {
            layer
                .call("store.create_namespace", || {
                    store.create_namespace(shadow, dimension)
                })
                .await?;
        } else {
            match layer
                .call("store.delete_all", || store.delete_all_points(shadow))
                .await
            {
                Ok(()) => {}
                Err(MoltError::Unsupported(reason)) => {
                    tracing::info!(shadow, %reason, "delete-all unsupported, recreating namespace");
                    layer
                        .call("store.drop_namespace", || store.drop_namespace(shadow))
                        .await?;
                    layer
                        .call("store.create_namespace", || {
                            store.create_namespace(shadow, dimension)
                        })
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(drift) = &self.drift {
            drift.reset(shadow);
        }
        Ok(())
    }

    /// Re-embed one scrolled page. Tries one call for the whole page and
    /// falls back to one call per point when that fails.
    async fn embed_page(
        &self,
        layer: &ResiliencyLayer,
        points: &[Point],
        report: &mut BuildReport,
    ) -> Vec<Point> {
        let mut pending: Vec<(&Point, String)> = Vec::with_capacity(points.len());
        for point in points {
            match point.embeddable_text() {
                Some(text) => pending.push((point, text.to_string())),
                None => {
                    tracing::debug!(id = %point.id, "no embeddable text, skipping");
                    report.skipped += 1;
                }
            }
        }
        if pending.is_empty() {
            return Vec::new();
        }

        let texts: Vec<String> = pending.iter().map(|(_, t)| t.clone()).collect();
        let embedder = &self.embedder;
        let vectors: Vec<Option<Vec<f32>>> = match layer
            .call("embedder.embed", || embedder.embed(&texts))
            .await
        {
            Ok(vectors) if vectors.len() == texts.len() => vectors.into_iter().map(Some).collect(),
            Ok(vectors) => {
                tracing::warn!(
                    expected = texts.len(),
                    got = vectors.len(),
                    "embedder returned wrong count, embedding points individually"
                );
                self.embed_each(&texts).await
            }
            Err(e) => {
                tracing::warn!(error = %e, "page embed failed, embedding points individually");
                self.embed_each(&texts).await
            }
        };

        let dimension = self.embedder.dimension();
        let mut out = Vec::with_capacity(pending.len());
        for ((point, _), vector) in pending.into_iter().zip(vectors) {
            match vector {
                Some(v) if v.len() == dimension => {
                    out.push(Point::new(point.id.clone(), v, point.payload.clone()));
                }
                Some(v) => {
                    tracing::warn!(id = %point.id, got = v.len(), dimension, "dimension mismatch, skipping");
                    report.skipped += 1;
                }
                None => report.skipped += 1,
            }
        }
        out
    }

    async fn embed_each(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let single = std::slice::from_ref(text);
            let attempt = tokio::time::timeout(
                self.resilience.attempt_timeout,
                self.embedder.embed(single),
            )
            .await;
            let vector = match attempt {
                Ok(Ok(mut vectors)) if vectors.len() == 1 => vectors.pop(),
                Ok(Ok(_)) => None,
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "point embed failed");
                    None
                }
                Err(_) => {
                    tracing::debug!(
                        timeout_ms = self.resilience.attempt_timeout.as_millis() as u64,
                        "point embed timed out"
                    );
                    None
                }
            };
            out.push(vector);
        }
        out
    }

    async fn flush(
        &self,
        layer: &ResiliencyLayer,
        shadow: &str,
        batch: &mut Vec<Point>,
        report: &mut BuildReport,
    ) -> Result<(), MoltError> {
        if batch.is_empty() {
            return Ok(());
        }
        let store = &self.store;
        let points = batch.as_slice();
        let started = Instant::now();
        layer
            .call("store.upsert", || store.upsert_batch(shadow, points))
            .await?;
        let elapsed = started.elapsed().as_secs_f64() * 1000.0;

        report.latencies_ms.push(elapsed);
        report.batches += 1;
        report.written += batch.len();
        if let Some(drift) = &self.drift {
            for point in batch.iter() {
                drift.record_sample(shadow, &point.vector);
            }
        }
        tracing::debug!(shadow, size = batch.len(), elapsed_ms = elapsed, "batch written");
        batch.clear();
        Ok(())
    }
}
