// crates/molt-drift/src/canary.rs
//
// Canary evaluation: a fixed labeled query set run against a namespace to
// measure recall@k and search latency off the live path.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use molt_core::error::MoltError;
use molt_core::traits::{Embedder, VectorStore};

/// A labeled query: the ids a good index should return for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canary {
    pub query: String,
    #[serde(alias = "relevantIds", default)]
    pub relevant_ids: Vec<String>,
}

impl Canary {
    pub fn new(query: impl Into<String>, relevant_ids: Vec<String>) -> Self {
        Self {
            query: query.into(),
            relevant_ids,
        }
    }
}

/// Outcome of evaluating one namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanaryResult {
    /// Mean recall@k over usable canaries, in [0, 1].
    pub recall_at_k: f64,
    /// Search latency of each successful canary, in milliseconds.
    pub latencies_ms: Vec<f64>,
    /// Canaries with a non-empty relevant set.
    pub evaluated: usize,
    /// Usable canaries whose embed or search call failed.
    pub failed: usize,
    /// Canaries skipped for an empty relevant set.
    pub skipped: usize,
}

/// Deadline for each canary embed or search call unless overridden.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(8);

/// Runs canaries against a namespace.
pub struct CanaryEvaluator {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    call_timeout: Duration,
}

impl CanaryEvaluator {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Deadline for each embed and search call. A call that overruns counts
    /// as a failed canary.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Evaluate `canaries` against `namespace` at depth `k`.
    ///
    /// Canaries with no relevant ids are skipped entirely. A failed embed or
    /// search scores recall 0 and records no latency.
    pub async fn evaluate(&self, namespace: &str, canaries: &[Canary], k: usize) -> CanaryResult {
        let mut result = CanaryResult::default();
        let mut recall_sum = 0.0;

        for canary in canaries {
            if canary.relevant_ids.is_empty() {
                result.skipped += 1;
                continue;
            }
            result.evaluated += 1;

            match self.run_one(namespace, canary, k).await {
                Ok((recall, latency_ms)) => {
                    recall_sum += recall;
                    result.latencies_ms.push(latency_ms);
                }
                Err(e) => {
                    result.failed += 1;
                    tracing::warn!(namespace, query = %canary.query, error = %e, "canary failed");
                }
            }
        }

        if result.evaluated > 0 {
            result.recall_at_k = recall_sum / result.evaluated as f64;
        }

        tracing::debug!(
            namespace,
            recall = result.recall_at_k,
            evaluated = result.evaluated,
            failed = result.failed,
            skipped = result.skipped,
            "canary evaluation complete"
        );
        result
    }

    async fn run_one(
        &self,
        namespace: &str,
        canary: &Canary,
        k: usize,
    ) -> Result<(f64, f64), MoltError> {
        let timeout_ms = self.call_timeout.as_millis() as u64;
        let vectors = tokio::time::timeout(
            self.call_timeout,
            self.embedder.embed(std::slice::from_ref(&canary.query)),
        )
        .await
        .map_err(|_| MoltError::Timeout(timeout_ms))??;
        let query = vectors
            .into_iter()
            .next()
            .ok_or_else(|| MoltError::Embedding("embedder returned no vector".to_string()))?;

        let started = Instant::now();
        let hits = tokio::time::timeout(self.call_timeout, self.store.search(namespace, &query, k))
            .await
            .map_err(|_| MoltError::Timeout(timeout_ms))??;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        Ok((recall_at_k(&hits_ids(&hits), &canary.relevant_ids), latency_ms))
    }
}

fn hits_ids(hits: &[molt_core::SearchHit]) -> Vec<&str> {
    hits.iter().map(|h| h.id.as_str()).collect()
}

/// `|retrieved ∩ relevant| / |relevant|`, both sides de-duplicated.
pub fn recall_at_k(retrieved: &[&str], relevant: &[String]) -> f64 {
    let relevant: HashSet<&str> = relevant.iter().map(String::as_str).collect();
    if relevant.is_empty() {
        return 0.0;
    }
    let retrieved: HashSet<&str> = retrieved.iter().copied().collect();
    retrieved.intersection(&relevant).count() as f64 / relevant.len() as f64
}

/// Median; the mean of the two middle values for even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Load canaries from a JSON array or a JSON-lines file.
pub fn load_canaries(path: &Path) -> Result<Vec<Canary>, MoltError> {
    let contents = std::fs::read_to_string(path)?;
    let trimmed = contents.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(MoltError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use molt_core::{HashEmbedder, Point, ScrollPage, SearchHit};

    /// Store that returns fixed hits, fails for one query vector, or never
    /// answers a search at all.
    struct FixedStore {
        hits: Vec<SearchHit>,
        fail_for: Option<Vec<f32>>,
        hang: bool,
    }

    #[async_trait]
    impl VectorStore for FixedStore {
        async fn scroll_points(
            &self,
            _: &str,
            _: usize,
            _: Option<String>,
        ) -> Result<ScrollPage, MoltError> {
            Ok(ScrollPage::default())
        }
        async fn upsert_batch(&self, _: &str, _: &[Point]) -> Result<(), MoltError> {
            Ok(())
        }
        async fn search(&self, _: &str, v: &[f32], k: usize) -> Result<Vec<SearchHit>, MoltError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail_for.as_deref() == Some(v) {
                return Err(MoltError::Network("boom".into()));
            }
            Ok(self.hits.iter().take(k).cloned().collect())
        }
        async fn namespace_exists(&self, _: &str) -> Result<bool, MoltError> {
            Ok(true)
        }
        async fn create_namespace(&self, _: &str, _: usize) -> Result<(), MoltError> {
            Ok(())
        }
        async fn delete_all_points(&self, _: &str) -> Result<(), MoltError> {
            Ok(())
        }
        async fn drop_namespace(&self, _: &str) -> Result<(), MoltError> {
            Ok(())
        }
        async fn get_alias_target(&self, _: &str) -> Result<Option<String>, MoltError> {
            Ok(None)
        }
        async fn set_alias(&self, _: &str, _: &str) -> Result<(), MoltError> {
            Ok(())
        }
    }

    fn hit(id: &str) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            score: 1.0,
        }
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn recall_dedupes_both_sides() {
        let relevant = ids(&["a", "b", "b", "c", "d"]);
        assert!((recall_at_k(&["a", "a", "c", "x"], &relevant) - 0.5).abs() < 1e-12);
        assert_eq!(recall_at_k(&["a"], &[]), 0.0);
    }

    #[test]
    fn median_odd_even_empty() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[tokio::test]
    async fn skips_empty_and_scores_failures_as_zero() {
        let embedder = Arc::new(HashEmbedder::new("m", 4));
        let failing_query = embedder.embed_one("broken");
        let store = Arc::new(FixedStore {
            hits: vec![hit("a"), hit("b"), hit("c")],
            fail_for: Some(failing_query),
            hang: false,
        });
        let evaluator = CanaryEvaluator::new(embedder, store);

        let canaries = vec![
            Canary::new("q1", ids(&["a", "b"])),
            Canary::new("unlabeled", vec![]),
            Canary::new("broken", ids(&["a"])),
            Canary::new("q3", ids(&["c", "z"])),
        ];
        let result = evaluator.evaluate("ns", &canaries, 10).await;

        assert_eq!(result.evaluated, 3);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.latencies_ms.len(), 2);
        // (1.0 + 0.0 + 0.5) / 3
        assert!((result.recall_at_k - 0.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn no_usable_canary_yields_zero() {
        let evaluator = CanaryEvaluator::new(
            Arc::new(HashEmbedder::new("m", 4)),
            Arc::new(FixedStore {
                hits: vec![],
                fail_for: None,
                hang: false,
            }),
        );
        let result = evaluator
            .evaluate("ns", &[Canary::new("q", vec![])], 5)
            .await;
        assert_eq!(result.recall_at_k, 0.0);
        assert!(result.latencies_ms.is_empty());
    }

    #[tokio::test]
    async fn hung_search_times_out_as_failure() {
        let evaluator = CanaryEvaluator::new(
            Arc::new(HashEmbedder::new("m", 4)),
            Arc::new(FixedStore {
                hits: vec![hit("a")],
                fail_for: None,
                hang: true,
            }),
        )
        .with_call_timeout(Duration::from_millis(50));

        let canaries = vec![Canary::new("q1", ids(&["a"])), Canary::new("q2", ids(&["a"]))];
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            evaluator.evaluate("ns", &canaries, 5),
        )
        .await
        .expect("evaluation must not hang");

        assert_eq!(result.evaluated, 2);
        assert_eq!(result.failed, 2);
        assert_eq!(result.recall_at_k, 0.0);
        assert!(result.latencies_ms.is_empty());
    }

    #[test]
    fn loads_array_and_json_lines() {
        let dir = std::env::temp_dir();
        let array_path = dir.join(format!("molt_canaries_{}.json", std::process::id()));
        std::fs::write(
            &array_path,
            r#"[{"query": "q", "relevant_ids": ["1"]}, {"query": "r", "relevantIds": ["2", "3"]}]"#,
        )
        .unwrap();
        let loaded = load_canaries(&array_path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].relevant_ids, ids(&["2", "3"]));

        let lines_path = dir.join(format!("molt_canaries_{}.jsonl", std::process::id()));
        std::fs::write(
            &lines_path,
            "{\"query\": \"q\", \"relevant_ids\": [\"1\"]}\n\n{\"query\": \"r\"}\n",
        )
        .unwrap();
        let loaded = load_canaries(&lines_path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded[1].relevant_ids.is_empty());

        let _ = std::fs::remove_file(array_path);
        let _ = std::fs::remove_file(lines_path);
    }
}
