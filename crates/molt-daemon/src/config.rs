// crates/molt-daemon/src/config.rs
//
// Runtime configuration for the Molt daemon.
// Loaded from a TOML file or populated with sensible defaults.

use serde::Deserialize;
use std::fs;
use std::time::Duration;

use molt_drift::{DriftConfig, GateThresholds, ReembedJob};
use molt_resilience::ResilienceConfig;

/// Runtime configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct MoltConfig {
    /// Log level used when `RUST_LOG` is unset: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub embedder: EmbedderSection,

    #[serde(default)]
    pub reembed: ReembedSection,

    #[serde(default)]
    pub resilience: ResilienceSection,

    #[serde(default)]
    pub drift: DriftSection,
}

/// `[store]`: the Qdrant instance holding namespaces and aliases.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_store_url")]
    pub url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Whole-request timeout for the HTTP client, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Which embedder backs the shadow build and canary queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Deterministic hash embedding, no network.
    Hash,
    /// OpenAI-compatible `/embeddings` endpoint.
    Http,
}

/// `[embedder]`
#[derive(Debug, Clone, Deserialize)]
pub struct EmbedderSection {
    #[serde(default = "default_embedder_kind")]
    pub kind: EmbedderKind,

    #[serde(default = "default_embedder_url")]
    pub url: String,

    #[serde(default = "default_embedder_model")]
    pub model: String,

    #[serde(default = "default_embedder_dimension")]
    pub dimension: usize,

    /// Environment variable holding the bearer token, if any.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// `[reembed]`
#[derive(Debug, Clone, Deserialize)]
pub struct ReembedSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_source_ns")]
    pub source_ns: String,

    #[serde(default = "default_shadow_ns")]
    pub shadow_ns: String,

    #[serde(default = "default_alias")]
    pub alias: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_k")]
    pub k: usize,

    /// JSON array or JSON-lines file of `{query, relevant_ids}`.
    #[serde(default = "default_canary_path")]
    pub canary_path: String,

    #[serde(default = "default_kl_max")]
    pub kl_max: f64,

    #[serde(default)]
    pub recall_delta_min: f64,

    #[serde(default = "default_latency_delta_max_ms")]
    pub latency_delta_max_ms: f64,

    /// Promotion threshold, checked after the gate passes.
    #[serde(default)]
    pub min_recall_delta: f64,
}

/// `[resilience]`
#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_open_seconds")]
    pub open_seconds: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,

    #[serde(default = "default_jitter")]
    pub jitter: f64,

    #[serde(default = "default_attempt_timeout_secs")]
    pub timeout_secs: u64,
}

/// `[drift]`
#[derive(Debug, Clone, Deserialize)]
pub struct DriftSection {
    #[serde(default = "default_norm_cap")]
    pub norm_cap: usize,

    #[serde(default = "default_buckets")]
    pub buckets: usize,

    #[serde(default = "default_emit_interval_secs")]
    pub emit_interval_secs: u64,

    /// Capacity of the background updater queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_store_url() -> String {
    "http://127.0.0.1:6333".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_embedder_kind() -> EmbedderKind {
    EmbedderKind::Hash
}

fn default_embedder_url() -> String {
    "http://127.0.0.1:8080/v1".to_string()
}

fn default_embedder_model() -> String {
    "hash-v1".to_string()
}

fn default_embedder_dimension() -> usize {
    384
}

fn default_api_key_env() -> String {
    "MOLT_EMBEDDER_API_KEY".to_string()
}

fn default_true() -> bool {
    true
}

fn default_source_ns() -> String {
    "memories_v1".to_string()
}

fn default_shadow_ns() -> String {
    "memories_v2".to_string()
}

fn default_alias() -> String {
    "memories".to_string()
}

fn default_batch_size() -> usize {
    64
}

fn default_k() -> usize {
    10
}

fn default_canary_path() -> String {
    "~/.molt/canaries.json".to_string()
}

fn default_kl_max() -> f64 {
    0.1
}

fn default_latency_delta_max_ms() -> f64 {
    50.0
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_open_seconds() -> u64 {
    20
}

fn default_retries() -> u32 {
    2
}

fn default_backoff_ms() -> Vec<u64> {
    vec![200, 800]
}

fn default_jitter() -> f64 {
    0.25
}

fn default_attempt_timeout_secs() -> u64 {
    8
}

fn default_norm_cap() -> usize {
    5000
}

fn default_buckets() -> usize {
    21
}

fn default_emit_interval_secs() -> u64 {
    300
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for MoltConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            store: StoreSection::default(),
            embedder: EmbedderSection::default(),
            reembed: ReembedSection::default(),
            resilience: ResilienceSection::default(),
            drift: DriftSection::default(),
        }
    }
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for EmbedderSection {
    fn default() -> Self {
        Self {
            kind: default_embedder_kind(),
            url: default_embedder_url(),
            model: default_embedder_model(),
            dimension: default_embedder_dimension(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ReembedSection {
    fn default() -> Self {
        Self {
            enabled: true,
            source_ns: default_source_ns(),
            shadow_ns: default_shadow_ns(),
            alias: default_alias(),
            batch_size: default_batch_size(),
            k: default_k(),
            canary_path: default_canary_path(),
            kl_max: default_kl_max(),
            recall_delta_min: 0.0,
            latency_delta_max_ms: default_latency_delta_max_ms(),
            min_recall_delta: 0.0,
        }
    }
}

impl Default for ResilienceSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_seconds: default_open_seconds(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            jitter: default_jitter(),
            timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

impl Default for DriftSection {
    fn default() -> Self {
        Self {
            norm_cap: default_norm_cap(),
            buckets: default_buckets(),
            emit_interval_secs: default_emit_interval_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl MoltConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: MoltConfig = toml::from_str(&contents)?;
        Ok(config)
    }
}

impl ReembedSection {
    pub fn to_job(&self) -> ReembedJob {
        ReembedJob {
            source_ns: self.source_ns.clone(),
            shadow_ns: self.shadow_ns.clone(),
            alias: self.alias.clone(),
            batch_size: self.batch_size,
            k: self.k,
            thresholds: GateThresholds {
                kl_max: self.kl_max,
                recall_delta_min: self.recall_delta_min,
                latency_delta_max_ms: self.latency_delta_max_ms,
            },
            min_recall_delta: self.min_recall_delta,
        }
    }
}

impl ResilienceSection {
    pub fn to_config(&self) -> ResilienceConfig {
        ResilienceConfig {
            failure_threshold: self.failure_threshold,
            open_duration: Duration::from_secs(self.open_seconds),
            retries: self.retries,
            backoff: self.backoff_ms.iter().copied().map(Duration::from_millis).collect(),
            jitter: self.jitter,
            attempt_timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl DriftSection {
    pub fn to_config(&self) -> DriftConfig {
        DriftConfig {
            norm_cap: self.norm_cap,
            buckets: self.buckets,
            emit_interval: Duration::from_secs(self.emit_interval_secs),
        }
    }
}
