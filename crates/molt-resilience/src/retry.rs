// crates/molt-resilience/src/retry.rs
//
// Jittered retry wrapper with one circuit breaker per dependency path.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde_json::json;

use molt_core::error::MoltError;
use molt_core::traits::TelemetrySink;

use crate::breaker::CircuitBreaker;

/// Retry and circuit breaker knobs.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Consecutive failures that open a breaker.
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls before going half-open.
    pub open_duration: Duration,
    /// Retries after the initial attempt.
    pub retries: u32,
    /// Base delay before retry `i`; the last entry repeats if `retries` is longer.
    pub backoff: Vec<Duration>,
    /// Relative jitter applied to each delay (0.25 = ±25%).
    pub jitter: f64,
    /// Deadline for a single attempt. A timeout counts as a failure.
    pub attempt_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_duration: Duration::from_secs(20),
            retries: 2,
            backoff: vec![Duration::from_millis(200), Duration::from_millis(800)],
            jitter: 0.25,
            attempt_timeout: Duration::from_secs(8),
        }
    }
}

impl ResilienceConfig {
    /// Base delay (before jitter) after the given zero-based failed attempt.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.backoff
            .get(attempt as usize)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Jittered delay after the given zero-based failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor)
    }
}

/// Wraps calls to external dependencies with a circuit breaker per
/// dependency path and bounded, jittered retries.
///
/// One layer is one resiliency budget: breakers live as long as the layer.
pub struct ResiliencyLayer {
    config: ResilienceConfig,
    telemetry: Arc<dyn TelemetrySink>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl ResiliencyLayer {
    pub fn new(config: ResilienceConfig, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            config,
            telemetry,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Breaker for a dependency path, created closed on first use.
    pub fn breaker(&self, path: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .lock()
            .entry(path.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    path,
                    self.config.failure_threshold,
                    self.config.open_duration,
                ))
            })
            .clone()
    }

    /// Run `op` with one upfront breaker check, `1 + retries` attempts,
    /// a per-attempt timeout, and jittered backoff between attempts.
    ///
    /// Non-transient errors (`Unsupported`, `NotFound`, ...) are returned
    /// at once and do not count against the breaker.
    pub async fn call<T, F, Fut>(&self, path: &str, mut op: F) -> Result<T, MoltError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MoltError>>,
    {
        let breaker = self.breaker(path);
        if !breaker.allow() {
            tracing::debug!(dependency = path, "circuit open, failing fast");
            return Err(MoltError::CircuitOpen(path.to_string()));
        }

        let attempts = self.config.retries.saturating_add(1);
        let timeout_ms = self.config.attempt_timeout.as_millis() as u64;
        let mut last_error = None;

        for attempt in 0..attempts {
            let outcome = match tokio::time::timeout(self.config.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(MoltError::Timeout(timeout_ms)),
            };

            match outcome {
                Ok(value) => {
                    breaker.record_success();
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if breaker.record_failure() {
                        self.telemetry
                            .emit("circuit.open", json!({ "dependencyPath": path }));
                    }
                    tracing::warn!(
                        dependency = path,
                        attempt = attempt + 1,
                        attempts = attempts,
                        error = %e,
                        "dependency call failed"
                    );
                    last_error = Some(e);
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.config.delay(attempt)).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| MoltError::InvalidState(format!("no attempts made for {}", path))))
    }
}
