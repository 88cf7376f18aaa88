// crates/molt-drift/src/saga.rs
//
// Append-only audit trail of one multi-step run. Every recorded step is also
// emitted as `reembed.saga.{step}` so partial failures can be diagnosed from
// telemetry alone.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use molt_core::traits::TelemetrySink;

/// One recorded step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStep {
    pub step: String,
    pub ok: bool,
    pub info: Value,
    pub at: DateTime<Utc>,
}

/// Saga for one run, keyed by a time-ordered correlation id.
pub struct Saga {
    correlation_id: Uuid,
    steps: Vec<SagaStep>,
    outcome: Option<bool>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl Saga {
    pub fn begin(telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            correlation_id: Uuid::now_v7(),
            steps: Vec::new(),
            outcome: None,
            telemetry,
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn steps(&self) -> &[SagaStep] {
        &self.steps
    }

    /// Terminal outcome, once closed.
    pub fn outcome(&self) -> Option<bool> {
        self.outcome
    }

    pub fn is_closed(&self) -> bool {
        self.outcome.is_some()
    }

    /// Append a step and emit it. Ignored once the saga is closed.
    pub fn record(&mut self, step: &str, ok: bool, info: Value) {
        if self.is_closed() {
            tracing::warn!(
                correlation_id = %self.correlation_id,
                step,
                "step recorded after saga closed, ignoring"
            );
            return;
        }
        self.push(step, ok, info);
    }

    /// Close the saga with its terminal outcome. Only the first call counts.
    pub fn close(&mut self, ok: bool) {
        if self.is_closed() {
            return;
        }
        let info = json!({ "steps": self.steps.len() });
        self.push("closed", ok, info);
        self.outcome = Some(ok);
    }

    fn push(&mut self, step: &str, ok: bool, info: Value) {
        tracing::debug!(correlation_id = %self.correlation_id, step, ok, "saga step");
        self.telemetry.emit(
            &format!("reembed.saga.{}", step),
            json!({
                "correlationId": self.correlation_id.to_string(),
                "ok": ok,
                "info": info.clone(),
            }),
        );
        self.steps.push(SagaStep {
            step: step.to_string(),
            ok,
            info,
            at: Utc::now(),
        });
    }
}
