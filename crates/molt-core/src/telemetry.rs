// crates/molt-core/src/telemetry.rs
//
// Telemetry sinks. Signals are fire-and-forget: a sink may drop, log, or
// buffer them, but never reports failure back to the emitter.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::traits::TelemetrySink;

/// A recorded telemetry signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub topic: String,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

/// Discards every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn emit(&self, _topic: &str, _payload: Value) {}
}

/// Writes each signal as a structured `tracing` event under the
/// `molt::telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, topic: &str, payload: Value) {
        tracing::info!(target: "molt::telemetry", topic = topic, payload = %payload, "signal");
    }
}

/// Keeps every signal in memory. Used by tests and by the CLI to print
/// what a run emitted.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    signals: Mutex<Vec<Signal>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All signals in emission order.
    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().clone()
    }

    /// Signals whose topic equals `topic`.
    pub fn by_topic(&self, topic: &str) -> Vec<Signal> {
        self.signals
            .lock()
            .iter()
            .filter(|s| s.topic == topic)
            .cloned()
            .collect()
    }

    /// Signals whose topic starts with `prefix`.
    pub fn by_prefix(&self, prefix: &str) -> Vec<Signal> {
        self.signals
            .lock()
            .iter()
            .filter(|s| s.topic.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.signals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn emit(&self, topic: &str, payload: Value) {
        self.signals.lock().push(Signal {
            topic: topic.to_string(),
            payload,
            emitted_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_sink_filters_by_topic_and_prefix() {
        let sink = MemoryTelemetry::new();
        sink.emit("reembed.saga.init", json!({"ok": true}));
        sink.emit("reembed.summary", json!({"decision": "pass"}));
        sink.emit("drift.docs", json!({"kl": 0.0}));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.by_topic("reembed.summary").len(), 1);
        assert_eq!(sink.by_prefix("reembed.").len(), 2);
        assert_eq!(sink.signals()[2].topic, "drift.docs");
    }
}
