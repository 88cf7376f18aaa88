// crates/molt-drift/src/cutover.rs
//
// Blue/green cutover: repoint a stable alias at a fully built namespace with
// one atomic create-or-replace. Never raises; failures are reported in the
// outcome and as a `cutover.failed` signal.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use molt_core::traits::{TelemetrySink, VectorStore};
use molt_resilience::{ResiliencyLayer, ResilienceConfig};

/// Result of one cutover attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CutoverOutcome {
    pub switched: bool,
    /// Alias target before the switch, if it could be read.
    pub previous_target: Option<String>,
    pub new_target: Option<String>,
}

/// Switches aliases between namespaces.
pub struct BlueGreenCutover {
    store: Arc<dyn VectorStore>,
    resilience: ResilienceConfig,
    telemetry: Arc<dyn TelemetrySink>,
}

impl BlueGreenCutover {
    pub fn new(
        store: Arc<dyn VectorStore>,
        resilience: ResilienceConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            store,
            resilience,
            telemetry,
        }
    }

    /// Point `alias` at `target`.
    ///
    /// `min_recall_delta` is the promotion threshold the caller applied; it is
    /// recorded with the switch for audit.
    pub async fn cutover(&self, alias: &str, target: &str, min_recall_delta: f64) -> CutoverOutcome {
        let previous = match self.store.get_alias_target(alias).await {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(alias, error = %e, "could not read current alias target");
                None
            }
        };

        let layer = ResiliencyLayer::new(self.resilience.clone(), self.telemetry.clone());
        let store = &self.store;
        match layer
            .call("store.set_alias", || store.set_alias(alias, target))
            .await
        {
            Ok(()) => {
                tracing::info!(
                    alias,
                    previous = ?previous,
                    target,
                    "alias switched"
                );
                self.telemetry.emit(
                    "cutover.switched",
                    json!({
                        "alias": alias,
                        "previousTarget": previous,
                        "newTarget": target,
                        "minRecallDelta": min_recall_delta,
                    }),
                );
                CutoverOutcome {
                    switched: true,
                    previous_target: previous,
                    new_target: Some(target.to_string()),
                }
            }
            Err(e) => {
                tracing::error!(alias, target, error = %e, "alias switch failed");
                self.telemetry.emit(
                    "cutover.failed",
                    json!({
                        "alias": alias,
                        "target": target,
                        "error": e.to_string(),
                    }),
                );
                CutoverOutcome::default()
            }
        }
    }
}
