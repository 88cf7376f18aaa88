// crates/molt-core/src/traits.rs

use async_trait::async_trait;
use serde_json::Value;

use crate::error::MoltError;
use crate::point::{Point, ScrollPage, SearchHit};

/// Trait for a vector database holding named namespaces and aliases.
///
/// Implemented by molt-store (in-memory and Qdrant REST adapters).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Fetch one page of points. `cursor` is `None` for the first page.
    async fn scroll_points(
        &self,
        namespace: &str,
        page_size: usize,
        cursor: Option<String>,
    ) -> Result<ScrollPage, MoltError>;

    /// Insert or overwrite a batch of points.
    async fn upsert_batch(&self, namespace: &str, points: &[Point]) -> Result<(), MoltError>;

    /// Top-k nearest neighbours of `vector`, sorted by descending score.
    async fn search(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, MoltError>;

    /// Whether the namespace exists.
    async fn namespace_exists(&self, namespace: &str) -> Result<bool, MoltError>;

    /// Create an empty namespace with fixed dimensionality.
    async fn create_namespace(&self, namespace: &str, dimension: usize) -> Result<(), MoltError>;

    /// Remove every point but keep the namespace.
    ///
    /// Backends that cannot delete by an empty filter return
    /// `MoltError::Unsupported`; callers fall back to drop + recreate.
    async fn delete_all_points(&self, namespace: &str) -> Result<(), MoltError>;

    /// Drop the namespace entirely.
    async fn drop_namespace(&self, namespace: &str) -> Result<(), MoltError>;

    /// Namespace the alias currently resolves to.
    async fn get_alias_target(&self, alias: &str) -> Result<Option<String>, MoltError>;

    /// Atomically create or replace `alias` so it resolves to `namespace`.
    async fn set_alias(&self, alias: &str, namespace: &str) -> Result<(), MoltError>;

    /// Best-effort index optimization. No-op unless the backend supports it.
    async fn optimize(&self, _namespace: &str) -> Result<(), MoltError> {
        Ok(())
    }
}

/// Trait for an embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Output dimensionality.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts. Output has the same length and order as input.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MoltError>;
}

/// Fire-and-forget telemetry.
///
/// Implementations must never block or fail the caller.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, topic: &str, payload: Value);
}
