// crates/molt-store/src/qdrant.rs
//
// Qdrant REST adapter implementing the `VectorStore` trait.
// Uses reqwest to talk to the Qdrant HTTP API. Namespaces map to
// collections; aliases map to collection aliases.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use molt_core::error::MoltError;
use molt_core::point::{Point, ScrollPage, SearchHit};
use molt_core::traits::VectorStore;

/// Standard Qdrant response envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    points: Vec<RawPoint>,
    next_page_offset: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    id: Value,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
    #[serde(default)]
    vector: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    id: Value,
    score: f32,
}

#[derive(Debug, Deserialize)]
struct ExistsResult {
    exists: bool,
}

#[derive(Debug, Deserialize)]
struct AliasList {
    aliases: Vec<AliasEntry>,
}

#[derive(Debug, Deserialize)]
struct AliasEntry {
    alias_name: String,
    collection_name: String,
}

/// Qdrant client speaking the REST API.
#[derive(Debug, Clone)]
pub struct QdrantStore {
    /// Base URL of the Qdrant HTTP API (e.g., "http://127.0.0.1:6333").
    pub base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl QdrantStore {
    /// Create a new client pointing at the given API base URL.
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Use a preconfigured reqwest client (timeouts, proxies).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    /// Send a request and decode the `result` field of the envelope.
    ///
    /// Client errors (4xx) map to `Unsupported` only when `unsupported_on_4xx`
    /// is set; everything else is a `Storage` error.
    async fn send<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        what: &str,
        unsupported_on_4xx: bool,
    ) -> Result<T, MoltError> {
        let response = builder
            .send()
            .await
            .map_err(|e| MoltError::Network(format!("Qdrant {} request failed: {}", what, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::NOT_FOUND && !unsupported_on_4xx {
                return Err(MoltError::NotFound(format!("Qdrant {}: {}", what, body)));
            }
            if unsupported_on_4xx && status.is_client_error() {
                return Err(MoltError::Unsupported(format!(
                    "Qdrant {} ({}): {}",
                    what, status, body
                )));
            }
            return Err(MoltError::Storage(format!(
                "Qdrant {} failed ({}): {}",
                what, status, body
            )));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| MoltError::Serialization(format!("Qdrant {} body: {}", what, e)))?;
        Ok(envelope.result)
    }
}

/// Qdrant ids are unsigned integers or UUID strings.
fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn id_to_json(id: &str) -> Value {
    match id.parse::<u64>() {
        Ok(n) => json!(n),
        Err(_) => json!(id),
    }
}

/// Only unnamed dense vectors are understood; named or sparse vectors are dropped.
fn vector_from_json(vector: Option<Value>) -> Vec<f32> {
    match vector {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_f64)
            .map(|v| v as f32)
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn scroll_points(
        &self,
        namespace: &str,
        page_size: usize,
        cursor: Option<String>,
    ) -> Result<ScrollPage, MoltError> {
        let mut body = json!({
            "limit": page_size.max(1),
            "with_payload": true,
            "with_vector": true,
        });
        if let Some(offset) = cursor {
            body["offset"] = serde_json::from_str(&offset).unwrap_or(Value::String(offset));
        }

        let result: ScrollResult = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{}/points/scroll", namespace),
                )
                .json(&body),
                "scroll",
                false,
            )
            .await?;

        let points = result
            .points
            .into_iter()
            .map(|raw| Point {
                id: id_to_string(&raw.id),
                vector: vector_from_json(raw.vector),
                payload: raw.payload.unwrap_or_default(),
            })
            .collect();

        // Keep the cursor as raw JSON so integer offsets survive the round trip.
        let next_cursor = result
            .next_page_offset
            .filter(|v| !v.is_null())
            .map(|v| v.to_string());

        Ok(ScrollPage {
            points,
            next_cursor,
        })
    }

    async fn upsert_batch(&self, namespace: &str, points: &[Point]) -> Result<(), MoltError> {
        let body = json!({
            "points": points
                .iter()
                .map(|p| json!({
                    "id": id_to_json(&p.id),
                    "vector": p.vector,
                    "payload": p.payload,
                }))
                .collect::<Vec<_>>(),
        });

        let _: Value = self
            .send(
                self.request(
                    reqwest::Method::PUT,
                    &format!("/collections/{}/points?wait=true", namespace),
                )
                .json(&body),
                "upsert",
                false,
            )
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, MoltError> {
        let body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": false,
        });

        let hits: Vec<RawHit> = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{}/points/search", namespace),
                )
                .json(&body),
                "search",
                false,
            )
            .await?;

        Ok(hits
            .into_iter()
            .map(|h| SearchHit {
                id: id_to_string(&h.id),
                score: h.score,
            })
            .collect())
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool, MoltError> {
        let result: ExistsResult = self
            .send(
                self.request(
                    reqwest::Method::GET,
                    &format!("/collections/{}/exists", namespace),
                ),
                "exists",
                false,
            )
            .await?;
        Ok(result.exists)
    }

    async fn create_namespace(&self, namespace: &str, dimension: usize) -> Result<(), MoltError> {
        let body = json!({
            "vectors": { "size": dimension, "distance": "Cosine" },
        });
        let _: Value = self
            .send(
                self.request(reqwest::Method::PUT, &format!("/collections/{}", namespace))
                    .json(&body),
                "create collection",
                false,
            )
            .await?;
        tracing::debug!(namespace, dimension, "Qdrant collection created");
        Ok(())
    }

    async fn delete_all_points(&self, namespace: &str) -> Result<(), MoltError> {
        let body = json!({ "filter": {} });
        let _: Value = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{}/points/delete?wait=true", namespace),
                )
                .json(&body),
                "delete by filter",
                true,
            )
            .await?;
        Ok(())
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<(), MoltError> {
        let _: Value = self
            .send(
                self.request(reqwest::Method::DELETE, &format!("/collections/{}", namespace)),
                "drop collection",
                false,
            )
            .await?;
        tracing::debug!(namespace, "Qdrant collection dropped");
        Ok(())
    }

    async fn get_alias_target(&self, alias: &str) -> Result<Option<String>, MoltError> {
        let list: AliasList = self
            .send(self.request(reqwest::Method::GET, "/aliases"), "list aliases", false)
            .await?;
        Ok(list
            .aliases
            .into_iter()
            .find(|a| a.alias_name == alias)
            .map(|a| a.collection_name))
    }

    async fn set_alias(&self, alias: &str, namespace: &str) -> Result<(), MoltError> {
        // Qdrant applies every action of one request atomically, so the
        // delete + create pair below is a single create-or-replace.
        let exists = self.get_alias_target(alias).await?.is_some();
        let mut actions = Vec::with_capacity(2);
        if exists {
            actions.push(json!({ "delete_alias": { "alias_name": alias } }));
        }
        actions.push(json!({
            "create_alias": { "collection_name": namespace, "alias_name": alias }
        }));

        let _: Value = self
            .send(
                self.request(reqwest::Method::POST, "/collections/aliases")
                    .json(&json!({ "actions": actions })),
                "update aliases",
                false,
            )
            .await?;
        tracing::debug!(alias, namespace, replaced = exists, "Qdrant alias updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trip_shapes() {
        assert_eq!(id_to_string(&json!(42)), "42");
        assert_eq!(id_to_string(&json!("a-uuid")), "a-uuid");
        assert_eq!(id_to_json("42"), json!(42));
        assert_eq!(id_to_json("abc"), json!("abc"));
    }

    #[test]
    fn test_vector_from_json_ignores_named_vectors() {
        assert_eq!(vector_from_json(Some(json!([0.5, 1.0]))), vec![0.5, 1.0]);
        assert!(vector_from_json(Some(json!({"dense": [1.0]}))).is_empty());
        assert!(vector_from_json(None).is_empty());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let store = QdrantStore::new("http://localhost:6333/", None);
        assert_eq!(store.base_url, "http://localhost:6333");
    }
}
