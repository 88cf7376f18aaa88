// crates/molt-core/src/point.rs
//
// The only shapes that cross the vector-store adapter boundary. Each store
// driver converts its own wire format into these; business logic never
// probes driver-specific objects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload fields searched for embeddable text, in priority order.
pub const TEXT_FIELDS: [&str; 3] = ["text", "content", "statement"];

/// A stored vector point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Point identifier, stable across namespaces.
    pub id: String,
    /// The vector. Empty when a scroll did not fetch vectors.
    #[serde(default)]
    pub vector: Vec<f32>,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Point {
    pub fn new(id: impl Into<String>, vector: Vec<f32>, payload: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            vector,
            payload,
        }
    }

    /// First non-empty string among `text`, `content`, `statement`.
    pub fn embeddable_text(&self) -> Option<&str> {
        TEXT_FIELDS.iter().find_map(|field| {
            self.payload
                .get(*field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        })
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
}

/// One page of a cursor-based scroll.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrollPage {
    pub points: Vec<Point>,
    /// Cursor for the next page; `None` once the namespace is exhausted.
    pub next_cursor: Option<String>,
}
