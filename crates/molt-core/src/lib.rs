// crates/molt-core/src/lib.rs
//
// molt-core: Core types, collaborator traits, and telemetry sinks for Molt.
//
// This is the leaf crate that all other crates in the workspace depend on.
// It defines the point shapes that cross the vector-store boundary, the
// protocol-wide error enum, the `VectorStore` / `Embedder` / `TelemetrySink`
// seams, and the deterministic hash embedder used by tests and local runs.

pub mod embedding;
pub mod error;
pub mod point;
pub mod telemetry;
pub mod traits;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use molt_core::Point;`

// Point types
pub use point::{Point, ScrollPage, SearchHit};

// Embedding helpers
pub use embedding::{cosine_similarity, hash_embedding, l2_norm, HashEmbedder};

// Telemetry sinks
pub use telemetry::{MemoryTelemetry, NoopTelemetry, Signal, TracingTelemetry};

// Error type
pub use error::MoltError;

// Traits
pub use traits::{Embedder, TelemetrySink, VectorStore};
