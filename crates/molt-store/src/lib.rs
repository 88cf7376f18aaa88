// crates/molt-store/src/lib.rs
//
// molt-store: Vector store adapters for Molt.
//
// Provides an in-memory brute-force store for tests and local runs, and a
// Qdrant REST adapter for production. Each adapter converts its own wire
// shapes into `molt_core::Point` / `SearchHit` / `ScrollPage`; nothing
// driver-specific leaks past this crate.

pub mod memory;
pub mod qdrant;

// Re-export key types for ergonomic access from downstream crates.
pub use memory::InMemoryVectorStore;
pub use qdrant::QdrantStore;
