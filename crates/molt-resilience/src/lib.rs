// crates/molt-resilience/src/lib.rs
//
// molt-resilience: Circuit breaker and jittered retry wrapping every call
// Molt makes to an external dependency (vector store, embedding service).
//
// This layer never swallows errors: callers decide whether an exhausted
// call is fatal.

pub mod breaker;
pub mod retry;

pub use breaker::{CircuitBreaker, CircuitState};
pub use retry::{ResiliencyLayer, ResilienceConfig};
