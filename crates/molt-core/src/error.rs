use thiserror::Error;

/// Error types shared by every Molt crate.
#[derive(Debug, Error)]
pub enum MoltError {
    /// Vector store error (connectivity, rejected write, missing namespace).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Embedding service error.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Transport-level failure talking to a remote dependency.
    #[error("Network error: {0}")]
    Network(String),

    /// A dependency call exceeded its per-attempt deadline.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// The circuit breaker for a dependency path is open; no attempt was made.
    #[error("Circuit open for {0}")]
    CircuitOpen(String),

    /// The backend does not support the requested operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The job was cancelled between phases.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Invalid state transition or concurrent run conflict.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be read or is invalid.
    #[error("Config error: {0}")]
    Config(String),
}

impl MoltError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Circuit-open, unsupported and cancelled outcomes are final for the
    /// current call.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MoltError::Storage(_)
                | MoltError::Embedding(_)
                | MoltError::Network(_)
                | MoltError::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for MoltError {
    fn from(e: serde_json::Error) -> Self {
        MoltError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for MoltError {
    fn from(e: std::io::Error) -> Self {
        MoltError::Config(e.to_string())
    }
}
