//! Runtime client errors

use thiserror::Error;

/// Errors that can occur when talking to the container runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The runtime answered with an error
    #[error("Runtime API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Container, image or exec instance not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., empty image reference)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RuntimeError {
    /// Whether the error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}
