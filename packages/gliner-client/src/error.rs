//! Error types for the GLiNER client.

use thiserror::Error;

/// Result type for GLiNER client operations.
pub type Result<T> = std::result::Result<T, GlinerError>;

/// GLiNER client errors.
#[derive(Debug, Error)]
pub enum GlinerError {
    /// Network error (connection failed, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// Inference server answered with a non-2xx status
    #[error("GLiNER API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// Parse error (invalid JSON, unexpected response format)
    #[error("Parse error: {0}")]
    Parse(String),
}
