//! Error types for enrichment calls.

use thiserror::Error;

/// Enrichment failures. Always local to one row.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AiError {
    /// Connection failed or timed out
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response other than a quota rejection
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Quota or rate-limit rejection (HTTP 429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Response body was not the expected shape, or carried no text
    #[error("Parse error: {0}")]
    Parse(String),

    /// Row prompt could not be rendered
    #[error("Prompt template error: {0}")]
    Template(String),
}
