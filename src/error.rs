//! Error types for Guardrail.

use thiserror::Error;

use crate::cache::StoreError;

/// Main error type for Guardrail operations.
///
/// The rate limiter and the cache never surface errors from their hot paths;
/// this type covers the fallible edges (configuration, opening stores).
#[derive(Error, Debug)]
pub enum GuardrailError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backing store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Guardrail operations.
pub type Result<T> = std::result::Result<T, GuardrailError>;
