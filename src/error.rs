//! Knowledge core error taxonomy

use thiserror::Error;

/// Errors raised by the knowledge core
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// Empty question or answer, rejected before any store mutation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Feedback or lookup on a key the store does not hold
    #[error("Not found: {0}")]
    NotFound(String),

    /// External lookup failed in transport
    #[error("Network error: {0}")]
    Network(String),

    /// Lookup succeeded but produced no usable answer
    #[error("Extraction failure: {0}")]
    Extraction(String),

    /// Loading or saving the persistence medium failed
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl From<rusqlite::Error> for KnowledgeError {
    fn from(err: rusqlite::Error) -> Self {
        KnowledgeError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for KnowledgeError {
    fn from(err: serde_json::Error) -> Self {
        KnowledgeError::Persistence(err.to_string())
    }
}

/// Result alias for the knowledge core
pub type KnowledgeResult<T> = std::result::Result<T, KnowledgeError>;
