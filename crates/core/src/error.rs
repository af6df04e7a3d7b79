// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    #[error("Message {index} ({size} bytes) is too large to fit in a batch of {limit} bytes")]
    MessageTooLarge {
        index: usize,
        size: usize,
        limit: usize,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Input errors are rejected before any network call and never retried
    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::Domain(_) | AppError::Validation(_))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
