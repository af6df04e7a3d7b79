// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid namespace/queue locator: {0}")]
    InvalidLocator(String),

    #[error("Invalid job request: {0}")]
    InvalidJobRequest(String),

    #[error("Malformed message payload: {0}")]
    MalformedPayload(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
