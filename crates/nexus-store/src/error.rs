use nexus_core::error::NexusError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(e.to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

impl From<StoreError> for NexusError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => NexusError::NotFound(m),
            StoreError::Conflict(m) => NexusError::Conflict(m),
            StoreError::Unauthorized(m) => NexusError::Unauthorized(m),
            StoreError::Unavailable(m) => NexusError::Unavailable(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
