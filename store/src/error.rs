use thiserror::Error;

/// Errors surfaced by a [`crate::Store`].
///
/// `Storage` wraps any I/O or SQLite failure; callers treat it as the
/// distinguished "storage layer is broken" case and do not retry
/// internally per the durability contract of the backing file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
