//! Error types for the adapter boundary and the synchronization core.

use thiserror::Error;

use crate::diff::PatchError;

/// Errors raised by a [`crate::adapter::StorageAdapter`] implementation.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("adapter error: {0}")]
    Other(String),
}

/// Errors surfaced by the synchronization core (RoomStore, EditProcessor, SaveCoalescer).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Patch(#[from] PatchError),
}

pub type CoreResult<T> = Result<T, CoreError>;
