//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Every variant is a storage fault from the point of view of the index
/// layer: it aborts the current transaction and is never retried by the core.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of a byte store.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// The persisted data is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The named tree has not been opened or created.
    #[error("tree not found: {0}")]
    TreeNotFound(String),

    /// The cursor cannot perform the requested operation in its current state.
    #[error("invalid cursor state: {0}")]
    InvalidCursorState(String),

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,

    /// Another process holds the storage lock.
    #[error("storage locked: another process has exclusive access")]
    Locked,
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Creates an invalid cursor state error.
    pub fn invalid_cursor_state(message: impl Into<String>) -> Self {
        Self::InvalidCursorState(message.into())
    }
}
