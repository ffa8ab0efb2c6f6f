//! Error types for dirdb core.

use std::io;
use thiserror::Error;

use crate::types::EntryId;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in dirdb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage fault. Aborts the enclosing transaction.
    #[error("storage error: {0}")]
    Storage(#[from] dirdb_storage::StorageError),

    /// I/O error outside the storage engine (temp files, mappings).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A persisted record could not be decoded.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// An on-disk sort region is truncated or corrupted.
    #[error("corrupted region at offset {offset}: {message}")]
    CorruptedRegion {
        /// Offset of the region in its temp file.
        offset: u64,
        /// Description of the damage.
        message: String,
    },

    /// Two values were collected for a key that must be unique.
    #[error("uniqueness violation for key {key:02x?}")]
    UniquenessViolation {
        /// The duplicated key.
        key: Vec<u8>,
    },

    /// No import buffer became available in time.
    #[error("buffer pool exhausted: no buffer released within {waited_ms} ms")]
    BufferPoolExhausted {
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// A single record does not fit in an empty import buffer.
    #[error("record of {size} bytes exceeds buffer capacity {capacity}")]
    RecordTooLarge {
        /// Encoded record size.
        size: usize,
        /// Buffer capacity.
        capacity: usize,
    },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// A distinguished name could not be parsed.
    #[error("invalid DN {dn:?}: {reason}")]
    InvalidDn {
        /// The offending input.
        dn: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The entry already exists.
    #[error("entry already exists: {dn}")]
    EntryAlreadyExists {
        /// Normalized DN.
        dn: String,
    },

    /// The entry does not exist.
    #[error("no such entry: {dn}")]
    NoSuchEntry {
        /// Normalized DN.
        dn: String,
    },

    /// The parent of an entry does not exist.
    #[error("parent of {dn} does not exist")]
    NoSuchParent {
        /// Normalized DN of the child.
        dn: String,
    },

    /// The entry has subordinates.
    #[error("operation not allowed on non-leaf entry {dn}")]
    NotAllowedOnNonLeaf {
        /// Normalized DN.
        dn: String,
    },

    /// An entry ID was referenced but has no entry.
    #[error("entry {0} not found in id2entry")]
    MissingEntry(EntryId),

    /// The requested operation does not apply in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a corrupted region error.
    pub fn corrupted_region(offset: u64, message: impl Into<String>) -> Self {
        Self::CorruptedRegion {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid DN error.
    pub fn invalid_dn(dn: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDn {
            dn: dn.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_convert() {
        let err: CoreError = dirdb_storage::StorageError::Closed.into();
        assert!(matches!(err, CoreError::Storage(_)));
        assert_eq!(err.to_string(), "storage error: storage is closed");
    }

    #[test]
    fn uniqueness_violation_shows_key() {
        let err = CoreError::UniquenessViolation { key: vec![0x00, 0xAB] };
        assert_eq!(err.to_string(), "uniqueness violation for key [00, ab]");
    }
}
