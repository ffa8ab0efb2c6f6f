//! Core type definitions.

use std::fmt;

use crate::error::{CoreError, CoreResult};

/// Identifier of a directory entry.
///
/// Entry IDs are positive and allocated in increasing order. Their key form is
/// 8 bytes big-endian, so the storage order of ID keys is numeric order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub u64);

impl EntryId {
    /// Creates an entry ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next ID.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the 8-byte big-endian key form.
    #[must_use]
    pub const fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Parses the 8-byte big-endian key form.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not exactly 8 bytes long.
    pub fn from_key(bytes: &[u8]) -> CoreResult<Self> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| CoreError::invalid_format(format!("entry ID key has {} bytes", bytes.len())))?;
        Ok(Self(u64::from_be_bytes(raw)))
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntryId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_order_matches_numeric_order() {
        let small = EntryId::new(255).to_key();
        let large = EntryId::new(256).to_key();
        assert!(small < large);
        assert_eq!(EntryId::from_key(&large).unwrap(), EntryId::new(256));
    }

    #[test]
    fn from_key_rejects_wrong_length() {
        assert!(EntryId::from_key(&[1, 2, 3]).is_err());
    }
}
