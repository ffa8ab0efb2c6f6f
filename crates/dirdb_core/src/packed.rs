//! Packed unsigned integers (LEB128).
//!
//! Seven payload bits per byte, low group first, high bit set on every byte
//! except the last. Used by the V2 ID-set codec and the import record layout.

use crate::error::{CoreError, CoreResult};

/// Maximum encoded length of a `u64`.
pub const MAX_LEN: usize = 10;

/// Appends the packed form of `value` to `out`.
pub fn write_u64(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Number of bytes `value` occupies when packed.
#[must_use]
pub fn len_u64(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Decodes a packed value from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed.
///
/// # Errors
///
/// Returns an error if the input ends mid-value or the value overflows.
pub fn read_u64(bytes: &[u8]) -> CoreResult<(u64, usize)> {
    let mut value = 0u64;
    for (i, byte) in bytes.iter().take(MAX_LEN).enumerate() {
        let group = u64::from(byte & 0x7F);
        if i == MAX_LEN - 1 && group > 1 {
            return Err(CoreError::invalid_format("packed integer overflows u64"));
        }
        value |= group << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(CoreError::invalid_format("truncated packed integer"))
}

/// Sequential reader over packed values.
#[derive(Debug)]
pub struct PackedReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PackedReader<'a> {
    /// Creates a reader over `bytes`.
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Reads the next packed value.
    ///
    /// # Errors
    ///
    /// Returns an error on truncated or overflowing input.
    pub fn read_u64(&mut self) -> CoreResult<u64> {
        let (value, used) = read_u64(&self.bytes[self.pos..])?;
        self.pos += used;
        Ok(value)
    }

    /// Reads `len` raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than `len` bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| CoreError::invalid_format("truncated packed record"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Bytes consumed so far.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Returns the unread tail.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_encodings() {
        let mut out = Vec::new();
        write_u64(&mut out, 0);
        write_u64(&mut out, 127);
        write_u64(&mut out, 128);
        write_u64(&mut out, 300);
        assert_eq!(out, vec![0x00, 0x7F, 0x80, 0x01, 0xAC, 0x02]);
    }

    #[test]
    fn length_matches_encoding() {
        for value in [0, 1, 127, 128, 16_383, 16_384, u64::from(u32::MAX), u64::MAX] {
            let mut out = Vec::new();
            write_u64(&mut out, value);
            assert_eq!(out.len(), len_u64(value), "value {value}");
            assert_eq!(read_u64(&out).unwrap(), (value, out.len()));
        }
        assert_eq!(len_u64(u64::MAX), MAX_LEN);
    }

    #[test]
    fn truncated_input_fails() {
        assert!(read_u64(&[0x80, 0x80]).is_err());
        assert!(read_u64(&[]).is_err());
    }

    #[test]
    fn overflow_fails() {
        let mut bytes = vec![0xFF; 9];
        bytes.push(0x02);
        assert!(read_u64(&bytes).is_err());
    }

    #[test]
    fn reader_walks_mixed_content() {
        let mut out = Vec::new();
        write_u64(&mut out, 3);
        out.extend_from_slice(b"abc");
        write_u64(&mut out, 1_000);

        let mut reader = PackedReader::new(&out);
        let len = reader.read_u64().unwrap() as usize;
        assert_eq!(reader.read_bytes(len).unwrap(), b"abc");
        assert_eq!(reader.read_u64().unwrap(), 1_000);
        assert!(reader.remaining().is_empty());
        assert_eq!(reader.position(), out.len());
        assert!(reader.read_bytes(1).is_err());
    }
}
