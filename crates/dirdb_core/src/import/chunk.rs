//! Sorted chunks of `(key, value)` records.
//!
//! Records use the layout
//!
//! ```text
//! <key length varint> <key> <value length varint> <value>
//! ```
//!
//! in buffers and in spilled regions alike. Keys compare as unsigned bytes.

use rayon::slice::ParallelSliceMut;

use crate::error::{CoreError, CoreResult};
use crate::import::buffer::PooledBuffer;
use crate::import::cursor::{EmptyCursor, MeteredCursor};
use crate::packed;

/// Sink of records that flips into a sorted cursor.
pub trait Chunk: Send {
    /// Adds a record. Returns `false` if the chunk is full and the record was
    /// not added.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecordTooLarge`] for a record that can never fit,
    /// or an I/O error from spilling.
    fn put(&mut self, key: &[u8], value: &[u8]) -> CoreResult<bool>;

    /// Stops accepting records and returns a cursor over all of them in key
    /// order.
    ///
    /// # Errors
    ///
    /// Returns an error if pending sorts or spills failed.
    fn flip(self: Box<Self>) -> CoreResult<Box<dyn MeteredCursor>>;

    /// Bytes of records put so far.
    fn size(&self) -> u64;
}

/// Encoded size of one record.
#[must_use]
pub fn record_len(key: &[u8], value: &[u8]) -> usize {
    packed::len_u64(key.len() as u64) + key.len() + packed::len_u64(value.len() as u64) + value.len()
}

/// Appends one record to `out`.
pub fn write_record(out: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    packed::write_u64(out, key.len() as u64);
    out.extend_from_slice(key);
    packed::write_u64(out, value.len() as u64);
    out.extend_from_slice(value);
}

/// Position of one record inside a byte slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSlot {
    /// First byte of the record.
    pub start: usize,
    /// First byte of the key.
    pub key: usize,
    /// Key length.
    pub key_len: usize,
    /// First byte of the value.
    pub value: usize,
    /// Value length.
    pub value_len: usize,
}

impl RecordSlot {
    /// One past the last byte of the record.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.value + self.value_len
    }

    /// Key bytes within `data`.
    #[must_use]
    pub fn key_in<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.key..self.key + self.key_len]
    }

    /// Value bytes within `data`.
    #[must_use]
    pub fn value_in<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.value..self.end()]
    }

    /// Whole record within `data`.
    #[must_use]
    pub fn record_in<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.start..self.end()]
    }
}

/// Decodes the record starting at `start` of `data`, which must end at or
/// before `end`.
///
/// # Errors
///
/// Returns [`CoreError::InvalidFormat`] if the record runs past `end`.
pub fn read_record(data: &[u8], start: usize, end: usize) -> CoreResult<RecordSlot> {
    let window = data
        .get(start..end)
        .ok_or_else(|| CoreError::invalid_format("record window out of bounds"))?;
    let (key_len, used) = packed::read_u64(window)?;
    let key = start + used;
    let key_len = usize::try_from(key_len)
        .map_err(|_| CoreError::invalid_format("record key length overflow"))?;
    let after_key = key
        .checked_add(key_len)
        .filter(|pos| *pos <= end)
        .ok_or_else(|| CoreError::invalid_format("record key runs past the end"))?;
    let (value_len, used) = packed::read_u64(&data[after_key..end])?;
    let value = after_key + used;
    let value_len = usize::try_from(value_len)
        .map_err(|_| CoreError::invalid_format("record value length overflow"))?;
    value
        .checked_add(value_len)
        .filter(|pos| *pos <= end)
        .ok_or_else(|| CoreError::invalid_format("record value runs past the end"))?;
    Ok(RecordSlot {
        start,
        key,
        key_len,
        value,
        value_len,
    })
}

/// Records packed into one pooled buffer, sorted on flip.
///
/// Records with equal keys keep their insertion order.
pub struct InMemorySortedChunk {
    name: String,
    buffer: PooledBuffer,
    used: usize,
    slots: Vec<RecordSlot>,
}

impl InMemorySortedChunk {
    /// Creates an empty chunk over `buffer`.
    pub fn new(name: impl Into<String>, buffer: PooledBuffer) -> Self {
        Self {
            name: name.into(),
            buffer,
            used: 0,
            slots: Vec::new(),
        }
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no record was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bytes used in the buffer.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.used
    }

    /// Sorts records by unsigned key order on the current thread.
    pub fn sort(&mut self) {
        let data = self.buffer.as_slice();
        self.slots.sort_by(|a, b| a.key_in(data).cmp(b.key_in(data)));
    }

    /// Sorts records by unsigned key order on the rayon pool of the caller.
    pub fn par_sort(&mut self) {
        let data = self.buffer.as_slice();
        self.slots.par_sort_by(|a, b| a.key_in(data).cmp(b.key_in(data)));
    }

    /// Encoded records in their current order.
    pub fn records(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let data = self.buffer.as_slice();
        self.slots.iter().map(move |slot| slot.record_in(data))
    }

    /// Cursor over the records in their current order.
    #[must_use]
    pub fn into_cursor(self) -> InMemoryCursor {
        InMemoryCursor {
            total: self.used as u64,
            name: self.name,
            buffer: self.buffer,
            slots: self.slots,
            position: None,
            bytes_read: 0,
        }
    }
}

impl Chunk for InMemorySortedChunk {
    fn put(&mut self, key: &[u8], value: &[u8]) -> CoreResult<bool> {
        let size = record_len(key, value);
        let capacity = self.buffer.capacity();
        if size > capacity {
            return Err(CoreError::RecordTooLarge { size, capacity });
        }
        if self.used + size > capacity {
            return Ok(false);
        }
        let mut encoded = Vec::with_capacity(size);
        write_record(&mut encoded, key, value);
        let start = self.used;
        self.buffer.as_mut_slice()[start..start + size].copy_from_slice(&encoded);
        let key_at = start + packed::len_u64(key.len() as u64);
        let value_at = key_at + key.len() + packed::len_u64(value.len() as u64);
        self.slots.push(RecordSlot {
            start,
            key: key_at,
            key_len: key.len(),
            value: value_at,
            value_len: value.len(),
        });
        self.used += size;
        Ok(true)
    }

    fn flip(mut self: Box<Self>) -> CoreResult<Box<dyn MeteredCursor>> {
        self.sort();
        Ok(Box::new((*self).into_cursor()))
    }

    fn size(&self) -> u64 {
        self.used as u64
    }
}

/// Cursor over a flipped [`InMemorySortedChunk`]. Releases the buffer when
/// dropped.
pub struct InMemoryCursor {
    name: String,
    buffer: PooledBuffer,
    slots: Vec<RecordSlot>,
    position: Option<usize>,
    bytes_read: u64,
    total: u64,
}

impl InMemoryCursor {
    fn current(&self) -> Option<&RecordSlot> {
        self.position.and_then(|p| self.slots.get(p))
    }
}

impl MeteredCursor for InMemoryCursor {
    fn next(&mut self) -> CoreResult<bool> {
        let next = self.position.map_or(0, |p| p + 1).min(self.slots.len());
        self.position = Some(next);
        match self.slots.get(next) {
            Some(slot) => {
                self.bytes_read += (slot.end() - slot.start) as u64;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn key(&self) -> &[u8] {
        match self.current() {
            Some(slot) => slot.key_in(self.buffer.as_slice()),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.current() {
            Some(slot) => slot.value_in(self.buffer.as_slice()),
            None => &[],
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    fn total_bytes(&self) -> u64 {
        self.total
    }
}

/// Chunk that drops every record.
#[derive(Debug, Default)]
pub struct NullChunk {
    name: String,
}

impl NullChunk {
    /// Creates the chunk.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Chunk for NullChunk {
    fn put(&mut self, _key: &[u8], _value: &[u8]) -> CoreResult<bool> {
        Ok(true)
    }

    fn flip(self: Box<Self>) -> CoreResult<Box<dyn MeteredCursor>> {
        Ok(Box::new(EmptyCursor::new(self.name)))
    }

    fn size(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferKind;
    use crate::import::buffer::BufferPool;
    use std::time::Duration;

    fn chunk(size: usize) -> InMemorySortedChunk {
        let pool = BufferPool::new(size, 1, BufferKind::Heap, Duration::from_millis(10)).unwrap();
        InMemorySortedChunk::new("test", pool.acquire().unwrap())
    }

    fn keys(cursor: &mut dyn MeteredCursor) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while cursor.next().unwrap() {
            out.push(cursor.key().to_vec());
        }
        out
    }

    #[test]
    fn sorts_keys_as_unsigned_bytes() {
        let mut chunk = chunk(256);
        assert!(chunk.put(&[0xFF], b"high").unwrap());
        assert!(chunk.put(&[0x00], b"low").unwrap());
        assert!(chunk.put(b"key1", b"mid").unwrap());
        let mut cursor = Box::new(chunk).flip().unwrap();
        assert_eq!(keys(cursor.as_mut()), vec![vec![0x00], b"key1".to_vec(), vec![0xFF]]);
        assert_eq!(cursor.bytes_read(), cursor.total_bytes());
    }

    #[test]
    fn equal_keys_keep_insertion_order() {
        let mut chunk = chunk(256);
        for value in ["3", "1", "2"] {
            chunk.put(b"k", value.as_bytes()).unwrap();
        }
        chunk.par_sort();
        let mut cursor = chunk.into_cursor();
        let mut values = Vec::new();
        while cursor.next().unwrap() {
            values.push(String::from_utf8_lossy(cursor.value()).into_owned());
        }
        assert_eq!(values, vec!["3", "1", "2"]);
    }

    #[test]
    fn full_chunk_refuses_and_oversized_record_fails() {
        let mut chunk = chunk(64);
        assert!(chunk.put(&[1; 30], &[2; 20]).unwrap());
        assert!(!chunk.put(&[3; 10], &[4; 10]).unwrap());
        assert_eq!(chunk.len(), 1);
        let err = chunk.put(&[0; 70], b"").unwrap_err();
        assert!(matches!(err, CoreError::RecordTooLarge { size: 72, capacity: 64 }));
    }

    #[test]
    fn record_layout() {
        let mut out = Vec::new();
        write_record(&mut out, b"ab", b"xyz");
        assert_eq!(out, b"\x02ab\x03xyz");
        assert_eq!(record_len(b"ab", b"xyz"), out.len());
        let slot = read_record(&out, 0, out.len()).unwrap();
        assert_eq!(slot.key_in(&out), b"ab");
        assert_eq!(slot.value_in(&out), b"xyz");
        assert!(read_record(&out, 0, out.len() - 1).is_err());
    }

    #[test]
    fn null_chunk_discards() {
        let mut chunk: Box<dyn Chunk> = Box::new(NullChunk::new("skip"));
        assert!(chunk.put(b"k", b"v").unwrap());
        assert_eq!(chunk.size(), 0);
        let mut cursor = chunk.flip().unwrap();
        assert!(!cursor.next().unwrap());
    }
}
