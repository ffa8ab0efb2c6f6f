//! Append-only commit journal.
//!
//! Every committed write transaction becomes one journal record:
//!
//! ```text
//! | magic "DJNL" (4) | payload length u32 LE (4) | payload | crc32 u32 LE (4) |
//! ```
//!
//! The payload is a sequence of operations, each a tag byte followed by
//! length-prefixed fields. Replaying all records in order rebuilds every tree.
//!
//! ## Invariants
//!
//! - A record is either fully applied on replay or not at all.
//! - An incomplete or checksum-failing final record is a torn write and is
//!   truncated away. The same failure on an earlier record is corruption.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::tree::TreeName;

/// Magic bytes opening every journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"DJNL";

const HEADER_LEN: usize = 8;
const TRAILER_LEN: usize = 4;

/// One operation of a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalOp {
    /// Drops every tree. Opens a compacted snapshot record.
    Reset,
    /// Creates an empty tree.
    CreateTree(TreeName),
    /// Deletes a tree and its records.
    DeleteTree(TreeName),
    /// Stores a record.
    Put {
        /// Target tree.
        tree: TreeName,
        /// Record key.
        key: Vec<u8>,
        /// Record value.
        value: Vec<u8>,
    },
    /// Deletes a record.
    Delete {
        /// Target tree.
        tree: TreeName,
        /// Record key.
        key: Vec<u8>,
    },
}

impl JournalOp {
    const TAG_RESET: u8 = 0;
    const TAG_CREATE: u8 = 1;
    const TAG_DELETE_TREE: u8 = 2;
    const TAG_PUT: u8 = 3;
    const TAG_DELETE: u8 = 4;

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Reset => out.push(Self::TAG_RESET),
            Self::CreateTree(tree) => {
                out.push(Self::TAG_CREATE);
                put_field(out, tree.to_string().as_bytes());
            }
            Self::DeleteTree(tree) => {
                out.push(Self::TAG_DELETE_TREE);
                put_field(out, tree.to_string().as_bytes());
            }
            Self::Put { tree, key, value } => {
                out.push(Self::TAG_PUT);
                put_field(out, tree.to_string().as_bytes());
                put_field(out, key);
                put_field(out, value);
            }
            Self::Delete { tree, key } => {
                out.push(Self::TAG_DELETE);
                put_field(out, tree.to_string().as_bytes());
                put_field(out, key);
            }
        }
    }
}

fn put_field(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn take(&mut self, len: usize) -> StorageResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| StorageError::corrupted("journal operation truncated"))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn field(&mut self) -> StorageResult<&'a [u8]> {
        let len = self.take(4)?;
        let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
        self.take(len)
    }

    fn tree(&mut self) -> StorageResult<TreeName> {
        let raw = self.field()?;
        std::str::from_utf8(raw)
            .map_err(|_| StorageError::corrupted("tree name is not UTF-8"))?
            .parse()
    }

    fn op(&mut self) -> StorageResult<JournalOp> {
        let tag = self.take(1)?[0];
        Ok(match tag {
            JournalOp::TAG_RESET => JournalOp::Reset,
            JournalOp::TAG_CREATE => JournalOp::CreateTree(self.tree()?),
            JournalOp::TAG_DELETE_TREE => JournalOp::DeleteTree(self.tree()?),
            JournalOp::TAG_PUT => JournalOp::Put {
                tree: self.tree()?,
                key: self.field()?.to_vec(),
                value: self.field()?.to_vec(),
            },
            JournalOp::TAG_DELETE => JournalOp::Delete {
                tree: self.tree()?,
                key: self.field()?.to_vec(),
            },
            other => {
                return Err(StorageError::corrupted(format!(
                    "unknown journal operation tag {other}"
                )))
            }
        })
    }
}

/// Encodes `ops` as one framed journal record.
pub fn encode_record(ops: &[JournalOp]) -> Vec<u8> {
    let mut payload = Vec::new();
    for op in ops {
        op.encode_into(&mut payload);
    }
    let mut record = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    record.extend_from_slice(&JOURNAL_MAGIC);
    record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    record.extend_from_slice(&payload);
    record.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    record
}

/// Result of scanning a journal image.
#[derive(Debug)]
pub struct Replay {
    /// Decoded records, oldest first.
    pub records: Vec<Vec<JournalOp>>,
    /// Length of the valid prefix. Anything past it is a torn tail.
    pub valid_len: u64,
}

/// Decodes every record of a journal image.
///
/// # Errors
///
/// Returns [`StorageError::Corrupted`] for a bad record that is followed by
/// more data.
pub fn scan(image: &[u8]) -> StorageResult<Replay> {
    let mut records = Vec::new();
    let mut pos = 0usize;

    while pos < image.len() {
        let rest = &image[pos..];
        if rest.len() < HEADER_LEN {
            break;
        }
        if rest[..4] != JOURNAL_MAGIC {
            return Err(StorageError::corrupted(format!(
                "bad journal magic at offset {pos}"
            )));
        }
        let len = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let total = HEADER_LEN + len + TRAILER_LEN;
        if rest.len() < total {
            break;
        }
        let payload = &rest[HEADER_LEN..HEADER_LEN + len];
        let trailer = &rest[HEADER_LEN + len..total];
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if crc32fast::hash(payload) != stored {
            if pos + total == image.len() {
                break;
            }
            return Err(StorageError::corrupted(format!(
                "journal checksum mismatch at offset {pos}"
            )));
        }

        let mut reader = PayloadReader { data: payload, pos: 0 };
        let mut ops = Vec::new();
        while reader.pos < payload.len() {
            ops.push(reader.op()?);
        }
        records.push(ops);
        pos += total;
    }

    Ok(Replay {
        records,
        valid_len: pos as u64,
    })
}

/// Journal writer bound to a byte store.
pub struct Journal {
    backend: Box<dyn StorageBackend>,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").finish_non_exhaustive()
    }
}

impl Journal {
    /// Scans the byte store, drops a torn tail and returns the journal with
    /// the records to replay.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or is corrupted.
    pub fn open(mut backend: Box<dyn StorageBackend>) -> StorageResult<(Self, Vec<Vec<JournalOp>>)> {
        let size = backend.size()?;
        let image = backend.read_at(0, size as usize)?;
        let replay = scan(&image)?;
        if replay.valid_len < size {
            tracing::warn!(
                valid = replay.valid_len,
                size,
                "truncating torn journal tail"
            );
            backend.truncate(replay.valid_len)?;
        }
        Ok((Self { backend }, replay.records))
    }

    /// Appends one record and syncs it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or the sync fails.
    pub fn append(&mut self, ops: &[JournalOp]) -> StorageResult<()> {
        self.backend.append(&encode_record(ops))?;
        self.backend.sync()
    }

    /// Replaces the journal with a single record.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncation, the write or the sync fails.
    pub fn rewrite(&mut self, ops: &[JournalOp]) -> StorageResult<()> {
        self.backend.truncate(0)?;
        self.append(ops)
    }

    /// Current journal size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn size(&self) -> StorageResult<u64> {
        self.backend.size()
    }

    /// Syncs the byte store.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> StorageResult<()> {
        self.backend.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;

    fn tree() -> TreeName {
        TreeName::new("o=test", "dn2id")
    }

    fn sample_ops() -> Vec<JournalOp> {
        vec![
            JournalOp::CreateTree(tree()),
            JournalOp::Put {
                tree: tree(),
                key: b"k".to_vec(),
                value: b"v".to_vec(),
            },
            JournalOp::Delete {
                tree: tree(),
                key: b"gone".to_vec(),
            },
        ]
    }

    #[test]
    fn scan_reads_back_records() {
        let mut image = encode_record(&sample_ops());
        image.extend(encode_record(&[JournalOp::DeleteTree(tree())]));

        let replay = scan(&image).unwrap();
        assert_eq!(replay.valid_len, image.len() as u64);
        assert_eq!(replay.records.len(), 2);
        assert_eq!(replay.records[0], sample_ops());
    }

    #[test]
    fn torn_tail_is_ignored() {
        let first = encode_record(&sample_ops());
        let mut image = first.clone();
        let second = encode_record(&[JournalOp::Reset]);
        image.extend_from_slice(&second[..second.len() - 2]);

        let replay = scan(&image).unwrap();
        assert_eq!(replay.records.len(), 1);
        assert_eq!(replay.valid_len, first.len() as u64);
    }

    #[test]
    fn checksum_failure_in_last_record_is_torn() {
        let mut image = encode_record(&sample_ops());
        let last = image.len() - 1;
        image[last] ^= 0xFF;
        let replay = scan(&image).unwrap();
        assert!(replay.records.is_empty());
        assert_eq!(replay.valid_len, 0);
    }

    #[test]
    fn checksum_failure_before_tail_is_corruption() {
        let mut image = encode_record(&sample_ops());
        image[HEADER_LEN] ^= 0xFF;
        image.extend(encode_record(&[JournalOp::Reset]));
        assert!(matches!(scan(&image), Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn open_truncates_torn_tail() {
        let mut image = encode_record(&sample_ops());
        let valid = image.len() as u64;
        image.extend_from_slice(b"DJNL\x40");

        let (journal, records) = Journal::open(Box::new(InMemoryBackend::with_data(image))).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(journal.size().unwrap(), valid);
    }
}
