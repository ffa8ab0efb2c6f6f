//! Snapshot-isolated tree engine.
//!
//! [`TreeStorage`] keeps every tree as an ordered map behind an [`Arc`].
//! Readers clone the current snapshot pointer and never block writers. A
//! single writer at a time copies the trees it touches, and its commit swaps
//! the snapshot pointer, so readers observe either all or none of a
//! transaction.
//!
//! ## Durability
//!
//! When opened over a [`StorageBackend`], every commit appends one journal
//! record and syncs it before the new snapshot is published. Reopening the
//! same byte store replays the journal.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::backend::StorageBackend;
use crate::cursor::{Cursor, CursorState};
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::journal::{Journal, JournalOp};
use crate::transaction::{ReadableTransaction, Storage, WriteableTransaction};
use crate::tree::TreeName;

type Tree = BTreeMap<Vec<u8>, Vec<u8>>;
type TreeMap = HashMap<TreeName, Arc<Tree>>;

struct WriterState {
    journal: Option<Journal>,
}

/// Transactional store of named trees.
///
/// # Example
///
/// ```rust
/// use dirdb_storage::{ReadableTransaction, Storage, StorageError, TreeName, TreeStorage, WriteableTransaction};
///
/// let storage = TreeStorage::in_memory();
/// let tree = TreeName::new("o=test", "counters");
///
/// storage.write(|txn| -> Result<(), StorageError> {
///     txn.open_tree(&tree, true)?;
///     txn.update(&tree, b"hits", &mut |old| {
///         let n = old.map_or(0, |v| v[0]);
///         Some(vec![n + 1])
///     })?;
///     Ok(())
/// }).unwrap();
///
/// let hits = storage.read(|txn| txn.read(&tree, b"hits")).unwrap();
/// assert_eq!(hits, Some(vec![1]));
/// ```
pub struct TreeStorage {
    snapshot: RwLock<Arc<TreeMap>>,
    writer: Mutex<WriterState>,
    closed: AtomicBool,
}

impl std::fmt::Debug for TreeStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeStorage")
            .field("trees", &self.snapshot.read().len())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl TreeStorage {
    /// Creates an empty, non-durable store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_parts(TreeMap::new(), None)
    }

    /// Opens a durable store journaled to the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process has the file open,
    /// [`StorageError::Corrupted`] if the journal cannot be replayed, or an
    /// I/O error.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::with_backend(Box::new(FileBackend::open(path)?))
    }

    /// Opens a durable store journaled to `backend`, replaying its content.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] if the journal cannot be replayed,
    /// or an I/O error.
    pub fn with_backend(backend: Box<dyn StorageBackend>) -> StorageResult<Self> {
        let (journal, records) = Journal::open(backend)?;
        let mut trees = TreeMap::new();
        let replayed = records.len();
        for record in records {
            for op in record {
                apply(&mut trees, op)?;
            }
        }
        tracing::debug!(records = replayed, trees = trees.len(), "replayed storage journal");
        Ok(Self::from_parts(trees, Some(journal)))
    }

    fn from_parts(trees: TreeMap, journal: Option<Journal>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(trees)),
            writer: Mutex::new(WriterState { journal }),
            closed: AtomicBool::new(false),
        }
    }

    /// Rewrites the journal as a single snapshot record of the current trees.
    ///
    /// The rewrite truncates the journal before writing the snapshot, so it
    /// must not run while a crash would be unrecoverable. Non-durable stores
    /// ignore the call.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Closed`] after close, or an I/O error.
    pub fn compact_journal(&self) -> StorageResult<()> {
        let mut writer = self.writer.lock();
        self.ensure_open()?;
        let Some(journal) = writer.journal.as_mut() else {
            return Ok(());
        };

        let snapshot = Arc::clone(&self.snapshot.read());
        let mut names: Vec<&TreeName> = snapshot.keys().collect();
        names.sort();

        let mut ops = vec![JournalOp::Reset];
        for name in names {
            ops.push(JournalOp::CreateTree(name.clone()));
            if let Some(tree) = snapshot.get(name) {
                ops.extend(tree.iter().map(|(key, value)| JournalOp::Put {
                    tree: name.clone(),
                    key: key.clone(),
                    value: value.clone(),
                }));
            }
        }
        let before = journal.size()?;
        journal.rewrite(&ops)?;
        tracing::info!(before, after = journal.size()?, "compacted storage journal");
        Ok(())
    }

    /// Size of the journal in bytes, or `None` for non-durable stores.
    ///
    /// # Errors
    ///
    /// Returns an error if the byte store size cannot be read.
    pub fn journal_size(&self) -> StorageResult<Option<u64>> {
        let writer = self.writer.lock();
        writer.journal.as_ref().map(Journal::size).transpose()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

fn apply(trees: &mut TreeMap, op: JournalOp) -> StorageResult<()> {
    match op {
        JournalOp::Reset => trees.clear(),
        JournalOp::CreateTree(name) => {
            trees.entry(name).or_default();
        }
        JournalOp::DeleteTree(name) => {
            trees.remove(&name);
        }
        JournalOp::Put { tree, key, value } => {
            tree_mut(trees, &tree)
                .map_err(|_| StorageError::corrupted(format!("journal writes to unknown tree {tree}")))?
                .insert(key, value);
        }
        JournalOp::Delete { tree, key } => {
            tree_mut(trees, &tree)
                .map_err(|_| StorageError::corrupted(format!("journal deletes from unknown tree {tree}")))?
                .remove(&key);
        }
    }
    Ok(())
}

fn tree_ref<'t>(trees: &'t TreeMap, name: &TreeName) -> StorageResult<&'t Tree> {
    trees
        .get(name)
        .map(Arc::as_ref)
        .ok_or_else(|| StorageError::TreeNotFound(name.to_string()))
}

fn tree_mut<'t>(trees: &'t mut TreeMap, name: &TreeName) -> StorageResult<&'t mut Tree> {
    trees
        .get_mut(name)
        .map(Arc::make_mut)
        .ok_or_else(|| StorageError::TreeNotFound(name.to_string()))
}

impl Storage for TreeStorage {
    fn read<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&dyn ReadableTransaction) -> Result<T, E>,
        E: From<StorageError>,
    {
        self.ensure_open()?;
        let txn = ReadTxn {
            trees: Arc::clone(&self.snapshot.read()),
        };
        op(&txn)
    }

    fn write<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn WriteableTransaction) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut writer = self.writer.lock();
        self.ensure_open()?;

        let mut txn = WriteTxn {
            trees: TreeMap::clone(&self.snapshot.read()),
            ops: Vec::new(),
        };
        let result = op(&mut txn)?;

        if !txn.ops.is_empty() {
            if let Some(journal) = writer.journal.as_mut() {
                journal.append(&txn.ops)?;
            }
            *self.snapshot.write() = Arc::new(txn.trees);
        }
        Ok(result)
    }

    fn list_trees(&self) -> StorageResult<Vec<TreeName>> {
        self.ensure_open()?;
        let mut names: Vec<TreeName> = self.snapshot.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn close(&self) -> StorageResult<()> {
        let mut writer = self.writer.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(mut journal) = writer.journal.take() {
            journal.sync()?;
        }
        tracing::debug!("closed tree storage");
        Ok(())
    }
}

/// Read transaction over one committed snapshot.
pub struct ReadTxn {
    trees: Arc<TreeMap>,
}

impl ReadableTransaction for ReadTxn {
    fn read(&self, tree: &TreeName, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(tree_ref(&self.trees, tree)?.get(key).cloned())
    }

    fn open_cursor(&self, tree: &TreeName) -> StorageResult<Box<dyn Cursor + '_>> {
        Ok(Box::new(TreeCursor::new(TreeSource::Shared(tree_ref(
            &self.trees,
            tree,
        )?))))
    }

    fn record_count(&self, tree: &TreeName) -> StorageResult<u64> {
        Ok(tree_ref(&self.trees, tree)?.len() as u64)
    }

    fn tree_exists(&self, tree: &TreeName) -> bool {
        self.trees.contains_key(tree)
    }
}

/// Write transaction holding private copies of the trees it modified.
pub struct WriteTxn {
    trees: TreeMap,
    ops: Vec<JournalOp>,
}

impl ReadableTransaction for WriteTxn {
    fn read(&self, tree: &TreeName, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(tree_ref(&self.trees, tree)?.get(key).cloned())
    }

    fn open_cursor(&self, tree: &TreeName) -> StorageResult<Box<dyn Cursor + '_>> {
        Ok(Box::new(TreeCursor::new(TreeSource::Shared(tree_ref(
            &self.trees,
            tree,
        )?))))
    }

    fn record_count(&self, tree: &TreeName) -> StorageResult<u64> {
        Ok(tree_ref(&self.trees, tree)?.len() as u64)
    }

    fn tree_exists(&self, tree: &TreeName) -> bool {
        self.trees.contains_key(tree)
    }
}

impl WriteableTransaction for WriteTxn {
    fn open_tree(&mut self, tree: &TreeName, create_on_demand: bool) -> StorageResult<()> {
        if self.trees.contains_key(tree) {
            return Ok(());
        }
        if !create_on_demand {
            return Err(StorageError::TreeNotFound(tree.to_string()));
        }
        self.trees.insert(tree.clone(), Arc::new(Tree::new()));
        self.ops.push(JournalOp::CreateTree(tree.clone()));
        Ok(())
    }

    fn delete_tree(&mut self, tree: &TreeName) -> StorageResult<()> {
        if self.trees.remove(tree).is_some() {
            self.ops.push(JournalOp::DeleteTree(tree.clone()));
        }
        Ok(())
    }

    fn put(&mut self, tree: &TreeName, key: &[u8], value: &[u8]) -> StorageResult<()> {
        tree_mut(&mut self.trees, tree)?.insert(key.to_vec(), value.to_vec());
        self.ops.push(JournalOp::Put {
            tree: tree.clone(),
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    fn update(
        &mut self,
        tree: &TreeName,
        key: &[u8],
        f: &mut dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>>,
    ) -> StorageResult<bool> {
        let records = tree_mut(&mut self.trees, tree)?;
        let old = records.get(key).cloned();
        match f(old.as_deref()) {
            Some(value) => {
                if old.as_deref() == Some(value.as_slice()) {
                    return Ok(false);
                }
                records.insert(key.to_vec(), value.clone());
                self.ops.push(JournalOp::Put {
                    tree: tree.clone(),
                    key: key.to_vec(),
                    value,
                });
            }
            None => {
                if old.is_none() {
                    return Ok(false);
                }
                records.remove(key);
                self.ops.push(JournalOp::Delete {
                    tree: tree.clone(),
                    key: key.to_vec(),
                });
            }
        }
        Ok(true)
    }

    fn delete(&mut self, tree: &TreeName, key: &[u8]) -> StorageResult<bool> {
        let removed = tree_mut(&mut self.trees, tree)?.remove(key).is_some();
        if removed {
            self.ops.push(JournalOp::Delete {
                tree: tree.clone(),
                key: key.to_vec(),
            });
        }
        Ok(removed)
    }

    fn open_write_cursor(&mut self, tree: &TreeName) -> StorageResult<Box<dyn Cursor + '_>> {
        let records = tree_mut(&mut self.trees, tree)?;
        Ok(Box::new(TreeCursor::new(TreeSource::Exclusive {
            name: tree.clone(),
            records,
            ops: &mut self.ops,
        })))
    }
}

enum TreeSource<'a> {
    Shared(&'a Tree),
    Exclusive {
        name: TreeName,
        records: &'a mut Tree,
        ops: &'a mut Vec<JournalOp>,
    },
}

/// Cursor that re-seeks from its last key on every move.
///
/// Holding the key rather than a map iterator is what lets a write cursor
/// delete the current record and still advance.
struct TreeCursor<'a> {
    source: TreeSource<'a>,
    state: CursorState,
    anchor: Option<Vec<u8>>,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl<'a> TreeCursor<'a> {
    fn new(source: TreeSource<'a>) -> Self {
        Self {
            source,
            state: CursorState::BeforeFirst,
            anchor: None,
            current: None,
        }
    }

    fn records(&self) -> &Tree {
        match &self.source {
            TreeSource::Shared(records) => records,
            TreeSource::Exclusive { records, .. } => records,
        }
    }

    fn ensure_usable(&self) -> StorageResult<()> {
        if self.state == CursorState::Closed {
            Err(StorageError::invalid_cursor_state("cursor is closed"))
        } else {
            Ok(())
        }
    }

    fn land(&mut self, found: Option<(Vec<u8>, Vec<u8>)>) -> bool {
        match found {
            Some((key, value)) => {
                self.anchor = Some(key.clone());
                self.current = Some((key, value));
                self.state = CursorState::Positioned;
                true
            }
            None => {
                self.anchor = None;
                self.current = None;
                self.state = CursorState::Exhausted;
                false
            }
        }
    }

    fn seek(&self, lower: Bound<&[u8]>) -> Option<(Vec<u8>, Vec<u8>)> {
        self.records()
            .range::<[u8], _>((lower, Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
    }
}

impl Cursor for TreeCursor<'_> {
    fn position_to_key(&mut self, key: &[u8]) -> StorageResult<bool> {
        self.ensure_usable()?;
        let found = self
            .records()
            .get_key_value(key)
            .map(|(k, v)| (k.clone(), v.clone()));
        Ok(self.land(found))
    }

    fn position_to_key_or_next(&mut self, key: &[u8]) -> StorageResult<bool> {
        self.ensure_usable()?;
        let found = self.seek(Bound::Included(key));
        Ok(self.land(found))
    }

    fn position_to_last_key(&mut self) -> StorageResult<bool> {
        self.ensure_usable()?;
        let found = self
            .records()
            .last_key_value()
            .map(|(k, v)| (k.clone(), v.clone()));
        Ok(self.land(found))
    }

    fn position_to_index(&mut self, index: usize) -> StorageResult<bool> {
        self.ensure_usable()?;
        let found = self
            .records()
            .iter()
            .nth(index)
            .map(|(k, v)| (k.clone(), v.clone()));
        Ok(self.land(found))
    }

    fn next(&mut self) -> StorageResult<bool> {
        self.ensure_usable()?;
        let found = match self.state {
            CursorState::Exhausted => return Ok(false),
            CursorState::BeforeFirst => self.seek(Bound::Unbounded),
            _ => match self.anchor.as_deref() {
                Some(anchor) => self.seek(Bound::Excluded(anchor)),
                None => None,
            },
        };
        Ok(self.land(found))
    }

    fn is_defined(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| k.as_slice())
    }

    fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, v)| v.as_slice())
    }

    fn delete(&mut self) -> StorageResult<()> {
        self.ensure_usable()?;
        if self.state != CursorState::Positioned || self.current.is_none() {
            return Err(StorageError::invalid_cursor_state(
                "delete requires a positioned cursor",
            ));
        }
        let TreeSource::Exclusive { name, records, ops } = &mut self.source else {
            return Err(StorageError::invalid_cursor_state("cursor is read-only"));
        };
        if let Some((key, _)) = self.current.take() {
            records.remove(&key);
            ops.push(JournalOp::Delete {
                tree: name.clone(),
                key,
            });
        }
        Ok(())
    }

    fn state(&self) -> CursorState {
        self.state
    }

    fn close(&mut self) {
        self.state = CursorState::Closed;
        self.anchor = None;
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use tempfile::tempdir;

    fn tree() -> TreeName {
        TreeName::new("o=test", "records")
    }

    fn populated(keys: &[&[u8]]) -> TreeStorage {
        let storage = TreeStorage::in_memory();
        storage
            .write(|txn| -> StorageResult<()> {
                txn.open_tree(&tree(), true)?;
                for key in keys {
                    txn.put(&tree(), key, b"v")?;
                }
                Ok(())
            })
            .unwrap();
        storage
    }

    fn all_keys(storage: &TreeStorage) -> Vec<Vec<u8>> {
        storage
            .read(|txn| -> StorageResult<_> {
                let mut cursor = txn.open_cursor(&tree())?;
                let mut keys = Vec::new();
                while cursor.next()? {
                    keys.push(cursor.key().unwrap().to_vec());
                }
                Ok(keys)
            })
            .unwrap()
    }

    #[test]
    fn failed_write_is_discarded() {
        let storage = populated(&[b"a"]);
        let result: Result<(), StorageError> = storage.write(|txn| {
            txn.put(&tree(), b"b", b"v")?;
            Err(StorageError::corrupted("abort"))
        });
        assert!(result.is_err());
        assert_eq!(all_keys(&storage), vec![b"a".to_vec()]);
    }

    #[test]
    fn reader_keeps_its_snapshot() {
        let storage = populated(&[b"a"]);
        storage
            .read(|txn| -> StorageResult<()> {
                storage.write(|w| w.put(&tree(), b"b", b"v"))?;
                assert_eq!(txn.record_count(&tree())?, 1);
                assert_eq!(txn.read(&tree(), b"b")?, None);
                Ok(())
            })
            .unwrap();
        assert_eq!(all_keys(&storage).len(), 2);
    }

    #[test]
    fn update_reports_changes() {
        let storage = populated(&[]);
        storage
            .write(|txn| -> StorageResult<()> {
                assert!(txn.update(&tree(), b"k", &mut |_| Some(b"1".to_vec()))?);
                assert!(!txn.update(&tree(), b"k", &mut |old| old.map(<[u8]>::to_vec))?);
                assert!(txn.update(&tree(), b"k", &mut |_| None)?);
                assert!(!txn.update(&tree(), b"k", &mut |_| None)?);
                assert!(!txn.delete(&tree(), b"k")?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn missing_tree_is_an_error() {
        let storage = TreeStorage::in_memory();
        let result = storage.read(|txn| txn.read(&tree(), b"k"));
        assert!(matches!(result, Err(StorageError::TreeNotFound(_))));
        let result = storage.write(|txn| txn.open_tree(&tree(), false));
        assert!(matches!(result, Err(StorageError::TreeNotFound(_))));
    }

    #[test]
    fn cursor_positioning() {
        let storage = populated(&[b"b", b"d", b"f"]);
        storage
            .read(|txn| -> StorageResult<()> {
                let mut cursor = txn.open_cursor(&tree())?;
                assert_eq!(cursor.state(), CursorState::BeforeFirst);
                assert!(!cursor.position_to_key(b"c")?);
                assert_eq!(cursor.state(), CursorState::Exhausted);
                assert!(cursor.position_to_key_or_next(b"c")?);
                assert_eq!(cursor.key(), Some(&b"d"[..]));
                assert!(cursor.next()?);
                assert_eq!(cursor.key(), Some(&b"f"[..]));
                assert!(!cursor.next()?);
                assert!(!cursor.is_defined());
                assert!(cursor.position_to_index(1)?);
                assert_eq!(cursor.key(), Some(&b"d"[..]));
                assert!(cursor.position_to_last_key()?);
                assert_eq!(cursor.key(), Some(&b"f"[..]));
                assert!(cursor.delete().is_err());
                cursor.close();
                assert!(cursor.next().is_err());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn keys_compare_unsigned() {
        let storage = populated(&[&[0xFF], b"key1", &[0x00]]);
        assert_eq!(
            all_keys(&storage),
            vec![vec![0x00], b"key1".to_vec(), vec![0xFF]]
        );
    }

    #[test]
    fn delete_alternate_records_while_iterating() {
        let keys: Vec<Vec<u8>> = (0u8..10).map(|i| vec![i]).collect();
        let refs: Vec<&[u8]> = keys.iter().map(Vec::as_slice).collect();
        let storage = populated(&refs);

        let visited = storage
            .write(|txn| -> StorageResult<Vec<u8>> {
                let mut cursor = txn.open_write_cursor(&tree())?;
                let mut visited = Vec::new();
                while cursor.next()? {
                    let key = cursor.key().unwrap()[0];
                    visited.push(key);
                    if key % 2 == 0 {
                        cursor.delete()?;
                        assert!(!cursor.is_defined());
                        assert_eq!(cursor.state(), CursorState::Positioned);
                        assert!(cursor.delete().is_err());
                    }
                }
                Ok(visited)
            })
            .unwrap();

        assert_eq!(visited, (0u8..10).collect::<Vec<_>>());
        assert_eq!(
            all_keys(&storage),
            vec![vec![1], vec![3], vec![5], vec![7], vec![9]]
        );
    }

    #[test]
    fn journal_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backend.journal");
        {
            let storage = TreeStorage::open(&path).unwrap();
            storage
                .write(|txn| -> StorageResult<()> {
                    txn.open_tree(&tree(), true)?;
                    txn.put(&tree(), b"a", b"1")?;
                    txn.put(&tree(), b"b", b"2")
                })
                .unwrap();
            storage.write(|txn| txn.delete(&tree(), b"a")).unwrap();
            storage.close().unwrap();
        }

        let storage = TreeStorage::open(&path).unwrap();
        assert_eq!(all_keys(&storage), vec![b"b".to_vec()]);
        assert_eq!(storage.list_trees().unwrap(), vec![tree()]);
    }

    #[test]
    fn compaction_keeps_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backend.journal");
        {
            let storage = TreeStorage::open(&path).unwrap();
            storage.write(|txn| txn.open_tree(&tree(), true)).unwrap();
            for i in 0u8..50 {
                storage.write(|txn| txn.put(&tree(), &[i % 5], &[i])).unwrap();
            }
            let before = storage.journal_size().unwrap().unwrap();
            storage.compact_journal().unwrap();
            assert!(storage.journal_size().unwrap().unwrap() < before);
        }

        let storage = TreeStorage::open(&path).unwrap();
        let value = storage.read(|txn| txn.read(&tree(), &[4])).unwrap();
        assert_eq!(value, Some(vec![49]));
        assert_eq!(all_keys(&storage).len(), 5);
    }

    #[test]
    fn journal_size_tracks_durability() {
        let first = TreeStorage::with_backend(Box::new(InMemoryBackend::new())).unwrap();
        first.write(|txn| txn.open_tree(&tree(), true)).unwrap();
        assert_eq!(first.journal_size().unwrap().map(|n| n > 0), Some(true));
        assert_eq!(TreeStorage::in_memory().journal_size().unwrap(), None);
    }

    #[test]
    fn closed_storage_rejects_transactions() {
        let storage = populated(&[b"a"]);
        storage.close().unwrap();
        storage.close().unwrap();
        assert!(matches!(
            storage.read(|txn| txn.read(&tree(), b"a")),
            Err(StorageError::Closed)
        ));
        assert!(matches!(
            storage.write(|txn| txn.put(&tree(), b"a", b"b")),
            Err(StorageError::Closed)
        ));
        assert!(storage.list_trees().is_err());
    }
}
