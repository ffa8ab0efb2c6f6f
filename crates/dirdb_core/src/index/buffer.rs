//! Per-transaction batching of index changes.

use std::collections::BTreeMap;

use dirdb_storage::{TreeName, WriteableTransaction};

use crate::error::{CoreError, CoreResult};
use crate::id_set::EntryIdSet;
use crate::index::DefaultIndex;
use crate::types::EntryId;

#[derive(Debug, Default)]
struct PendingUpdate {
    added: EntryIdSet,
    deleted: EntryIdSet,
}

/// Added and deleted IDs per index key, applied as one update per key.
///
/// For a given ID the last call wins: `put` after `remove` keeps the ID,
/// `remove` after `put` drops it.
#[derive(Debug, Default)]
pub struct IndexBuffer {
    pending: BTreeMap<TreeName, BTreeMap<Vec<u8>, PendingUpdate>>,
}

impl IndexBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `id` gains `key` in `index`.
    pub fn put(&mut self, index: &TreeName, key: Vec<u8>, id: EntryId) {
        let update = self.slot(index, key);
        update.deleted.remove(id);
        update.added.add(id);
    }

    /// Records that `id` loses `key` in `index`.
    pub fn remove(&mut self, index: &TreeName, key: Vec<u8>, id: EntryId) {
        let update = self.slot(index, key);
        update.added.remove(id);
        update.deleted.add(id);
    }

    /// Number of distinct `(index, key)` pairs pending.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum()
    }

    /// Returns `true` if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Applies every pending change through the matching index of `indexes`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for a change to a tree not in
    /// `indexes`, or the first storage error.
    pub fn flush<'a, T, I>(self, txn: &mut T, indexes: I) -> CoreResult<()>
    where
        T: WriteableTransaction + ?Sized,
        I: IntoIterator<Item = &'a DefaultIndex>,
    {
        let by_tree: BTreeMap<&TreeName, &DefaultIndex> =
            indexes.into_iter().map(|index| (index.tree(), index)).collect();
        for (tree, keys) in self.pending {
            let index = by_tree.get(&tree).ok_or_else(|| {
                CoreError::invalid_operation(format!("no index for buffered tree {tree}"))
            })?;
            for (key, update) in keys {
                index.update(txn, &key, &update.deleted, &update.added)?;
            }
        }
        Ok(())
    }

    fn slot(&mut self, index: &TreeName, key: Vec<u8>) -> &mut PendingUpdate {
        self.pending
            .entry(index.clone())
            .or_default()
            .entry(key)
            .or_default()
    }
}
