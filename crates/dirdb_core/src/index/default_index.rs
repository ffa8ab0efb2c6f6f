//! Key to ID-set index tree.
//!
//! ## Invariants
//!
//! - No record holds an empty set. An update that empties a key deletes it.
//! - A key whose set grew beyond the entry limit holds an undefined set and
//!   stays undefined until the index is rebuilt.
//! - Records are written with V2 when the index is COMPACTED, V1 otherwise.
//!   Reads accept both.

use dirdb_storage::{ReadableTransaction, TreeName, WriteableTransaction};
use tracing::debug;

use crate::error::CoreResult;
use crate::id_set::{EntryIdSet, EntryIdSetCodec};
use crate::state::{IndexFlags, State};

/// One index tree holding an ID set per key.
#[derive(Debug, Clone)]
pub struct DefaultIndex {
    tree: TreeName,
    entry_limit: u32,
    state: State,
}

impl DefaultIndex {
    /// Creates the accessor. An `entry_limit` of 0 disables the limit.
    #[must_use]
    pub fn new(tree: TreeName, entry_limit: u32, state: State) -> Self {
        Self {
            tree,
            entry_limit,
            state,
        }
    }

    /// The index tree.
    #[must_use]
    pub fn tree(&self) -> &TreeName {
        &self.tree
    }

    /// Maximum number of IDs kept under one key, 0 for no limit.
    #[must_use]
    pub const fn entry_limit(&self) -> u32 {
        self.entry_limit
    }

    /// Returns `true` if `set` is too large to be kept defined.
    #[must_use]
    pub fn exceeds_limit(&self, set: &EntryIdSet) -> bool {
        self.entry_limit > 0 && set.is_defined() && set.size() > u64::from(self.entry_limit)
    }

    /// Current state flags of the index.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt state record.
    pub fn flags<T>(&self, txn: &T) -> CoreResult<IndexFlags>
    where
        T: ReadableTransaction + ?Sized,
    {
        self.state.get_flags(txn, &self.tree)
    }

    /// Returns `true` if the index may answer searches.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt state record.
    pub fn is_trusted<T>(&self, txn: &T) -> CoreResult<bool>
    where
        T: ReadableTransaction + ?Sized,
    {
        Ok(self.flags(txn)?.contains(IndexFlags::TRUSTED))
    }

    /// Sets or clears the TRUSTED flag.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt state record.
    pub fn set_trusted<T>(&self, txn: &mut T, trusted: bool) -> CoreResult<()>
    where
        T: WriteableTransaction + ?Sized,
    {
        if trusted {
            self.state.add_flags(txn, &self.tree, IndexFlags::TRUSTED)?;
        } else {
            self.state.remove_flags(txn, &self.tree, IndexFlags::TRUSTED)?;
        }
        Ok(())
    }

    /// Codec used for new records.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt state record.
    pub fn codec<T>(&self, txn: &T) -> CoreResult<EntryIdSetCodec>
    where
        T: ReadableTransaction + ?Sized,
    {
        Ok(if self.flags(txn)?.contains(IndexFlags::COMPACTED) {
            EntryIdSetCodec::V2
        } else {
            EntryIdSetCodec::V1
        })
    }

    /// IDs stored under `key`. A missing key reads as an empty defined set.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt record.
    pub fn read<T>(&self, txn: &T, key: &[u8]) -> CoreResult<EntryIdSet>
    where
        T: ReadableTransaction + ?Sized,
    {
        match txn.read(&self.tree, key)? {
            Some(bytes) => EntryIdSetCodec::V2.decode(&bytes),
            None => Ok(EntryIdSet::new()),
        }
    }

    /// Replaces the set under `key` with `old \ deleted ∪ added`.
    ///
    /// Runs as one storage update. An undefined stored set is left untouched.
    /// A result above the entry limit is stored undefined, tagged with `key`.
    /// An empty result deletes the record.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt record.
    pub fn update<T>(
        &self,
        txn: &mut T,
        key: &[u8],
        deleted: &EntryIdSet,
        added: &EntryIdSet,
    ) -> CoreResult<()>
    where
        T: WriteableTransaction + ?Sized,
    {
        if deleted.is_empty() && added.is_empty() {
            return Ok(());
        }
        let codec = self.codec(&*txn)?;
        let mut failure = None;
        let mut cutover = false;
        txn.update(&self.tree, key, &mut |old| {
            let mut set = match old {
                None => EntryIdSet::new(),
                Some(bytes) => match codec.decode(bytes) {
                    Ok(set) => set,
                    Err(err) => {
                        failure = Some(err);
                        return Some(bytes.to_vec());
                    }
                },
            };
            if !set.is_defined() {
                return old.map(<[u8]>::to_vec);
            }
            set.remove_all(deleted);
            set.add_all(added);
            if self.exceeds_limit(&set) {
                cutover = true;
                set = EntryIdSet::undefined_with_key(key);
            }
            if set.is_empty() {
                return None;
            }
            match codec.encode(&set) {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    failure = Some(err);
                    old.map(<[u8]>::to_vec)
                }
            }
        })?;
        if cutover {
            debug!(tree = %self.tree, key = ?key, limit = self.entry_limit, "index entry limit exceeded");
        }
        failure.map_or(Ok(()), Err)
    }

    /// Writes a merged set during import or rebuild, overwriting any record.
    ///
    /// An empty set deletes the record. A set over the limit is stored
    /// undefined.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a set the codec cannot encode.
    pub fn import_put<T>(&self, txn: &mut T, key: &[u8], set: &EntryIdSet) -> CoreResult<()>
    where
        T: WriteableTransaction + ?Sized,
    {
        let codec = self.codec(&*txn)?;
        if set.is_empty() {
            txn.delete(&self.tree, key)?;
        } else if self.exceeds_limit(set) {
            txn.put(&self.tree, key, &codec.encode(&EntryIdSet::undefined_with_key(key))?)?;
        } else {
            txn.put(&self.tree, key, &codec.encode(set)?)?;
        }
        Ok(())
    }

    /// Visits every `(key, set)` record in key order.
    ///
    /// A record that does not decode is passed to `visit` as its decode
    /// error, and the walk goes on unless `visit` returns it.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or the first error returned by
    /// `visit`.
    pub fn for_each<T, F>(&self, txn: &T, mut visit: F) -> CoreResult<()>
    where
        T: ReadableTransaction + ?Sized,
        F: FnMut(&[u8], CoreResult<EntryIdSet>) -> CoreResult<()>,
    {
        let mut cursor = txn.open_cursor(&self.tree)?;
        while cursor.next()? {
            let (Some(key), Some(value)) = (cursor.key(), cursor.value()) else {
                break;
            };
            visit(key, EntryIdSetCodec::V2.decode(value))?;
        }
        Ok(())
    }

    /// Union of the sets under every key starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt record.
    pub fn read_prefix<T>(&self, txn: &T, prefix: &[u8]) -> CoreResult<EntryIdSet>
    where
        T: ReadableTransaction + ?Sized,
    {
        let mut cursor = txn.open_cursor(&self.tree)?;
        let mut sets = Vec::new();
        let mut found = cursor.position_to_key_or_next(prefix)?;
        while found {
            let (Some(key), Some(value)) = (cursor.key(), cursor.value()) else {
                break;
            };
            if !key.starts_with(prefix) {
                break;
            }
            let set = EntryIdSetCodec::V2.decode(value)?;
            if !set.is_defined() {
                return Ok(set);
            }
            sets.push(set);
            found = cursor.next()?;
        }
        Ok(EntryIdSet::new_set_from_union(&sets))
    }

    /// Removes every record, keeping the tree.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn clear<T>(&self, txn: &mut T) -> CoreResult<()>
    where
        T: WriteableTransaction + ?Sized,
    {
        let mut cursor = txn.open_write_cursor(&self.tree)?;
        while cursor.next()? {
            cursor.delete()?;
        }
        Ok(())
    }
}
