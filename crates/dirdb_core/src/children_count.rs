//! Sharded children counters.
//!
//! The `id2childrencount` tree keeps, for every parent entry, up to `shards`
//! signed delta records keyed `parent id (8 bytes BE) | shard (1 byte)`. The
//! number of children of a parent is the sum of its shards. Writers pick a
//! shard from their thread identity, so concurrent adds under one parent
//! rarely touch the same record.
//!
//! A separate record under the reserved ID [`TOTAL_COUNT_ID`] holds the
//! number of entries below the base entry.
//!
//! ## Invariants
//!
//! - No stored shard holds zero. A shard that sums to zero is deleted.
//! - At rest, the total equals the sum of all per-parent counts.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use dirdb_storage::{ReadableTransaction, TreeName, WriteableTransaction};

use crate::error::{CoreError, CoreResult};
use crate::types::EntryId;

/// Reserved parent ID under which the total count is stored.
pub const TOTAL_COUNT_ID: EntryId = EntryId(u64::MAX);

/// Accessor for the `id2childrencount` tree of one container.
#[derive(Debug, Clone)]
pub struct Id2ChildrenCount {
    tree: TreeName,
    shards: u8,
}

impl Id2ChildrenCount {
    /// Local name of the tree.
    pub const TREE: &'static str = "id2childrencount";

    /// Creates the accessor. `shards` is clamped to at least 1.
    #[must_use]
    pub fn new(namespace: &TreeName, shards: u8) -> Self {
        Self {
            tree: namespace.sibling(Self::TREE),
            shards: shards.max(1),
        }
    }

    /// The counter tree.
    #[must_use]
    pub fn tree(&self) -> &TreeName {
        &self.tree
    }

    /// Adds `delta` to one shard of `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt shard.
    pub fn update_count<T>(&self, txn: &mut T, parent: EntryId, delta: i64) -> CoreResult<()>
    where
        T: WriteableTransaction + ?Sized,
    {
        self.add_to_shard(txn, parent, self.current_shard(), delta)
    }

    /// Number of children of `parent`, 0 if unknown.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt shard.
    pub fn get_count<T>(&self, txn: &T, parent: EntryId) -> CoreResult<i64>
    where
        T: ReadableTransaction + ?Sized,
    {
        let mut cursor = txn.open_cursor(&self.tree)?;
        let prefix = parent.to_key();
        let mut total = 0i64;
        let mut found = cursor.position_to_key_or_next(&prefix)?;
        while found {
            let (Some(key), Some(value)) = (cursor.key(), cursor.value()) else {
                break;
            };
            if !key.starts_with(&prefix) {
                break;
            }
            total += decode_count(value)?;
            found = cursor.next()?;
        }
        Ok(total)
    }

    /// Deletes every shard of `parent` and returns the count they held.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt shard.
    pub fn remove_count<T>(&self, txn: &mut T, parent: EntryId) -> CoreResult<i64>
    where
        T: WriteableTransaction + ?Sized,
    {
        let prefix = parent.to_key();
        let mut cursor = txn.open_write_cursor(&self.tree)?;
        let mut total = 0i64;
        let mut found = cursor.position_to_key_or_next(&prefix)?;
        while found {
            let Some(value) = cursor.value() else {
                break;
            };
            if !cursor.key().is_some_and(|key| key.starts_with(&prefix)) {
                break;
            }
            total += decode_count(value)?;
            cursor.delete()?;
            found = cursor.next()?;
        }
        Ok(total)
    }

    /// Adds `delta` to the total count.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt record.
    pub fn update_total_count<T>(&self, txn: &mut T, delta: i64) -> CoreResult<()>
    where
        T: WriteableTransaction + ?Sized,
    {
        self.add_to_shard(txn, TOTAL_COUNT_ID, 0, delta)
    }

    /// Number of entries below the base entry.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt record.
    pub fn get_total_count<T>(&self, txn: &T) -> CoreResult<i64>
    where
        T: ReadableTransaction + ?Sized,
    {
        self.get_count(txn, TOTAL_COUNT_ID)
    }

    /// Overwrites the count of `parent` with `count`, as computed by import.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn import_put_count<T>(&self, txn: &mut T, parent: EntryId, count: i64) -> CoreResult<()>
    where
        T: WriteableTransaction + ?Sized,
    {
        self.remove_count(txn, parent)?;
        if count != 0 {
            txn.put(&self.tree, &shard_key(parent, 0), &count.to_be_bytes())?;
        }
        Ok(())
    }

    /// Overwrites the total count, as computed by import.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn import_put_total_count<T>(&self, txn: &mut T, total: i64) -> CoreResult<()>
    where
        T: WriteableTransaction + ?Sized,
    {
        self.import_put_count(txn, TOTAL_COUNT_ID, total)
    }

    /// Every parent with a non-zero count, in ID order. The total record is
    /// not included.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt record.
    pub fn all_counts<T>(&self, txn: &T) -> CoreResult<Vec<(EntryId, i64)>>
    where
        T: ReadableTransaction + ?Sized,
    {
        let mut cursor = txn.open_cursor(&self.tree)?;
        let mut counts: Vec<(EntryId, i64)> = Vec::new();
        while cursor.next()? {
            let (Some(key), Some(value)) = (cursor.key(), cursor.value()) else {
                break;
            };
            if key.len() != 9 {
                return Err(CoreError::invalid_format(format!(
                    "children count key has {} bytes",
                    key.len()
                )));
            }
            let parent = EntryId::from_key(&key[..8])?;
            if parent == TOTAL_COUNT_ID {
                break;
            }
            let delta = decode_count(value)?;
            match counts.last_mut() {
                Some((last, sum)) if *last == parent => *sum += delta,
                _ => counts.push((parent, delta)),
            }
        }
        counts.retain(|(_, count)| *count != 0);
        Ok(counts)
    }

    fn add_to_shard<T>(&self, txn: &mut T, parent: EntryId, shard: u8, delta: i64) -> CoreResult<()>
    where
        T: WriteableTransaction + ?Sized,
    {
        if delta == 0 {
            return Ok(());
        }
        let mut failure = None;
        txn.update(&self.tree, &shard_key(parent, shard), &mut |old| {
            let current = match old.map(decode_count).transpose() {
                Ok(current) => current.unwrap_or(0),
                Err(err) => {
                    failure = Some(err);
                    return old.map(<[u8]>::to_vec);
                }
            };
            let next = current + delta;
            (next != 0).then(|| next.to_be_bytes().to_vec())
        })?;
        failure.map_or(Ok(()), Err)
    }

    fn current_shard(&self) -> u8 {
        if self.shards == 1 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        (hasher.finish() % u64::from(self.shards)) as u8
    }
}

fn shard_key(parent: EntryId, shard: u8) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[..8].copy_from_slice(&parent.to_key());
    key[8] = shard;
    key
}

fn decode_count(value: &[u8]) -> CoreResult<i64> {
    let raw: [u8; 8] = value
        .try_into()
        .map_err(|_| CoreError::invalid_format(format!("children count has {} bytes", value.len())))?;
    Ok(i64::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirdb_storage::{Storage, TreeStorage};
    use std::sync::Arc;

    fn setup(shards: u8) -> (Arc<TreeStorage>, Id2ChildrenCount) {
        let storage = Arc::new(TreeStorage::in_memory());
        let counts = Id2ChildrenCount::new(&TreeName::new("o=test", "dn2id"), shards);
        storage.write(|txn| txn.open_tree(counts.tree(), true)).unwrap();
        (storage, counts)
    }

    #[test]
    fn counts_sum_shards() {
        let (storage, counts) = setup(4);
        let parent = EntryId::new(7);
        storage
            .write(|txn| -> CoreResult<()> {
                counts.update_count(txn, parent, 3)?;
                counts.add_to_shard(txn, parent, 2, 5)?;
                counts.update_total_count(txn, 8)?;
                Ok(())
            })
            .unwrap();

        storage
            .read(|txn| -> CoreResult<()> {
                assert_eq!(counts.get_count(txn, parent)?, 8);
                assert_eq!(counts.get_count(txn, EntryId::new(8))?, 0);
                assert_eq!(counts.get_total_count(txn)?, 8);
                assert_eq!(counts.all_counts(txn)?, vec![(parent, 8)]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn zero_sum_deletes_record() {
        let (storage, counts) = setup(1);
        let parent = EntryId::new(1);
        storage
            .write(|txn| -> CoreResult<()> {
                counts.update_count(txn, parent, 2)?;
                counts.update_count(txn, parent, -2)?;
                assert_eq!(txn.record_count(counts.tree())?, 0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn remove_returns_prior_total() {
        let (storage, counts) = setup(3);
        let parent = EntryId::new(5);
        let removed = storage
            .write(|txn| -> CoreResult<i64> {
                counts.add_to_shard(txn, parent, 0, 2)?;
                counts.add_to_shard(txn, parent, 1, 4)?;
                counts.update_count(txn, EntryId::new(6), 1)?;
                counts.remove_count(txn, parent)
            })
            .unwrap();
        assert_eq!(removed, 6);
        storage
            .read(|txn| -> CoreResult<()> {
                assert_eq!(counts.get_count(txn, parent)?, 0);
                assert_eq!(counts.get_count(txn, EntryId::new(6))?, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn import_put_overwrites() {
        let (storage, counts) = setup(2);
        let parent = EntryId::new(3);
        storage
            .write(|txn| -> CoreResult<()> {
                counts.update_count(txn, parent, 9)?;
                counts.import_put_count(txn, parent, 4)?;
                counts.import_put_total_count(txn, 4)?;
                Ok(())
            })
            .unwrap();
        storage
            .read(|txn| -> CoreResult<()> {
                assert_eq!(counts.get_count(txn, parent)?, 4);
                assert_eq!(counts.get_total_count(txn)?, 4);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn corrupt_shard_is_reported() {
        let (storage, counts) = setup(1);
        let parent = EntryId::new(2);
        let result = storage.write(|txn| -> CoreResult<()> {
            txn.put(counts.tree(), &shard_key(parent, 0), b"bad")?;
            counts.update_count(txn, parent, 1)
        });
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn concurrent_deltas_converge() {
        let (storage, counts) = setup(8);
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let storage = Arc::clone(&storage);
                let counts = counts.clone();
                std::thread::spawn(move || {
                    for i in 0..64i64 {
                        let delta = if (i + t) % 3 == 0 { -1 } else { 2 };
                        storage
                            .write(|txn| -> CoreResult<()> {
                                counts.update_count(txn, EntryId::new(1 + (i % 4) as u64), delta)?;
                                counts.update_total_count(txn, delta)
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }

        let mut expected = [0i64; 4];
        for t in 0..8i64 {
            for i in 0..64i64 {
                expected[(i % 4) as usize] += if (i + t) % 3 == 0 { -1 } else { 2 };
            }
        }
        storage
            .read(|txn| -> CoreResult<()> {
                for (slot, want) in expected.iter().enumerate() {
                    assert_eq!(counts.get_count(txn, EntryId::new(1 + slot as u64))?, *want);
                }
                assert_eq!(counts.get_total_count(txn)?, expected.iter().sum::<i64>());
                Ok(())
            })
            .unwrap();
    }
}
