//! DN to entry ID mapping.
//!
//! The `dn2id` tree maps the [`DnKeyFormat`] key of every entry of a
//! container to its 8-byte big-endian entry ID. The base entry has the empty
//! key. Because keys sort depth first, the subtree of any entry is one
//! contiguous key range and a forward scan yields parents before children.

use dirdb_storage::{Cursor, ReadableTransaction, TreeName, WriteableTransaction};

use crate::dn::{Dn, DnKeyFormat};
use crate::error::{CoreError, CoreResult};
use crate::types::EntryId;

/// Accessor for the `dn2id` tree of one container.
#[derive(Debug, Clone)]
pub struct Dn2Id {
    tree: TreeName,
    base: Dn,
}

impl Dn2Id {
    /// Local name of the tree.
    pub const TREE: &'static str = "dn2id";

    /// Creates the accessor for the container rooted at `base`.
    #[must_use]
    pub fn new(namespace: &TreeName, base: Dn) -> Self {
        Self {
            tree: namespace.sibling(Self::TREE),
            base,
        }
    }

    /// The `dn2id` tree.
    #[must_use]
    pub fn tree(&self) -> &TreeName {
        &self.tree
    }

    /// The container base DN.
    #[must_use]
    pub fn base(&self) -> &Dn {
        &self.base
    }

    /// Key of `dn`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidDn`] if `dn` is outside the base.
    pub fn key(&self, dn: &Dn) -> CoreResult<Vec<u8>> {
        DnKeyFormat::dn_to_key(dn, &self.base)
    }

    /// DN stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] for a malformed key.
    pub fn decode_key(&self, key: &[u8]) -> CoreResult<Dn> {
        DnKeyFormat::decode_key(key, &self.base)
    }

    /// Entry ID of `dn`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt record.
    pub fn get<T>(&self, txn: &T, dn: &Dn) -> CoreResult<Option<EntryId>>
    where
        T: ReadableTransaction + ?Sized,
    {
        self.get_by_key(txn, &self.key(dn)?)
    }

    /// Entry ID stored under `key`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt record.
    pub fn get_by_key<T>(&self, txn: &T, key: &[u8]) -> CoreResult<Option<EntryId>>
    where
        T: ReadableTransaction + ?Sized,
    {
        txn.read(&self.tree, key)?
            .map(|value| EntryId::from_key(&value))
            .transpose()
    }

    /// Maps `dn` to `id`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a DN outside the base.
    pub fn put<T>(&self, txn: &mut T, dn: &Dn, id: EntryId) -> CoreResult<()>
    where
        T: WriteableTransaction + ?Sized,
    {
        let key = self.key(dn)?;
        self.put_key(txn, &key, id)
    }

    /// Maps a precomputed key to `id`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn put_key<T>(&self, txn: &mut T, key: &[u8], id: EntryId) -> CoreResult<()>
    where
        T: WriteableTransaction + ?Sized,
    {
        txn.put(&self.tree, key, &id.to_key())?;
        Ok(())
    }

    /// Removes the mapping of `dn`. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a DN outside the base.
    pub fn remove<T>(&self, txn: &mut T, dn: &Dn) -> CoreResult<bool>
    where
        T: WriteableTransaction + ?Sized,
    {
        let key = self.key(dn)?;
        Ok(txn.delete(&self.tree, &key)?)
    }

    /// Removes the mapping stored under a precomputed key.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn remove_key<T>(&self, txn: &mut T, key: &[u8]) -> CoreResult<bool>
    where
        T: WriteableTransaction + ?Sized,
    {
        Ok(txn.delete(&self.tree, key)?)
    }

    /// Cursor over the immediate children of `dn`, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a DN outside the base.
    pub fn open_children_cursor<'t, T>(&self, txn: &'t T, dn: &Dn) -> CoreResult<Dn2IdCursor<'t>>
    where
        T: ReadableTransaction + ?Sized,
    {
        self.open_cursor(txn, self.key(dn)?, Scope::Children)
    }

    /// Cursor over the whole subtree of `dn`, excluding `dn` itself, in
    /// depth-first key order.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a DN outside the base.
    pub fn open_subordinates_cursor<'t, T>(
        &self,
        txn: &'t T,
        dn: &Dn,
    ) -> CoreResult<Dn2IdCursor<'t>>
    where
        T: ReadableTransaction + ?Sized,
    {
        self.open_cursor(txn, self.key(dn)?, Scope::Subordinates)
    }

    fn open_cursor<'t, T>(&self, txn: &'t T, parent: Vec<u8>, scope: Scope) -> CoreResult<Dn2IdCursor<'t>>
    where
        T: ReadableTransaction + ?Sized,
    {
        Ok(Dn2IdCursor {
            cursor: txn.open_cursor(&self.tree)?,
            upper: DnKeyFormat::after_last_child(&parent),
            parent,
            scope,
            started: false,
            done: false,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Children,
    Subordinates,
}

/// Sequential cursor over a DN2ID key range.
///
/// Yields `(dn key, entry id)` pairs in strictly increasing key order.
pub struct Dn2IdCursor<'t> {
    cursor: Box<dyn Cursor + 't>,
    parent: Vec<u8>,
    upper: Vec<u8>,
    scope: Scope,
    started: bool,
    done: bool,
}

impl Dn2IdCursor<'_> {
    fn advance(&mut self) -> CoreResult<Option<(Vec<u8>, EntryId)>> {
        let mut found = if self.started {
            match self.scope {
                Scope::Subordinates => self.cursor.next()?,
                Scope::Children => {
                    let after = match self.cursor.key() {
                        Some(key) => DnKeyFormat::after_last_child(key),
                        None => return Ok(None),
                    };
                    self.cursor.position_to_key_or_next(&after)?
                }
            }
        } else {
            self.started = true;
            self.cursor
                .position_to_key_or_next(&DnKeyFormat::before_first_child(&self.parent))?
        };

        loop {
            if !found {
                return Ok(None);
            }
            let (Some(key), Some(value)) = (self.cursor.key(), self.cursor.value()) else {
                return Ok(None);
            };
            if key >= self.upper.as_slice() {
                return Ok(None);
            }
            if self.scope == Scope::Children && !DnKeyFormat::is_child(&self.parent, key) {
                // Orphaned descendant: jump past the child it would belong to.
                let end = key[self.parent.len() + 1..]
                    .iter()
                    .position(|b| *b == DnKeyFormat::SEPARATOR)
                    .map_or(key.len(), |p| self.parent.len() + 1 + p);
                let skip = DnKeyFormat::after_last_child(&key[..end]);
                found = self.cursor.position_to_key_or_next(&skip)?;
                continue;
            }
            let id = EntryId::from_key(value).map_err(|_| {
                CoreError::invalid_format(format!("corrupt dn2id value under key {key:02x?}"))
            })?;
            return Ok(Some((key.to_vec(), id)));
        }
    }
}

impl Iterator for Dn2IdCursor<'_> {
    type Item = CoreResult<(Vec<u8>, EntryId)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                self.cursor.close();
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirdb_storage::{Storage, TreeStorage};

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    fn setup(entries: &[(&str, u64)]) -> (TreeStorage, Dn2Id) {
        let storage = TreeStorage::in_memory();
        let namespace = TreeName::new("o=test", Dn2Id::TREE);
        let dn2id = Dn2Id::new(&namespace, dn("o=test"));
        storage
            .write(|txn| -> CoreResult<()> {
                txn.open_tree(dn2id.tree(), true)?;
                for (name, id) in entries {
                    dn2id.put(txn, &dn(name), EntryId::new(*id))?;
                }
                Ok(())
            })
            .unwrap();
        (storage, dn2id)
    }

    fn tree_entries() -> Vec<(&'static str, u64)> {
        vec![
            ("o=test", 1),
            ("ou=people,o=test", 2),
            ("cn=b,ou=people,o=test", 3),
            ("cn=a,ou=people,o=test", 4),
            ("cn=x,cn=a,ou=people,o=test", 5),
            ("ou=groups,o=test", 6),
            ("ou=peoplex,o=test", 7),
        ]
    }

    fn ids(cursor: Dn2IdCursor<'_>) -> Vec<u64> {
        cursor.map(|item| item.unwrap().1.as_u64()).collect()
    }

    #[test]
    fn get_put_remove() {
        let (storage, dn2id) = setup(&tree_entries());
        storage
            .write(|txn| -> CoreResult<()> {
                assert_eq!(dn2id.get(&*txn, &dn("cn=a,ou=people,o=test"))?, Some(EntryId::new(4)));
                assert_eq!(dn2id.get(&*txn, &dn("cn=zz,o=test"))?, None);
                assert!(dn2id.remove(txn, &dn("cn=a,ou=people,o=test"))?);
                assert!(!dn2id.remove(txn, &dn("cn=a,ou=people,o=test"))?);
                assert!(dn2id.get(&*txn, &dn("cn=a,ou=people,o=test"))?.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn children_cursor_skips_grandchildren() {
        let (storage, dn2id) = setup(&tree_entries());
        storage
            .read(|txn| -> CoreResult<()> {
                assert_eq!(ids(dn2id.open_children_cursor(txn, &dn("o=test"))?), vec![6, 2, 7]);
                assert_eq!(
                    ids(dn2id.open_children_cursor(txn, &dn("ou=people,o=test"))?),
                    vec![4, 3]
                );
                assert!(ids(dn2id.open_children_cursor(txn, &dn("cn=b,ou=people,o=test"))?).is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn subordinates_cursor_is_depth_first() {
        let (storage, dn2id) = setup(&tree_entries());
        storage
            .read(|txn| -> CoreResult<()> {
                assert_eq!(
                    ids(dn2id.open_subordinates_cursor(txn, &dn("ou=people,o=test"))?),
                    vec![4, 5, 3]
                );
                assert_eq!(
                    ids(dn2id.open_subordinates_cursor(txn, &dn("o=test"))?),
                    vec![6, 2, 4, 5, 3, 7]
                );
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn children_cursor_steps_over_orphans() {
        let (storage, dn2id) = setup(&[
            ("o=test", 1),
            ("cn=x,ou=missing,o=test", 2),
            ("ou=real,o=test", 3),
        ]);
        storage
            .read(|txn| -> CoreResult<()> {
                assert_eq!(ids(dn2id.open_children_cursor(txn, &dn("o=test"))?), vec![3]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn keys_decode_back_to_dns() {
        let (storage, dn2id) = setup(&tree_entries());
        let names: Vec<String> = storage
            .read(|txn| -> CoreResult<Vec<String>> {
                dn2id
                    .open_children_cursor(txn, &dn("ou=people,o=test"))?
                    .map(|item| -> CoreResult<String> { Ok(dn2id.decode_key(&item?.0)?.to_string()) })
                    .collect()
            })
            .unwrap();
        assert_eq!(names, vec!["cn=a,ou=people,o=test", "cn=b,ou=people,o=test"]);
    }

    #[test]
    fn dn_outside_base_is_rejected() {
        let (storage, dn2id) = setup(&[]);
        let result = storage.read(|txn| dn2id.get(txn, &dn("o=elsewhere")));
        assert!(matches!(result, Err(CoreError::InvalidDn { .. })));
    }
}
