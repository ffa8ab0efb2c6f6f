//! Entry container: every tree of one base DN.
//!
//! An [`EntryContainer`] ties the `dn2id`, `id2entry`, `id2childrencount`,
//! `state` and attribute index trees of one base DN together and keeps them
//! consistent across entry adds, deletes, modifies and renames. Each
//! operation runs in one write transaction of the underlying [`Storage`].
//!
//! ## Invariants
//!
//! - Every `dn2id` key maps to an ID present in `id2entry`, and the entry
//!   stored there has that DN.
//! - Every entry except the base has its parent in `dn2id`.
//! - The children count of an entry equals its number of `dn2id` children,
//!   and the total count equals the number of entries below the base.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dirdb_storage::{ReadableTransaction, Storage, TreeName, WriteableTransaction};
use tracing::{debug, info};

use crate::children_count::Id2ChildrenCount;
use crate::config::{BackendConfig, IndexType};
use crate::dn::Dn;
use crate::dn2id::Dn2Id;
use crate::entry::{Entry, Id2Entry};
use crate::error::{CoreError, CoreResult};
use crate::id_set::EntryIdSet;
use crate::index::{AttributeIndex, DefaultIndex, IndexBuffer};
use crate::state::{IndexFlags, State};
use crate::types::EntryId;

/// All trees of one base DN over a storage engine.
pub struct EntryContainer<S: Storage> {
    storage: S,
    config: BackendConfig,
    base: Dn,
    dn2id: Dn2Id,
    id2entry: Id2Entry,
    children: Id2ChildrenCount,
    state: State,
    attributes: Vec<AttributeIndex>,
    next_id: AtomicU64,
}

impl<S: Storage> EntryContainer<S> {
    /// Opens the container described by `config`, creating missing trees.
    ///
    /// Attribute indexes created on an empty container start TRUSTED. Indexes
    /// added to a populated container stay untrusted until rebuilt. With
    /// `compact_encoding` off, new indexes write V1 sets until they are
    /// rebuilt.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration or on storage failure.
    pub fn open(storage: S, config: BackendConfig) -> CoreResult<Self> {
        config.validate()?;
        let base = Dn::parse(&config.base_dn)?;
        let namespace = TreeName::new(base.to_string(), Dn2Id::TREE);
        let state = State::new(&namespace);
        let attributes: Vec<AttributeIndex> = config
            .indexes
            .iter()
            .map(|definition| {
                AttributeIndex::new(&namespace, definition, config.index_entry_limit, &state)
            })
            .collect();
        let container = Self {
            dn2id: Dn2Id::new(&namespace, base.clone()),
            id2entry: Id2Entry::new(&namespace),
            children: Id2ChildrenCount::new(&namespace, config.children_count_shards),
            state,
            attributes,
            base,
            config,
            storage,
            next_id: AtomicU64::new(1),
        };

        let last = container.storage.write(|txn| -> CoreResult<Option<EntryId>> {
            for tree in container.core_trees() {
                txn.open_tree(&tree, true)?;
            }
            let last = container.id2entry.last_id(&*txn)?;
            for index in container.attribute_trees() {
                if txn.tree_exists(index.tree()) {
                    continue;
                }
                txn.open_tree(index.tree(), true)?;
                let flags = match (container.config.compact_encoding, last) {
                    (false, _) => IndexFlags::NONE,
                    (true, None) => IndexFlags::TRUSTED,
                    (true, Some(_)) => IndexFlags::COMPACTED,
                };
                container.state.set_flags(txn, index.tree(), flags)?;
                debug!(tree = %index.tree(), %flags, "created index tree");
            }
            Ok(last)
        })?;
        container.set_next_id(last.map_or(EntryId::new(1), EntryId::next));
        info!(base = %container.base, next_id = container.next_id.load(Ordering::Relaxed), "opened entry container");
        Ok(container)
    }

    /// The underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// The container configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Normalized base DN.
    pub fn base(&self) -> &Dn {
        &self.base
    }

    /// The `dn2id` accessor.
    pub fn dn2id(&self) -> &Dn2Id {
        &self.dn2id
    }

    /// The `id2entry` accessor.
    pub fn id2entry(&self) -> &Id2Entry {
        &self.id2entry
    }

    /// The `id2childrencount` accessor.
    pub fn children_count(&self) -> &Id2ChildrenCount {
        &self.children
    }

    /// The `state` accessor.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Attribute indexes in configuration order.
    pub fn attribute_indexes(&self) -> &[AttributeIndex] {
        &self.attributes
    }

    /// Index for `attribute`, if configured.
    pub fn attribute_index(&self, attribute: &str) -> Option<&AttributeIndex> {
        let attribute = attribute.to_ascii_lowercase();
        self.attributes.iter().find(|index| index.attribute() == attribute)
    }

    /// Every default index tree of every attribute.
    pub fn attribute_trees(&self) -> impl Iterator<Item = &DefaultIndex> + '_ {
        self.attributes
            .iter()
            .flat_map(|attribute| attribute.indexes().map(|(_, index)| index))
    }

    /// The non-attribute trees.
    pub fn core_trees(&self) -> Vec<TreeName> {
        vec![
            self.dn2id.tree().clone(),
            self.id2entry.tree().clone(),
            self.children.tree().clone(),
            self.state.tree().clone(),
        ]
    }

    /// Allocates `count` consecutive entry IDs and returns the first.
    pub fn reserve_ids(&self, count: u64) -> EntryId {
        EntryId::new(self.next_id.fetch_add(count, Ordering::SeqCst))
    }

    /// Sets the next ID to allocate.
    pub fn set_next_id(&self, id: EntryId) {
        self.next_id.store(id.as_u64().max(1), Ordering::SeqCst);
    }

    /// Adds `entry` below its existing parent and returns its new ID.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidDn`] for a DN that does not parse or lies
    ///   outside the base
    /// - [`CoreError::EntryAlreadyExists`] if the DN is taken
    /// - [`CoreError::NoSuchParent`] if the parent entry is missing
    pub fn add_entry(&self, entry: Entry) -> CoreResult<EntryId> {
        let entry = entry.normalized();
        let dn = entry.parsed_dn()?;
        let key = self.dn2id.key(&dn)?;
        let id = self.storage.write(|txn| -> CoreResult<EntryId> {
            if self.dn2id.get_by_key(&*txn, &key)?.is_some() {
                return Err(CoreError::EntryAlreadyExists { dn: dn.to_string() });
            }
            let parent_id = match dn.parent().filter(|_| dn != self.base) {
                Some(parent) => Some(
                    self.dn2id
                        .get(&*txn, &parent)?
                        .ok_or_else(|| CoreError::NoSuchParent { dn: dn.to_string() })?,
                ),
                None => None,
            };

            let id = self.reserve_ids(1);
            self.dn2id.put_key(txn, &key, id)?;
            self.id2entry.put(txn, id, &entry)?;
            if let Some(parent_id) = parent_id {
                self.children.update_count(txn, parent_id, 1)?;
                self.children.update_total_count(txn, 1)?;
            }
            let mut buffer = IndexBuffer::new();
            for attribute in &self.attributes {
                attribute.add_entry(&mut buffer, &entry, id);
            }
            buffer.flush(txn, self.attribute_trees())?;
            Ok(id)
        })?;
        debug!(%dn, %id, "added entry");
        Ok(id)
    }

    /// Entry with DN `dn`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt record.
    pub fn get_entry(&self, dn: &Dn) -> CoreResult<Option<Entry>> {
        self.storage.read(|txn| -> CoreResult<Option<Entry>> {
            match self.dn2id.get(txn, dn)? {
                Some(id) => Ok(Some(
                    self.id2entry.get(txn, id)?.ok_or(CoreError::MissingEntry(id))?,
                )),
                None => Ok(None),
            }
        })
    }

    /// ID of the entry with DN `dn`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt record.
    pub fn get_entry_id(&self, dn: &Dn) -> CoreResult<Option<EntryId>> {
        self.storage.read(|txn| self.dn2id.get(txn, dn))
    }

    /// Entry stored under `id`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt record.
    pub fn get_entry_by_id(&self, id: EntryId) -> CoreResult<Option<Entry>> {
        self.storage.read(|txn| self.id2entry.get(txn, id))
    }

    /// Deletes the leaf entry `dn`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NoSuchEntry`] if `dn` does not exist
    /// - [`CoreError::NotAllowedOnNonLeaf`] if `dn` has children
    pub fn delete_entry(&self, dn: &Dn) -> CoreResult<()> {
        self.storage.write(|txn| -> CoreResult<()> {
            let id = self.require_id(&*txn, dn)?;
            if self.dn2id.open_children_cursor(&*txn, dn)?.next().transpose()?.is_some() {
                return Err(CoreError::NotAllowedOnNonLeaf { dn: dn.to_string() });
            }
            let key = self.dn2id.key(dn)?;
            self.remove_record(txn, &key, id)?;
            if let Some(parent) = dn.parent().filter(|_| *dn != self.base) {
                let parent_id = self.require_id(&*txn, &parent)?;
                self.children.update_count(txn, parent_id, -1)?;
                self.children.update_total_count(txn, -1)?;
            }
            Ok(())
        })?;
        debug!(%dn, "deleted entry");
        Ok(())
    }

    /// Deletes `dn` and its whole subtree. Returns the number of entries
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoSuchEntry`] if `dn` does not exist.
    pub fn delete_subtree(&self, dn: &Dn) -> CoreResult<u64> {
        let removed = self.storage.write(|txn| -> CoreResult<u64> {
            let id = self.require_id(&*txn, dn)?;
            let subordinates: Vec<(Vec<u8>, EntryId)> = self
                .dn2id
                .open_subordinates_cursor(&*txn, dn)?
                .collect::<CoreResult<_>>()?;

            for (key, child) in subordinates.iter().rev() {
                self.remove_record(txn, key, *child)?;
            }
            let key = self.dn2id.key(dn)?;
            self.remove_record(txn, &key, id)?;

            let below = subordinates.len() as i64;
            if let Some(parent) = dn.parent().filter(|_| *dn != self.base) {
                let parent_id = self.require_id(&*txn, &parent)?;
                self.children.update_count(txn, parent_id, -1)?;
                self.children.update_total_count(txn, -(below + 1))?;
            } else {
                self.children.update_total_count(txn, -below)?;
            }
            Ok(below as u64 + 1)
        })?;
        info!(%dn, removed, "deleted subtree");
        Ok(removed)
    }

    /// Replaces the attributes of `dn`, updating only the index keys that
    /// changed. Returns the previous entry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoSuchEntry`] if `dn` does not exist.
    pub fn modify_entry(
        &self,
        dn: &Dn,
        attributes: BTreeMap<String, Vec<String>>,
    ) -> CoreResult<Entry> {
        self.storage.write(|txn| -> CoreResult<Entry> {
            let id = self.require_id(&*txn, dn)?;
            let old = self.id2entry.get(&*txn, id)?.ok_or(CoreError::MissingEntry(id))?;
            let new = Entry {
                dn: old.dn.clone(),
                attributes,
            }
            .normalized();
            let mut buffer = IndexBuffer::new();
            for attribute in &self.attributes {
                attribute.modify_entry(&mut buffer, &old, &new, id);
            }
            buffer.flush(txn, self.attribute_trees())?;
            self.id2entry.put(txn, id, &new)?;
            Ok(old)
        })
    }

    /// Moves the subtree rooted at `dn` to `new_dn`.
    ///
    /// Entry IDs and attributes are kept. `dn2id` keys and the DNs stored in
    /// `id2entry` are rewritten. Children counts move from the old parent to
    /// the new one.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NoSuchEntry`] if `dn` does not exist
    /// - [`CoreError::EntryAlreadyExists`] if `new_dn` is taken
    /// - [`CoreError::NoSuchParent`] if the parent of `new_dn` is missing
    /// - [`CoreError::InvalidOperation`] when renaming the base entry or
    ///   moving an entry below itself
    pub fn rename_entry(&self, dn: &Dn, new_dn: &Dn) -> CoreResult<()> {
        if *dn == self.base || *new_dn == self.base {
            return Err(CoreError::invalid_operation("the base entry cannot be renamed"));
        }
        if new_dn.is_within(dn) {
            return Err(CoreError::invalid_operation(format!(
                "cannot move {dn} below itself"
            )));
        }
        let moved = self.storage.write(|txn| -> CoreResult<usize> {
            let id = self.require_id(&*txn, dn)?;
            let new_key = self.dn2id.key(new_dn)?;
            if self.dn2id.get_by_key(&*txn, &new_key)?.is_some() {
                return Err(CoreError::EntryAlreadyExists { dn: new_dn.to_string() });
            }
            let old_parent = dn.parent().ok_or_else(|| CoreError::NoSuchParent { dn: dn.to_string() })?;
            let new_parent = new_dn
                .parent()
                .ok_or_else(|| CoreError::NoSuchParent { dn: new_dn.to_string() })?;
            let old_parent_id = self.require_id(&*txn, &old_parent)?;
            let new_parent_id = self
                .dn2id
                .get(&*txn, &new_parent)?
                .ok_or_else(|| CoreError::NoSuchParent { dn: new_dn.to_string() })?;

            let mut subtree = vec![(self.dn2id.key(dn)?, id)];
            subtree.extend(
                self.dn2id
                    .open_subordinates_cursor(&*txn, dn)?
                    .collect::<CoreResult<Vec<_>>>()?,
            );

            for (key, _) in &subtree {
                self.dn2id.remove_key(txn, key)?;
            }
            for (key, entry_id) in &subtree {
                let old_dn = self.dn2id.decode_key(key)?;
                let renamed = old_dn.rename_suffix(dn, new_dn).ok_or_else(|| {
                    CoreError::invalid_operation(format!("{old_dn} is not below {dn}"))
                })?;
                self.dn2id.put(txn, &renamed, *entry_id)?;
                let mut entry = self
                    .id2entry
                    .get(&*txn, *entry_id)?
                    .ok_or(CoreError::MissingEntry(*entry_id))?;
                entry.dn = renamed.to_string();
                self.id2entry.put(txn, *entry_id, &entry)?;
            }

            if old_parent_id != new_parent_id {
                self.children.update_count(txn, old_parent_id, -1)?;
                self.children.update_count(txn, new_parent_id, 1)?;
            }
            Ok(subtree.len())
        })?;
        info!(from = %dn, to = %new_dn, moved, "renamed entry");
        Ok(())
    }

    /// Number of immediate children of `dn`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoSuchEntry`] if `dn` does not exist.
    pub fn num_children(&self, dn: &Dn) -> CoreResult<i64> {
        self.storage.read(|txn| -> CoreResult<i64> {
            let id = self.require_id(txn, dn)?;
            self.children.get_count(txn, id)
        })
    }

    /// Number of entries below `dn`. Served from the total count for the
    /// base entry, counted from `dn2id` otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoSuchEntry`] if `dn` does not exist.
    pub fn num_subordinates(&self, dn: &Dn) -> CoreResult<i64> {
        self.storage.read(|txn| -> CoreResult<i64> {
            self.require_id(txn, dn)?;
            if *dn == self.base {
                return self.children.get_total_count(txn);
            }
            let mut count = 0i64;
            for item in self.dn2id.open_subordinates_cursor(txn, dn)? {
                item?;
                count += 1;
            }
            Ok(count)
        })
    }

    /// Number of entries stored, the base entry included.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn entry_count(&self) -> CoreResult<u64> {
        self.storage
            .read(|txn| -> CoreResult<u64> { Ok(txn.record_count(self.id2entry.tree())?) })
    }

    /// Immediate children of `dn` in key order.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt key.
    pub fn children(&self, dn: &Dn) -> CoreResult<Vec<(Dn, EntryId)>> {
        self.storage.read(|txn| -> CoreResult<Vec<(Dn, EntryId)>> {
            self.dn2id
                .open_children_cursor(txn, dn)?
                .map(|item| item.and_then(|(key, id)| Ok((self.dn2id.decode_key(&key)?, id))))
                .collect()
        })
    }

    /// Whole subtree of `dn`, excluding `dn`, parents before children.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt key.
    pub fn subordinates(&self, dn: &Dn) -> CoreResult<Vec<(Dn, EntryId)>> {
        self.storage.read(|txn| -> CoreResult<Vec<(Dn, EntryId)>> {
            self.dn2id
                .open_subordinates_cursor(txn, dn)?
                .map(|item| item.and_then(|(key, id)| Ok((self.dn2id.decode_key(&key)?, id))))
                .collect()
        })
    }

    /// Candidate entries for an assertion on `attribute`.
    ///
    /// Undefined when no trusted index of that kind exists.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt record.
    pub fn index_candidates(
        &self,
        attribute: &str,
        ty: IndexType,
        assertion: &str,
    ) -> CoreResult<EntryIdSet> {
        let Some(index) = self.attribute_index(attribute) else {
            return Ok(EntryIdSet::undefined());
        };
        self.storage.read(|txn| index.candidates(txn, ty, assertion))
    }

    /// Drops every tree of the container.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn destroy(&self) -> CoreResult<()> {
        self.storage.write(|txn| -> CoreResult<()> {
            for tree in self.core_trees() {
                txn.delete_tree(&tree)?;
            }
            for index in self.attribute_trees() {
                txn.delete_tree(index.tree())?;
            }
            Ok(())
        })?;
        self.set_next_id(EntryId::new(1));
        info!(base = %self.base, "destroyed entry container");
        Ok(())
    }

    /// Empties every tree and resets all index flags, ready for an import.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn clear(&self) -> CoreResult<()> {
        self.storage.write(|txn| -> CoreResult<()> {
            for tree in self.core_trees() {
                txn.delete_tree(&tree)?;
                txn.open_tree(&tree, true)?;
            }
            for index in self.attribute_trees() {
                txn.delete_tree(index.tree())?;
                txn.open_tree(index.tree(), true)?;
            }
            Ok(())
        })?;
        self.set_next_id(EntryId::new(1));
        Ok(())
    }

    fn require_id<T>(&self, txn: &T, dn: &Dn) -> CoreResult<EntryId>
    where
        T: ReadableTransaction + ?Sized,
    {
        self.dn2id
            .get(txn, dn)?
            .ok_or_else(|| CoreError::NoSuchEntry { dn: dn.to_string() })
    }

    /// Removes one entry's dn2id, id2entry, counter and index records.
    fn remove_record<T>(&self, txn: &mut T, key: &[u8], id: EntryId) -> CoreResult<()>
    where
        T: WriteableTransaction + ?Sized,
    {
        let entry = self.id2entry.get(&*txn, id)?.ok_or(CoreError::MissingEntry(id))?;
        let mut buffer = IndexBuffer::new();
        for attribute in &self.attributes {
            attribute.remove_entry(&mut buffer, &entry, id);
        }
        buffer.flush(txn, self.attribute_trees())?;
        self.dn2id.remove_key(txn, key)?;
        self.id2entry.remove(txn, id)?;
        self.children.remove_count(txn, id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexDefinition;
    use dirdb_storage::TreeStorage;

    fn dn(text: &str) -> Dn {
        Dn::parse(text).unwrap()
    }

    fn container() -> EntryContainer<TreeStorage> {
        let config = BackendConfig::new("dc=example,dc=com")
            .with_index(IndexDefinition::new("cn", &[IndexType::Equality, IndexType::Presence]))
            .with_index(IndexDefinition::new("mail", &[IndexType::Substring]));
        EntryContainer::open(TreeStorage::in_memory(), config).unwrap()
    }

    fn populate(container: &EntryContainer<TreeStorage>) {
        for text in [
            "dc=example,dc=com",
            "ou=people,dc=example,dc=com",
            "ou=groups,dc=example,dc=com",
            "cn=alice,ou=people,dc=example,dc=com",
            "cn=bob,ou=people,dc=example,dc=com",
        ] {
            let rdn_value = text.split([',', '=']).nth(1).unwrap_or_default();
            container
                .add_entry(Entry::new(text).with_attribute("cn", [rdn_value]))
                .unwrap();
        }
    }

    fn names(items: Vec<(Dn, EntryId)>) -> Vec<String> {
        items.into_iter().map(|(dn, _)| dn.to_string()).collect()
    }

    #[test]
    fn add_requires_parent_and_unique_dn() {
        let container = container();
        let err = container
            .add_entry(Entry::new("ou=people,dc=example,dc=com"))
            .unwrap_err();
        assert!(matches!(err, CoreError::NoSuchParent { .. }));

        populate(&container);
        let err = container
            .add_entry(Entry::new("cn=ALICE,ou=People,dc=example,dc=com"))
            .unwrap_err();
        assert!(matches!(err, CoreError::EntryAlreadyExists { .. }));
        let err = container.add_entry(Entry::new("o=elsewhere")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidDn { .. }));
        assert_eq!(container.entry_count().unwrap(), 5);
    }

    #[test]
    fn counts_follow_adds_and_deletes() {
        let container = container();
        populate(&container);
        let base = dn("dc=example,dc=com");
        let people = dn("ou=people,dc=example,dc=com");
        assert_eq!(container.num_children(&base).unwrap(), 2);
        assert_eq!(container.num_children(&people).unwrap(), 2);
        assert_eq!(container.num_subordinates(&base).unwrap(), 4);
        assert_eq!(container.num_subordinates(&people).unwrap(), 2);

        let err = container.delete_entry(&people).unwrap_err();
        assert!(matches!(err, CoreError::NotAllowedOnNonLeaf { .. }));
        container
            .delete_entry(&dn("cn=alice,ou=people,dc=example,dc=com"))
            .unwrap();
        assert_eq!(container.num_children(&people).unwrap(), 1);
        assert_eq!(container.num_subordinates(&base).unwrap(), 3);
        assert!(container
            .get_entry(&dn("cn=alice,ou=people,dc=example,dc=com"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn delete_subtree_cascades() {
        let container = container();
        populate(&container);
        let removed = container
            .delete_subtree(&dn("ou=people,dc=example,dc=com"))
            .unwrap();
        assert_eq!(removed, 3);
        let base = dn("dc=example,dc=com");
        assert_eq!(names(container.subordinates(&base).unwrap()), vec!["ou=groups,dc=example,dc=com"]);
        assert_eq!(container.num_children(&base).unwrap(), 1);
        assert_eq!(container.num_subordinates(&base).unwrap(), 1);
        let candidates = container
            .index_candidates("cn", IndexType::Equality, "alice")
            .unwrap();
        assert!(candidates.is_defined() && candidates.is_empty());
    }

    #[test]
    fn modify_updates_indexes() {
        let container = container();
        populate(&container);
        let bob = dn("cn=bob,ou=people,dc=example,dc=com");
        let id = container.get_entry_id(&bob).unwrap().unwrap();
        let mut attributes = BTreeMap::new();
        attributes.insert("CN".to_string(), vec!["Robert".to_string()]);
        attributes.insert("mail".to_string(), vec!["bob@example.com".to_string()]);
        let old = container.modify_entry(&bob, attributes).unwrap();
        assert_eq!(old.values("cn"), ["bob".to_string()]);

        assert!(container
            .index_candidates("cn", IndexType::Equality, "bob")
            .unwrap()
            .is_empty());
        assert!(container
            .index_candidates("cn", IndexType::Equality, "robert")
            .unwrap()
            .contains(id));
        assert_eq!(
            container
                .index_candidates("mail", IndexType::Substring, "example")
                .unwrap()
                .ids(),
            [id]
        );
        assert!(!container
            .index_candidates("sn", IndexType::Equality, "x")
            .unwrap()
            .is_defined());
    }

    #[test]
    fn rename_moves_subtree() {
        let container = container();
        populate(&container);
        let people = dn("ou=people,dc=example,dc=com");
        let staff = dn("ou=staff,ou=groups,dc=example,dc=com");
        let alice_id = container
            .get_entry_id(&dn("cn=alice,ou=people,dc=example,dc=com"))
            .unwrap();
        container.rename_entry(&people, &staff).unwrap();

        let base = dn("dc=example,dc=com");
        assert_eq!(
            names(container.subordinates(&base).unwrap()),
            vec![
                "ou=groups,dc=example,dc=com",
                "ou=staff,ou=groups,dc=example,dc=com",
                "cn=alice,ou=staff,ou=groups,dc=example,dc=com",
                "cn=bob,ou=staff,ou=groups,dc=example,dc=com",
            ]
        );
        let alice = dn("cn=alice,ou=staff,ou=groups,dc=example,dc=com");
        assert_eq!(container.get_entry_id(&alice).unwrap(), alice_id);
        assert_eq!(
            container.get_entry(&alice).unwrap().unwrap().dn,
            "cn=alice,ou=staff,ou=groups,dc=example,dc=com"
        );
        assert_eq!(container.num_children(&base).unwrap(), 1);
        assert_eq!(container.num_children(&dn("ou=groups,dc=example,dc=com")).unwrap(), 1);
        assert_eq!(container.num_subordinates(&base).unwrap(), 4);

        let err = container.rename_entry(&staff, &dn("cn=x,cn=alice,ou=staff,ou=groups,dc=example,dc=com"));
        assert!(matches!(err, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn reopen_keeps_ids_and_trust() {
        let storage = TreeStorage::in_memory();
        let config = BackendConfig::new("o=test");
        let container = EntryContainer::open(storage, config.clone()).unwrap();
        container.add_entry(Entry::new("o=test")).unwrap();
        let storage = container.storage;

        let config = config.with_index(IndexDefinition::new("cn", &[IndexType::Equality]));
        let container = EntryContainer::open(storage, config).unwrap();
        assert_eq!(container.reserve_ids(1), EntryId::new(2));
        let index = container.attribute_index("CN").unwrap();
        let trusted = container
            .storage()
            .read(|txn| index.index(IndexType::Equality).unwrap().is_trusted(txn))
            .unwrap();
        assert!(!trusted);
    }

    #[test]
    fn destroy_drops_trees() {
        let container = container();
        populate(&container);
        container.destroy().unwrap();
        let trees = container.storage().list_trees().unwrap();
        assert!(trees.is_empty());
    }
}
