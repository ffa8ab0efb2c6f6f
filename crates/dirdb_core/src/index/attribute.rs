//! Per-attribute index keys and candidate lookups.

use std::collections::BTreeSet;

use dirdb_storage::{ReadableTransaction, TreeName};

use crate::config::{IndexDefinition, IndexType};
use crate::dn::normalize_value;
use crate::entry::Entry;
use crate::error::CoreResult;
use crate::id_set::EntryIdSet;
use crate::index::{DefaultIndex, IndexBuffer};
use crate::state::State;
use crate::types::EntryId;

/// The default indexes kept for one attribute.
///
/// Key generation:
///
/// - presence: the single key `+` for any entry holding the attribute
/// - equality: the normalized value
/// - substring: for every character position of the normalized value, the
///   substring starting there, cut to `substring_length` characters
#[derive(Debug, Clone)]
pub struct AttributeIndex {
    attribute: String,
    substring_length: usize,
    indexes: Vec<(IndexType, DefaultIndex)>,
}

impl AttributeIndex {
    /// Key of the presence index.
    pub const PRESENCE_KEY: &'static [u8] = b"+";

    /// Creates the indexes described by `definition`. `default_limit`
    /// applies when the definition has no limit of its own.
    #[must_use]
    pub fn new(
        namespace: &TreeName,
        definition: &IndexDefinition,
        default_limit: u32,
        state: &State,
    ) -> Self {
        let attribute = definition.attribute.to_ascii_lowercase();
        let limit = definition.entry_limit.unwrap_or(default_limit);
        let types: BTreeSet<IndexType> = definition.types.iter().copied().collect();
        let indexes = types
            .into_iter()
            .map(|ty| {
                let tree = namespace.sibling(format!("{attribute}.{}", ty.as_str()));
                (ty, DefaultIndex::new(tree, limit, state.clone()))
            })
            .collect();
        Self {
            attribute,
            substring_length: definition.substring_length.max(1),
            indexes,
        }
    }

    /// Lower-cased attribute type.
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Index of kind `ty`, if maintained.
    #[must_use]
    pub fn index(&self, ty: IndexType) -> Option<&DefaultIndex> {
        self.indexes
            .iter()
            .find_map(|(kind, index)| (*kind == ty).then_some(index))
    }

    /// All maintained indexes with their kind.
    pub fn indexes(&self) -> impl Iterator<Item = (IndexType, &DefaultIndex)> + '_ {
        self.indexes.iter().map(|(ty, index)| (*ty, index))
    }

    /// Keys of kind `ty` generated by `values`.
    #[must_use]
    pub fn keys(&self, ty: IndexType, values: &[String]) -> BTreeSet<Vec<u8>> {
        let mut keys = BTreeSet::new();
        if values.is_empty() {
            return keys;
        }
        match ty {
            IndexType::Presence => {
                keys.insert(Self::PRESENCE_KEY.to_vec());
            }
            IndexType::Equality => {
                keys.extend(values.iter().map(|v| normalize_value(v).into_bytes()));
            }
            IndexType::Substring => {
                for value in values {
                    let chars: Vec<char> = normalize_value(value).chars().collect();
                    for start in 0..chars.len() {
                        let end = (start + self.substring_length).min(chars.len());
                        keys.insert(chars[start..end].iter().collect::<String>().into_bytes());
                    }
                }
            }
        }
        keys
    }

    /// Keys of every maintained index for `entry`.
    #[must_use]
    pub fn entry_keys(&self, entry: &Entry) -> Vec<(&DefaultIndex, BTreeSet<Vec<u8>>)> {
        let values = entry.values(&self.attribute);
        self.indexes
            .iter()
            .map(|(ty, index)| (index, self.keys(*ty, values)))
            .collect()
    }

    /// Buffers the keys of a new entry.
    pub fn add_entry(&self, buffer: &mut IndexBuffer, entry: &Entry, id: EntryId) {
        for (index, keys) in self.entry_keys(entry) {
            for key in keys {
                buffer.put(index.tree(), key, id);
            }
        }
    }

    /// Buffers the removal of a deleted entry's keys.
    pub fn remove_entry(&self, buffer: &mut IndexBuffer, entry: &Entry, id: EntryId) {
        for (index, keys) in self.entry_keys(entry) {
            for key in keys {
                buffer.remove(index.tree(), key, id);
            }
        }
    }

    /// Buffers only the keys that differ between `old` and `new`.
    pub fn modify_entry(&self, buffer: &mut IndexBuffer, old: &Entry, new: &Entry, id: EntryId) {
        let (old_values, new_values) = (old.values(&self.attribute), new.values(&self.attribute));
        for (ty, index) in &self.indexes {
            let before = self.keys(*ty, old_values);
            let after = self.keys(*ty, new_values);
            for key in before.difference(&after) {
                buffer.remove(index.tree(), key.clone(), id);
            }
            for key in after.difference(&before) {
                buffer.put(index.tree(), key.clone(), id);
            }
        }
    }

    /// Candidate entries for an assertion of kind `ty`.
    ///
    /// The result is a superset of the matching entries, or undefined when
    /// the index is missing, not trusted, or the key went over its limit.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt record.
    pub fn candidates<T>(&self, txn: &T, ty: IndexType, assertion: &str) -> CoreResult<EntryIdSet>
    where
        T: ReadableTransaction + ?Sized,
    {
        let Some(index) = self.index(ty) else {
            return Ok(EntryIdSet::undefined());
        };
        if !index.is_trusted(txn)? {
            return Ok(EntryIdSet::undefined());
        }
        match ty {
            IndexType::Presence => index.read(txn, Self::PRESENCE_KEY),
            IndexType::Equality => index.read(txn, normalize_value(assertion).as_bytes()),
            IndexType::Substring => self.substring_candidates(txn, index, assertion),
        }
    }

    fn substring_candidates<T>(
        &self,
        txn: &T,
        index: &DefaultIndex,
        assertion: &str,
    ) -> CoreResult<EntryIdSet>
    where
        T: ReadableTransaction + ?Sized,
    {
        let chars: Vec<char> = normalize_value(assertion).chars().collect();
        if chars.is_empty() {
            return Ok(EntryIdSet::undefined());
        }
        if chars.len() < self.substring_length {
            let prefix: String = chars.iter().collect();
            return index.read_prefix(txn, prefix.as_bytes());
        }
        let mut result = EntryIdSet::undefined();
        for window in chars.windows(self.substring_length) {
            let key: String = window.iter().collect();
            result.retain_all(&index.read(txn, key.as_bytes())?);
            if result.is_defined() && result.is_empty() {
                break;
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirdb_storage::{Storage, TreeStorage};

    fn cn_index(types: &[IndexType]) -> (TreeName, AttributeIndex) {
        let namespace = TreeName::new("o=test", "dn2id");
        let definition = IndexDefinition::new("CN", types).substring_length(3);
        let index = AttributeIndex::new(&namespace, &definition, 0, &State::new(&namespace));
        (namespace, index)
    }

    fn strings(keys: &BTreeSet<Vec<u8>>) -> Vec<String> {
        keys.iter().map(|k| String::from_utf8_lossy(k).into_owned()).collect()
    }

    #[test]
    fn tree_names_follow_attribute_and_kind() {
        let (_, index) = cn_index(&[IndexType::Substring, IndexType::Equality, IndexType::Equality]);
        let names: Vec<String> = index.indexes().map(|(_, i)| i.tree().index_id().to_string()).collect();
        assert_eq!(names, vec!["cn.equality", "cn.substring"]);
        assert!(index.index(IndexType::Presence).is_none());
    }

    #[test]
    fn key_generation() {
        let (_, index) = cn_index(&[IndexType::Presence, IndexType::Equality, IndexType::Substring]);
        let values = vec!["  John   Smith ".to_string()];
        assert_eq!(strings(&index.keys(IndexType::Presence, &values)), vec!["+"]);
        assert_eq!(strings(&index.keys(IndexType::Equality, &values)), vec!["john smith"]);
        let subs = strings(&index.keys(IndexType::Substring, &["abcd".to_string()]));
        assert_eq!(subs, vec!["abc", "bcd", "cd", "d"]);
        assert!(index.keys(IndexType::Presence, &[]).is_empty());
    }

    #[test]
    fn modify_touches_only_changed_keys() {
        let (_, index) = cn_index(&[IndexType::Equality]);
        let old = Entry::new("cn=a,o=test").with_attribute("cn", ["a", "b"]);
        let new = Entry::new("cn=a,o=test").with_attribute("cn", ["a", "c"]);
        let mut buffer = IndexBuffer::new();
        index.modify_entry(&mut buffer, &old, &new, EntryId::new(1));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn candidates_require_trust() {
        let storage = TreeStorage::in_memory();
        let (namespace, index) = cn_index(&[IndexType::Presence, IndexType::Equality, IndexType::Substring]);
        let entries = [
            (1, Entry::new("cn=abcdef,o=test").with_attribute("cn", ["abcdef"])),
            (2, Entry::new("cn=xbcdey,o=test").with_attribute("cn", ["xbcdey"])),
            (3, Entry::new("cn=other,o=test").with_attribute("sn", ["other"])),
        ];
        storage
            .write(|txn| -> CoreResult<()> {
                txn.open_tree(&namespace.sibling(State::TREE), true)?;
                let mut buffer = IndexBuffer::new();
                for (_, i) in index.indexes() {
                    txn.open_tree(i.tree(), true)?;
                }
                for (id, entry) in &entries {
                    index.add_entry(&mut buffer, entry, EntryId::new(*id));
                }
                buffer.flush(txn, index.indexes().map(|(_, i)| i))?;
                Ok(())
            })
            .unwrap();

        storage
            .write(|txn| -> CoreResult<()> {
                assert!(!index.candidates(&*txn, IndexType::Presence, "")?.is_defined());
                for (_, i) in index.indexes() {
                    i.set_trusted(txn, true)?;
                }
                let ids = |set: EntryIdSet| set.iter().map(EntryId::as_u64).collect::<Vec<_>>();
                assert_eq!(ids(index.candidates(&*txn, IndexType::Presence, "")?), vec![1, 2]);
                assert_eq!(ids(index.candidates(&*txn, IndexType::Equality, "ABCDEF")?), vec![1]);
                assert_eq!(ids(index.candidates(&*txn, IndexType::Substring, "bcde")?), vec![1, 2]);
                assert_eq!(ids(index.candidates(&*txn, IndexType::Substring, "abcde")?), vec![1]);
                assert_eq!(ids(index.candidates(&*txn, IndexType::Substring, "ey")?), vec![2]);
                assert!(index.candidates(&*txn, IndexType::Substring, "zzz")?.is_empty());
                Ok(())
            })
            .unwrap();
    }
}
