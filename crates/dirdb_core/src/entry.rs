//! Directory entries and the `id2entry` tree.

use std::collections::BTreeMap;

use dirdb_storage::{Cursor, ReadableTransaction, TreeName, WriteableTransaction};
use serde::{Deserialize, Serialize};

use crate::dn::Dn;
use crate::error::{CoreError, CoreResult};
use crate::types::EntryId;

/// Version byte in front of every encoded entry.
const ENTRY_VERSION: u8 = 0x01;

/// A directory entry: its DN and attribute values.
///
/// Attribute names are stored lower-cased. Values keep their original form;
/// indexes normalize them when generating keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Distinguished name as supplied.
    pub dn: String,
    /// Attribute values by lower-cased attribute name.
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl Entry {
    /// Creates an entry without attributes.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds values of `attribute`.
    #[must_use]
    pub fn with_attribute<I, V>(mut self, attribute: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.attributes
            .entry(attribute.to_ascii_lowercase())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Values of `attribute`, empty if absent.
    #[must_use]
    pub fn values(&self, attribute: &str) -> &[String] {
        self.attributes
            .get(&attribute.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Parsed and normalized DN.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidDn`] if the DN does not parse.
    pub fn parsed_dn(&self) -> CoreResult<Dn> {
        Dn::parse(&self.dn)
    }

    /// Lower-cases attribute names and merges duplicates.
    #[must_use]
    pub fn normalized(self) -> Self {
        let mut attributes: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, values) in self.attributes {
            attributes
                .entry(name.to_ascii_lowercase())
                .or_default()
                .extend(values);
        }
        Self {
            dn: self.dn,
            attributes,
        }
    }

    /// Encodes the entry for `id2entry`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut out = vec![ENTRY_VERSION];
        ciborium::into_writer(self, &mut out)
            .map_err(|e| CoreError::invalid_format(format!("cannot encode entry {}: {e}", self.dn)))?;
        Ok(out)
    }

    /// Decodes an `id2entry` record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] for an unknown version or bad CBOR.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        match bytes.split_first() {
            Some((&ENTRY_VERSION, body)) => ciborium::from_reader(body)
                .map_err(|e| CoreError::invalid_format(format!("cannot decode entry: {e}"))),
            Some((version, _)) => Err(CoreError::invalid_format(format!(
                "unknown entry encoding version {version}"
            ))),
            None => Err(CoreError::invalid_format("empty entry record")),
        }
    }
}

/// Accessor for the `id2entry` tree of one container.
#[derive(Debug, Clone)]
pub struct Id2Entry {
    tree: TreeName,
}

impl Id2Entry {
    /// Local name of the tree.
    pub const TREE: &'static str = "id2entry";

    /// Creates the accessor.
    #[must_use]
    pub fn new(namespace: &TreeName) -> Self {
        Self {
            tree: namespace.sibling(Self::TREE),
        }
    }

    /// The entry tree.
    #[must_use]
    pub fn tree(&self) -> &TreeName {
        &self.tree
    }

    /// Entry stored under `id`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt record.
    pub fn get<T>(&self, txn: &T, id: EntryId) -> CoreResult<Option<Entry>>
    where
        T: ReadableTransaction + ?Sized,
    {
        txn.read(&self.tree, &id.to_key())?
            .map(|bytes| Entry::decode(&bytes))
            .transpose()
    }

    /// Stores `entry` under `id`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage or encoding failure.
    pub fn put<T>(&self, txn: &mut T, id: EntryId, entry: &Entry) -> CoreResult<()>
    where
        T: WriteableTransaction + ?Sized,
    {
        txn.put(&self.tree, &id.to_key(), &entry.encode()?)?;
        Ok(())
    }

    /// Removes the entry under `id`. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn remove<T>(&self, txn: &mut T, id: EntryId) -> CoreResult<bool>
    where
        T: WriteableTransaction + ?Sized,
    {
        Ok(txn.delete(&self.tree, &id.to_key())?)
    }

    /// Highest stored entry ID.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt key.
    pub fn last_id<T>(&self, txn: &T) -> CoreResult<Option<EntryId>>
    where
        T: ReadableTransaction + ?Sized,
    {
        let mut cursor = txn.open_cursor(&self.tree)?;
        if !cursor.position_to_last_key()? {
            return Ok(None);
        }
        cursor.key().map(EntryId::from_key).transpose()
    }

    /// Iterates entries with IDs not below `from`, in ID order.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn iter_from<'t, T>(&self, txn: &'t T, from: EntryId) -> CoreResult<Id2EntryCursor<'t>>
    where
        T: ReadableTransaction + ?Sized,
    {
        Ok(Id2EntryCursor {
            cursor: txn.open_cursor(&self.tree)?,
            from: Some(from),
        })
    }
}

/// Iterator over `(id, entry)` records.
pub struct Id2EntryCursor<'t> {
    cursor: Box<dyn Cursor + 't>,
    from: Option<EntryId>,
}

impl Iterator for Id2EntryCursor<'_> {
    type Item = CoreResult<(EntryId, Entry)>;

    fn next(&mut self) -> Option<Self::Item> {
        let moved = match self.from.take() {
            Some(from) => self.cursor.position_to_key_or_next(&from.to_key()),
            None => self.cursor.next(),
        };
        match moved {
            Ok(true) => {}
            Ok(false) => return None,
            Err(err) => return Some(Err(err.into())),
        }
        let (key, value) = (self.cursor.key()?, self.cursor.value()?);
        Some(EntryId::from_key(key).and_then(|id| Ok((id, Entry::decode(value)?))))
    }
}
