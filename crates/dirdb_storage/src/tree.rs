//! Tree naming.

use std::fmt;
use std::str::FromStr;

use crate::error::StorageError;

/// Two-part identifier of a tree: a base-DN scoped namespace plus a local
/// index name.
///
/// Tree names are persisted identifiers. The textual form
/// `/<base_dn>/<index_id>` must stay stable across restarts so a backend can
/// reopen its own data.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TreeName {
    base_dn: String,
    index_id: String,
}

impl TreeName {
    /// Creates a tree name.
    pub fn new(base_dn: impl Into<String>, index_id: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            index_id: index_id.into(),
        }
    }

    /// Returns the base DN namespace.
    #[must_use]
    pub fn base_dn(&self) -> &str {
        &self.base_dn
    }

    /// Returns the local index name (e.g. `dn2id`, `cn.equality`).
    #[must_use]
    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    /// Returns a tree in the same namespace with another local name.
    #[must_use]
    pub fn sibling(&self, index_id: impl Into<String>) -> Self {
        Self::new(self.base_dn.clone(), index_id)
    }
}

impl fmt::Display for TreeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.base_dn, self.index_id)
    }
}

impl FromStr for TreeName {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Base DNs may not contain '/', index names never do.
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| StorageError::corrupted(format!("invalid tree name: {s}")))?;
        let split = rest
            .rfind('/')
            .ok_or_else(|| StorageError::corrupted(format!("invalid tree name: {s}")))?;
        Ok(Self::new(&rest[..split], &rest[split + 1..]))
    }
}
