//! Per-index state flags.
//!
//! The `state` tree of a container maps an index tree name to one flag byte.
//! A missing record means [`IndexFlags::COMPACTED`] only.
//!
//! ## Invariants
//!
//! - Whenever TRUSTED is stored, COMPACTED is stored too.

use std::fmt;
use std::ops::BitOr;

use dirdb_storage::{ReadableTransaction, TreeName, WriteableTransaction};

use crate::error::{CoreError, CoreResult};

/// Flags describing an index tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexFlags(u8);

impl IndexFlags {
    /// No flag set.
    pub const NONE: Self = Self(0x00);
    /// The index reflects every entry and may answer searches.
    pub const TRUSTED: Self = Self(0x01);
    /// ID sets are written with the compact (V2) encoding.
    pub const COMPACTED: Self = Self(0x02);

    /// Flags assumed when no record exists.
    pub const DEFAULT: Self = Self::COMPACTED;

    /// Raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Parses raw flag bits.
    ///
    /// # Errors
    ///
    /// Returns an error if unknown bits are set.
    pub fn from_bits(bits: u8) -> CoreResult<Self> {
        if bits & !(Self::TRUSTED.0 | Self::COMPACTED.0) != 0 {
            return Err(CoreError::invalid_format(format!("unknown index flags {bits:#04x}")));
        }
        Ok(Self(bits))
    }

    /// Returns `true` if every flag of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Flags with `other` removed.
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    fn normalized(self) -> Self {
        if self.contains(Self::TRUSTED) {
            self | Self::COMPACTED
        } else {
            self
        }
    }
}

impl BitOr for IndexFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for IndexFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::TRUSTED) {
            names.push("TRUSTED");
        }
        if self.contains(Self::COMPACTED) {
            names.push("COMPACTED");
        }
        if names.is_empty() {
            f.write_str("NONE")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// Accessor for the `state` tree of one container.
#[derive(Debug, Clone)]
pub struct State {
    tree: TreeName,
}

impl State {
    /// Local name of the state tree.
    pub const TREE: &'static str = "state";

    /// Creates the accessor for the container whose trees live in `namespace`.
    #[must_use]
    pub fn new(namespace: &TreeName) -> Self {
        Self {
            tree: namespace.sibling(Self::TREE),
        }
    }

    /// The state tree.
    #[must_use]
    pub fn tree(&self) -> &TreeName {
        &self.tree
    }

    /// Flags of `index`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt record.
    pub fn get_flags<T>(&self, txn: &T, index: &TreeName) -> CoreResult<IndexFlags>
    where
        T: ReadableTransaction + ?Sized,
    {
        match txn.read(&self.tree, index.index_id().as_bytes())? {
            None => Ok(IndexFlags::DEFAULT),
            Some(value) => match value.as_slice() {
                [bits] => IndexFlags::from_bits(*bits),
                _ => Err(CoreError::invalid_format(format!(
                    "state record of {index} has {} bytes",
                    value.len()
                ))),
            },
        }
    }

    /// Sets `flags` on `index`. Setting TRUSTED also sets COMPACTED.
    ///
    /// Returns `true` if the stored flags changed.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt record.
    pub fn add_flags<T>(&self, txn: &mut T, index: &TreeName, flags: IndexFlags) -> CoreResult<bool>
    where
        T: WriteableTransaction + ?Sized,
    {
        let current = self.get_flags(&*txn, index)?;
        self.store(txn, index, current, (current | flags).normalized())
    }

    /// Clears `flags` on `index`.
    ///
    /// Returns `true` if the stored flags changed.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a corrupt record.
    pub fn remove_flags<T>(&self, txn: &mut T, index: &TreeName, flags: IndexFlags) -> CoreResult<bool>
    where
        T: WriteableTransaction + ?Sized,
    {
        let current = self.get_flags(&*txn, index)?;
        self.store(txn, index, current, current.without(flags).normalized())
    }

    /// Replaces the flags of `index`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn set_flags<T>(&self, txn: &mut T, index: &TreeName, flags: IndexFlags) -> CoreResult<()>
    where
        T: WriteableTransaction + ?Sized,
    {
        txn.put(&self.tree, index.index_id().as_bytes(), &[flags.normalized().bits()])?;
        Ok(())
    }

    /// Drops the record of `index`, returning it to the default flags.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn delete_record<T>(&self, txn: &mut T, index: &TreeName) -> CoreResult<()>
    where
        T: WriteableTransaction + ?Sized,
    {
        txn.delete(&self.tree, index.index_id().as_bytes())?;
        Ok(())
    }

    fn store<T>(
        &self,
        txn: &mut T,
        index: &TreeName,
        current: IndexFlags,
        next: IndexFlags,
    ) -> CoreResult<bool>
    where
        T: WriteableTransaction + ?Sized,
    {
        if current == next {
            return Ok(false);
        }
        txn.put(&self.tree, index.index_id().as_bytes(), &[next.bits()])?;
        Ok(true)
    }
}
