//! Transaction contracts consumed by the index layer.

use crate::cursor::Cursor;
use crate::error::{StorageError, StorageResult};
use crate::tree::TreeName;

/// Read access to a consistent view of all trees.
pub trait ReadableTransaction {
    /// Reads the value stored under `key`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TreeNotFound`] if the tree does not exist.
    fn read(&self, tree: &TreeName, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Opens a read-only cursor over `tree`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TreeNotFound`] if the tree does not exist.
    fn open_cursor(&self, tree: &TreeName) -> StorageResult<Box<dyn Cursor + '_>>;

    /// Number of records in `tree`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TreeNotFound`] if the tree does not exist.
    fn record_count(&self, tree: &TreeName) -> StorageResult<u64>;

    /// Returns `true` if `tree` exists in this view.
    fn tree_exists(&self, tree: &TreeName) -> bool;
}

/// Write access. All changes become visible atomically when the owning
/// [`Storage::write`] call commits.
pub trait WriteableTransaction: ReadableTransaction {
    /// Opens `tree`, creating it when `create_on_demand` is set.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TreeNotFound`] if the tree is missing and
    /// `create_on_demand` is `false`.
    fn open_tree(&mut self, tree: &TreeName, create_on_demand: bool) -> StorageResult<()>;

    /// Deletes `tree` and all of its records. Missing trees are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    fn delete_tree(&mut self, tree: &TreeName) -> StorageResult<()>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TreeNotFound`] if the tree does not exist.
    fn put(&mut self, tree: &TreeName, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Applies `f` to the current value of `key` (or `None`) and stores the
    /// result. Returning `None` deletes the record.
    ///
    /// The read and the write are atomic with respect to other writers.
    /// Returns `true` if the stored record changed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TreeNotFound`] if the tree does not exist.
    fn update(
        &mut self,
        tree: &TreeName,
        key: &[u8],
        f: &mut dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>>,
    ) -> StorageResult<bool>;

    /// Deletes `key`. Returns `false` if there was no such record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TreeNotFound`] if the tree does not exist.
    fn delete(&mut self, tree: &TreeName, key: &[u8]) -> StorageResult<bool>;

    /// Opens a cursor that may delete the records it visits.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TreeNotFound`] if the tree does not exist.
    fn open_write_cursor(&mut self, tree: &TreeName) -> StorageResult<Box<dyn Cursor + '_>>;
}

/// A transactional store of named trees.
///
/// # Invariants
///
/// - Readers see a consistent snapshot taken when the transaction began.
/// - A write transaction commits only if its closure returns `Ok`.
/// - Writers are serialized, so [`WriteableTransaction::update`] never races.
pub trait Storage: Send + Sync {
    /// Runs `op` inside a read transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Closed`] after [`Storage::close`], or whatever
    /// `op` returns.
    fn read<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&dyn ReadableTransaction) -> Result<T, E>,
        E: From<StorageError>;

    /// Runs `op` inside a write transaction, committing on `Ok` and
    /// discarding every change on `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Closed`] after [`Storage::close`], a commit
    /// failure, or whatever `op` returns.
    fn write<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn WriteableTransaction) -> Result<T, E>,
        E: From<StorageError>;

    /// Names of all existing trees, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Closed`] after [`Storage::close`].
    fn list_trees(&self) -> StorageResult<Vec<TreeName>>;

    /// Waits for the in-flight writer, makes committed data durable and
    /// rejects every later transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails.
    fn close(&self) -> StorageResult<()>;
}
