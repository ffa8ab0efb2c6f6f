//! Forward positioning cursors over a tree.

use crate::error::StorageResult;

/// Lifecycle of a [`Cursor`].
///
/// ```text
/// BeforeFirst --next/position--> Positioned --next past end--> Exhausted
///      |                              |                            |
///      +-------------- close ---------+------------ close ---------+--> Closed
/// ```
///
/// A failed positioning call moves the cursor to `Exhausted`. Any positioning
/// call on an `Exhausted` cursor may move it back to `Positioned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Created, not yet positioned. `next` moves to the first record.
    BeforeFirst,
    /// On a record, or on the gap left by deleting the record it was on.
    Positioned,
    /// Ran past the last record or failed to position.
    Exhausted,
    /// Closed. Every operation except `close` fails.
    Closed,
}

/// Forward-only cursor over the records of one tree in key order.
///
/// Keys compare as unsigned byte strings.
///
/// ## Deletion during iteration
///
/// [`Cursor::delete`] removes the current record and leaves the cursor
/// `Positioned` on the gap. `key` and `value` return `None` until the next
/// move, and `next` continues with the first record after the deleted key,
/// so nothing is skipped or visited twice.
pub trait Cursor {
    /// Positions on `key` exactly. Returns `false` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the cursor is closed.
    fn position_to_key(&mut self, key: &[u8]) -> StorageResult<bool>;

    /// Positions on `key` or the first record after it.
    ///
    /// # Errors
    ///
    /// Returns an error if the cursor is closed.
    fn position_to_key_or_next(&mut self, key: &[u8]) -> StorageResult<bool>;

    /// Positions on the record with the greatest key.
    ///
    /// # Errors
    ///
    /// Returns an error if the cursor is closed.
    fn position_to_last_key(&mut self) -> StorageResult<bool>;

    /// Positions on the record at zero-based ordinal `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cursor is closed.
    fn position_to_index(&mut self, index: usize) -> StorageResult<bool>;

    /// Moves to the next record. Returns `false` once past the end.
    ///
    /// # Errors
    ///
    /// Returns an error if the cursor is closed.
    fn next(&mut self) -> StorageResult<bool>;

    /// Returns `true` if the cursor currently sits on a record.
    fn is_defined(&self) -> bool;

    /// Key of the current record.
    fn key(&self) -> Option<&[u8]>;

    /// Value of the current record.
    fn value(&self) -> Option<&[u8]>;

    /// Deletes the current record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::InvalidCursorState`] unless the cursor
    /// is on a record of a write cursor.
    fn delete(&mut self) -> StorageResult<()>;

    /// Current lifecycle state.
    fn state(&self) -> CursorState;

    /// Closes the cursor. Idempotent.
    fn close(&mut self);
}
