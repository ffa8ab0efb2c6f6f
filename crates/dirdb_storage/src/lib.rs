//! # dirdb Storage
//!
//! Transactional storage abstraction for the dirdb directory backend.
//!
//! The core index code never talks to a concrete engine. It only sees the
//! contracts defined here:
//!
//! - [`TreeName`] identifies a named ordered byte-key/byte-value table
//! - [`ReadableTransaction`] / [`WriteableTransaction`] expose point reads,
//!   writes, compare-and-apply updates and cursors over trees
//! - [`Cursor`] is a forward positioning cursor with delete-during-iteration
//! - [`Storage`] hands out read and write transactions
//!
//! ## Available Engines
//!
//! - [`TreeStorage`] - snapshot-isolated copy-on-write trees, optionally
//!   journaled to a [`StorageBackend`] byte store
//!
//! ## Byte Stores
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use dirdb_storage::{ReadableTransaction, Storage, StorageError, TreeName, TreeStorage, WriteableTransaction};
//!
//! let storage = TreeStorage::in_memory();
//! let tree = TreeName::new("dc=example,dc=com", "dn2id");
//!
//! storage
//!     .write(|txn| -> Result<(), StorageError> {
//!         txn.open_tree(&tree, true)?;
//!         txn.put(&tree, b"key", b"value")
//!     })
//!     .unwrap();
//!
//! let value = storage
//!     .read(|txn| -> Result<_, StorageError> { txn.read(&tree, b"key") })
//!     .unwrap();
//! assert_eq!(value.as_deref(), Some(&b"value"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod cursor;
mod engine;
mod error;
mod file;
mod journal;
mod memory;
mod transaction;
mod tree;

pub use backend::StorageBackend;
pub use cursor::{Cursor, CursorState};
pub use engine::{ReadTxn, TreeStorage, WriteTxn};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use transaction::{ReadableTransaction, Storage, WriteableTransaction};
pub use tree::TreeName;
