//! # dirdb Core
//!
//! Storage and indexing engine of an LDAP directory backend.
//!
//! This crate provides:
//! - [`DnKeyFormat`] - order-preserving byte keys for distinguished names
//! - [`EntryIdSet`] with the V1 and V2 [`EntryIdSetCodec`]s
//! - [`Dn2Id`], [`Id2Entry`] and the sharded [`Id2ChildrenCount`] trees
//! - [`DefaultIndex`] and [`AttributeIndex`] with entry-limit cutover and
//!   TRUSTED/COMPACTED [`IndexFlags`]
//! - [`EntryContainer`], which keeps all trees of one base DN consistent
//! - the on-disk merge [`import`]er, [`rebuild`] and [`verify`]
//!
//! Every tree lives in a [`dirdb_storage::Storage`] engine and is accessed
//! through its read and write transactions.
//!
//! ## Example
//!
//! ```rust
//! use dirdb_core::{BackendConfig, Dn, Entry, EntryContainer, IndexDefinition, IndexType};
//! use dirdb_storage::TreeStorage;
//!
//! let config = BackendConfig::new("dc=example,dc=com")
//!     .with_index(IndexDefinition::new("cn", &[IndexType::Equality]));
//! let container = EntryContainer::open(TreeStorage::in_memory(), config).unwrap();
//!
//! container.add_entry(Entry::new("dc=example,dc=com")).unwrap();
//! let id = container
//!     .add_entry(Entry::new("cn=John,dc=example,dc=com").with_attribute("cn", ["John"]))
//!     .unwrap();
//!
//! let hits = container.index_candidates("cn", IndexType::Equality, "john").unwrap();
//! assert_eq!(hits.ids(), [id]);
//! let base = Dn::parse("dc=example,dc=com").unwrap();
//! assert_eq!(container.num_children(&base).unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod children_count;
mod config;
mod container;
mod dn;
mod dn2id;
mod entry;
mod error;
mod id_set;
pub mod import;
mod index;
mod packed;
mod rebuild;
mod state;
mod types;
mod verify;

pub use cancel::Cancellation;
pub use children_count::Id2ChildrenCount;
pub use config::{
    BackendConfig, BufferKind, ImportConfig, IndexDefinition, IndexType,
    DEFAULT_INDEX_ENTRY_LIMIT, DEFAULT_SUBSTRING_LENGTH,
};
pub use container::EntryContainer;
pub use dn::{normalize_value, Ava, Dn, DnKeyFormat, Rdn};
pub use dn2id::{Dn2Id, Dn2IdCursor};
pub use entry::{Entry, Id2Entry, Id2EntryCursor};
pub use error::{CoreError, CoreResult};
pub use id_set::{EntryIdSet, EntryIdSetCodec};
pub use import::{ImportReport, Importer};
pub use index::{AttributeIndex, DefaultIndex, IndexBuffer};
pub use rebuild::{rebuild, RebuildMode, RebuildReport, CHILDREN_COUNT_INDEX, DN2ID_INDEX};
pub use state::{IndexFlags, State};
pub use types::EntryId;
pub use verify::{verify, VerifyReport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
