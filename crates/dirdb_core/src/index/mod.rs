//! Attribute indexes.
//!
//! A [`DefaultIndex`] maps byte keys to [`EntryIdSet`](crate::EntryIdSet)s in
//! one tree. An [`AttributeIndex`] owns the presence, equality and substring
//! default indexes of one attribute and turns entries into index keys.
//! [`IndexBuffer`] batches the per-key changes of one write transaction.

mod attribute;
mod buffer;
mod default_index;

pub use attribute::AttributeIndex;
pub use buffer::IndexBuffer;
pub use default_index::DefaultIndex;
