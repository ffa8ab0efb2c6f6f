//! On-disk merge importer.
//!
//! Records flow from producers into [`Chunk`]s, which sort them in pooled
//! buffers and spill sorted runs to [`FileRegion`]s when memory runs out.
//! A flipped chunk is a [`MeteredCursor`] in unsigned key order; a
//! [`CollectorCursor`] folds runs of equal keys with a [`Collector`] before
//! the result is copied into its tree. [`Importer`] drives the whole bulk
//! load of an entry container.

mod buffer;
mod chunk;
mod collector;
mod cursor;
mod external;
mod importer;
mod region;

pub use buffer::{off_heap_supported, Buffer, BufferPool, HeapBuffer, OffHeapBuffer, PooledBuffer};
pub use chunk::{
    read_record, record_len, write_record, Chunk, InMemoryCursor, InMemorySortedChunk, NullChunk,
    RecordSlot,
};
pub use collector::{
    Collector, CountCollector, EntryIdSetsCollector, EntryIdsCollector, IdSets,
    UniqueValueCollector,
};
pub use cursor::{CollectorCursor, CompositeCursor, EmptyCursor, MeteredCursor, VecCursor};
pub use external::ExternalSortChunk;
pub use importer::{ImportReport, Importer};
pub use region::{FileRegion, RegionCursor, RegionData};

pub(crate) use importer::{copy_counts, copy_dn2id, copy_index, CopyStats, Pipeline};
