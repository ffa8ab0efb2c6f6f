//! End-to-end scenarios across the sort, import, rebuild and verify paths.
//!
//! Each helper drives one pipeline and returns what it produced; the tests
//! below pin the expected results.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dirdb_core::import::{
    BufferPool, Chunk, Collector, CollectorCursor, ExternalSortChunk, InMemorySortedChunk,
    MeteredCursor,
};
use dirdb_core::{
    BufferKind, CoreError, CoreResult, Dn, Entry, EntryContainer, EntryId, ImportConfig,
    ImportReport, Importer, IndexType,
};
use dirdb_storage::{Storage, TreeStorage};
use rayon::ThreadPoolBuilder;

/// Collects every value of a key, sorts them and joins them with `-`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatCollector;

impl Collector for ConcatCollector {
    type State = Vec<Vec<u8>>;
    type Output = Vec<u8>;

    fn get(&self) -> Self::State {
        Vec::new()
    }

    fn accept(&self, mut state: Self::State, _key: &[u8], value: &[u8]) -> CoreResult<Self::State> {
        state.push(value.to_vec());
        Ok(state)
    }

    fn merge(&self, _key: &[u8], mut state: Self::State) -> CoreResult<Self::Output> {
        state.sort();
        Ok(state.join(&b"-"[..]))
    }
}

/// Result of an external merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome<T> {
    /// Merged records in key order.
    pub records: Vec<(Vec<u8>, T)>,
    /// Sorted runs written to disk before the flip.
    pub spills: usize,
}

/// Pushes `records` through an external-sort chunk with buffers of
/// `buffer_size` bytes and folds the sorted stream with `collector`.
pub fn external_merge<C: Collector>(
    records: &[(&[u8], &[u8])],
    collector: C,
    buffer_size: usize,
    temp_dir: &Path,
) -> CoreResult<MergeOutcome<C::Output>> {
    let pool = BufferPool::new(buffer_size, 2, BufferKind::Heap, Duration::from_secs(10))?;
    let sorter = ThreadPoolBuilder::new()
        .num_threads(2)
        .build()
        .map_err(|err| CoreError::invalid_operation(err.to_string()))?;
    let mut chunk = Box::new(ExternalSortChunk::new(
        "scenario",
        pool,
        Arc::new(sorter),
        temp_dir,
    ));
    for (key, value) in records {
        chunk.put(key, value)?;
    }
    let spills = chunk.spill_count();
    let records = CollectorCursor::new(chunk.flip()?, collector).collect::<CoreResult<Vec<_>>>()?;
    Ok(MergeOutcome { records, spills })
}

/// Keys of `keys` in the order an in-memory chunk sorts them.
pub fn sorted_chunk_keys(keys: &[&[u8]]) -> CoreResult<Vec<Vec<u8>>> {
    let pool = BufferPool::new(4096, 1, BufferKind::Heap, Duration::from_secs(1))?;
    let mut chunk = InMemorySortedChunk::new("keys", pool.acquire()?);
    for key in keys {
        chunk.put(key, b"")?;
    }
    chunk.sort();
    let mut cursor = chunk.into_cursor();
    let mut sorted = Vec::with_capacity(keys.len());
    while cursor.next()? {
        sorted.push(cursor.key().to_vec());
    }
    Ok(sorted)
}

/// Bulk-loads `entries` into `container`.
pub fn import_entries<S: Storage>(
    container: &EntryContainer<S>,
    config: ImportConfig,
    entries: Vec<Entry>,
) -> CoreResult<ImportReport> {
    Importer::new(container, config)?.import(entries.into_iter().map(Ok))
}

/// Empties one attribute index and marks it untrusted, as an interrupted
/// index change would leave it.
pub fn damage_index<S: Storage>(
    container: &EntryContainer<S>,
    attribute: &str,
    ty: IndexType,
) -> CoreResult<()> {
    let index = container
        .attribute_index(attribute)
        .and_then(|attribute| attribute.index(ty))
        .ok_or_else(|| CoreError::invalid_operation(format!("no {} index on {attribute}", ty.as_str())))?;
    container.storage().write(|txn| -> CoreResult<()> {
        index.clear(txn)?;
        index.set_trusted(txn, false)
    })
}

/// Subordinates of `dn` in cursor order, as DNs.
pub fn subordinate_dns(container: &EntryContainer<TreeStorage>, dn: &str) -> CoreResult<Vec<Dn>> {
    let dn = Dn::parse(dn)?;
    Ok(container
        .subordinates(&dn)?
        .into_iter()
        .map(|(dn, _)| dn)
        .collect())
}

/// Adds `count` people sharing one `objectClass` value below `parent` and
/// returns their IDs.
pub fn add_people<S: Storage>(
    container: &EntryContainer<S>,
    parent: &str,
    count: usize,
) -> CoreResult<Vec<EntryId>> {
    (0..count)
        .map(|n| {
            container.add_entry(
                Entry::new(format!("cn=member{n},{parent}"))
                    .with_attribute("objectClass", ["person"])
                    .with_attribute("cn", [format!("member{n}")]),
            )
        })
        .collect()
}
