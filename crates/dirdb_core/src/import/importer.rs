//! Bulk load of an entry stream into an empty container.
//!
//! Phase one assigns IDs, writes `id2entry` and feeds one external-sort
//! chunk per target tree: DN keys into the `dn2id` chunk, per-batch ID sets
//! into one chunk per attribute index tree. Key generation for a batch runs
//! on the worker pool.
//!
//! Phase two drains the chunks in key order. The `dn2id` copy checks that
//! each DN's parent was imported before it, which the depth-first key order
//! makes a stack walk, and emits one `+1` per child into a children-count
//! chunk. Attribute index chunks are copied in parallel.
//!
//! ## Invariants
//!
//! - every index tree stays untrusted until its copy finished
//! - a duplicate DN or a missing parent aborts the import

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dirdb_storage::{Storage, WriteableTransaction};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use tracing::{debug, info};

use crate::cancel::Cancellation;
use crate::config::ImportConfig;
use crate::container::EntryContainer;
use crate::dn::DnKeyFormat;
use crate::dn2id::Dn2Id;
use crate::entry::Entry;
use crate::error::{CoreError, CoreResult};
use crate::id_set::{EntryIdSet, EntryIdSetCodec};
use crate::import::buffer::BufferPool;
use crate::import::chunk::Chunk;
use crate::import::collector::{
    Collector, CountCollector, EntryIdSetsCollector, UniqueValueCollector,
};
use crate::import::cursor::{CollectorCursor, MeteredCursor};
use crate::import::external::ExternalSortChunk;
use crate::index::{AttributeIndex, DefaultIndex};
use crate::state::IndexFlags;
use crate::types::EntryId;

/// Outcome of a bulk import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Entries written to `id2entry`.
    pub entries: u64,
    /// Records written to `dn2id`.
    pub dn_keys: u64,
    /// Records written to attribute index trees.
    pub index_keys: u64,
    /// Index keys stored undefined because they passed the entry limit.
    pub entry_limit_exceeded: u64,
    /// Wall time of the whole import.
    pub elapsed: Duration,
}

/// Buffers, temp directory and worker pool shared by the chunks of one job.
pub(crate) struct Pipeline {
    pool: BufferPool,
    workers: Arc<ThreadPool>,
    temp_dir: PathBuf,
    batch_size: usize,
}

impl Pipeline {
    /// Sets up a pipeline able to keep `chunks` chunks open at once.
    pub(crate) fn new(config: &ImportConfig, chunks: usize) -> CoreResult<Self> {
        config.validate()?;
        let buffer_count = config.buffer_count.max(chunks + config.threads);
        if buffer_count > config.buffer_count {
            debug!(
                configured = config.buffer_count,
                buffer_count, chunks, "raised buffer count to cover open chunks"
            );
        }
        let pool = BufferPool::new(
            config.buffer_size,
            buffer_count,
            config.buffer_kind,
            config.buffer_timeout(),
        )?;
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("dirdb-import-{i}"))
            .build()
            .map_err(|err| {
                CoreError::invalid_operation(format!("cannot start import workers: {err}"))
            })?;
        std::fs::create_dir_all(&config.temp_dir)?;
        Ok(Self {
            pool,
            workers: Arc::new(workers),
            temp_dir: config.temp_dir.clone(),
            batch_size: config.batch_size,
        })
    }

    pub(crate) fn chunk(&self, name: impl Into<String>) -> Box<dyn Chunk> {
        Box::new(ExternalSortChunk::new(
            name,
            self.pool.clone(),
            Arc::clone(&self.workers),
            self.temp_dir.clone(),
        ))
    }

    /// Runs `op` on the worker pool.
    ///
    /// `op` must not flip chunks: a flip blocks on spills queued on the same
    /// pool.
    pub(crate) fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.workers.install(op)
    }

    pub(crate) const fn batch_size(&self) -> usize {
        self.batch_size
    }
}

/// Writes the merged records of `records` in transactions of `batch_size`
/// records. Returns the number of records written.
pub(crate) fn write_batches<S, C, F>(
    storage: &S,
    records: &mut CollectorCursor<C>,
    batch_size: usize,
    cancel: &Cancellation,
    mut write: F,
) -> CoreResult<u64>
where
    S: Storage,
    C: Collector,
    F: FnMut(&mut dyn WriteableTransaction, Vec<u8>, C::Output) -> CoreResult<()>,
{
    let mut written = 0u64;
    loop {
        cancel.check()?;
        let mut batch = Vec::with_capacity(batch_size);
        while batch.len() < batch_size {
            match records.next_record()? {
                Some(record) => batch.push(record),
                None => break,
            }
        }
        if batch.is_empty() {
            return Ok(written);
        }
        let len = batch.len() as u64;
        storage.write(|txn| -> CoreResult<()> {
            for (key, value) in batch {
                write(&mut *txn, key, value)?;
            }
            Ok(())
        })?;
        written += len;
    }
}

/// Keys and cutovers written by one index copy.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CopyStats {
    pub(crate) keys: u64,
    pub(crate) exceeded: u64,
}

/// Copies merged ID sets into `index`.
pub(crate) fn copy_index<S, C>(
    storage: &S,
    index: &DefaultIndex,
    source: Box<dyn MeteredCursor>,
    collector: C,
    batch_size: usize,
    cancel: &Cancellation,
) -> CoreResult<CopyStats>
where
    S: Storage,
    C: Collector<Output = EntryIdSet>,
{
    let total_bytes = source.total_bytes();
    let mut records = CollectorCursor::new(source, collector);
    let mut exceeded = 0u64;
    let keys = write_batches(storage, &mut records, batch_size, cancel, |txn, key, set| {
        if !set.is_defined() || index.exceeds_limit(&set) {
            exceeded += 1;
        }
        index.import_put(txn, &key, &set)
    })?;
    debug!(tree = %index.tree(), keys, exceeded, bytes = total_bytes, "copied index");
    Ok(CopyStats { keys, exceeded })
}

/// Entry with its ID and every key derived from it.
struct PreparedEntry {
    id: EntryId,
    dn_key: Vec<u8>,
    entry: Entry,
    /// One key set per attribute index tree, in container order.
    index_keys: Vec<BTreeSet<Vec<u8>>>,
}

/// Bulk importer for one [`EntryContainer`].
pub struct Importer<'c, S: Storage> {
    container: &'c EntryContainer<S>,
    config: ImportConfig,
    cancel: Cancellation,
}

impl<'c, S: Storage> Importer<'c, S> {
    /// Creates an importer.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for an unusable configuration.
    pub fn new(container: &'c EntryContainer<S>, config: ImportConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            container,
            config,
            cancel: Cancellation::new(),
        })
    }

    /// Uses `cancel` to stop the import between batches.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replaces the content of the container with `entries`.
    ///
    /// Entries may come in any order. Every entry below the base needs its
    /// parent in the same stream.
    ///
    /// # Errors
    ///
    /// - the first error yielded by `entries`
    /// - [`CoreError::InvalidDn`] for a DN outside the base
    /// - [`CoreError::UniquenessViolation`] for a duplicate DN
    /// - [`CoreError::NoSuchParent`] for an entry whose parent is missing
    /// - [`CoreError::Cancelled`], buffer, I/O and storage failures
    pub fn import<I>(&self, entries: I) -> CoreResult<ImportReport>
    where
        I: IntoIterator<Item = CoreResult<Entry>>,
    {
        let started = Instant::now();
        let trees: Vec<&DefaultIndex> = self.container.attribute_trees().collect();
        let pipeline = Pipeline::new(&self.config, trees.len() + 2)?;
        info!(base = %self.container.base(), indexes = trees.len(), "starting import");

        self.container.clear()?;
        self.prepare_flags(&trees)?;

        // Phase one.
        let mut dn_chunk = pipeline.chunk(self.container.dn2id().tree().to_string());
        let mut index_chunks: Vec<Box<dyn Chunk>> = trees
            .iter()
            .map(|index| pipeline.chunk(index.tree().to_string()))
            .collect();
        let mut report = ImportReport::default();
        let mut batch = Vec::with_capacity(pipeline.batch_size());
        for entry in entries {
            batch.push(entry?);
            if batch.len() == pipeline.batch_size() {
                let full = std::mem::take(&mut batch);
                report.entries +=
                    self.import_batch(&pipeline, full, dn_chunk.as_mut(), &mut index_chunks)?;
            }
        }
        if !batch.is_empty() {
            report.entries +=
                self.import_batch(&pipeline, batch, dn_chunk.as_mut(), &mut index_chunks)?;
        }
        info!(entries = report.entries, "import phase one done");

        // Phase two.
        let (dn_keys, counts_chunk) =
            copy_dn2id(self.container, &pipeline, dn_chunk.flip()?, &self.cancel)?;
        report.dn_keys = dn_keys;
        let total = dn_keys.saturating_sub(1);
        copy_counts(self.container, &pipeline, counts_chunk.flip()?, total, &self.cancel)?;

        let mut sources = Vec::with_capacity(index_chunks.len());
        for chunk in index_chunks {
            sources.push(chunk.flip()?);
        }
        let storage = self.container.storage();
        let cancel = &self.cancel;
        let batch_size = pipeline.batch_size();
        let stats = pipeline.install(|| {
            trees
                .par_iter()
                .zip(sources.into_par_iter())
                .map(|(index, source)| {
                    let collector = EntryIdSetsCollector::new(index.entry_limit());
                    copy_index(storage, index, source, collector, batch_size, cancel)
                })
                .collect::<CoreResult<Vec<CopyStats>>>()
        })?;
        for stat in stats {
            report.index_keys += stat.keys;
            report.entry_limit_exceeded += stat.exceeded;
        }

        storage.write(|txn| -> CoreResult<()> {
            for index in &trees {
                index.set_trusted(txn, true)?;
            }
            Ok(())
        })?;
        report.elapsed = started.elapsed();
        info!(
            entries = report.entries,
            dn_keys = report.dn_keys,
            index_keys = report.index_keys,
            entry_limit_exceeded = report.entry_limit_exceeded,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "import done"
        );
        Ok(report)
    }

    fn prepare_flags(&self, trees: &[&DefaultIndex]) -> CoreResult<()> {
        let flags = if self.container.config().compact_encoding {
            IndexFlags::COMPACTED
        } else {
            IndexFlags::NONE
        };
        let state = self.container.state();
        self.container.storage().write(|txn| -> CoreResult<()> {
            for index in trees {
                state.set_flags(txn, index.tree(), flags)?;
            }
            Ok(())
        })
    }

    fn import_batch(
        &self,
        pipeline: &Pipeline,
        batch: Vec<Entry>,
        dn_chunk: &mut dyn Chunk,
        index_chunks: &mut [Box<dyn Chunk>],
    ) -> CoreResult<u64> {
        self.cancel.check()?;
        let count = batch.len() as u64;
        let first = self.container.reserve_ids(count);
        let dn2id = self.container.dn2id();
        let attributes = self.container.attribute_indexes();
        let prepared = pipeline.install(|| {
            batch
                .into_par_iter()
                .enumerate()
                .map(|(offset, entry)| {
                    let id = EntryId::new(first.as_u64() + offset as u64);
                    prepare_entry(dn2id, attributes, id, entry)
                })
                .collect::<CoreResult<Vec<PreparedEntry>>>()
        })?;

        let id2entry = self.container.id2entry();
        self.container.storage().write(|txn| -> CoreResult<()> {
            for entry in &prepared {
                id2entry.put(txn, entry.id, &entry.entry)?;
            }
            Ok(())
        })?;

        let mut per_tree: Vec<BTreeMap<&[u8], EntryIdSet>> =
            vec![BTreeMap::new(); index_chunks.len()];
        for entry in &prepared {
            dn_chunk.put(&entry.dn_key, &entry.id.to_key())?;
            for (sets, keys) in per_tree.iter_mut().zip(&entry.index_keys) {
                for key in keys {
                    sets.entry(key.as_slice()).or_default().add(entry.id);
                }
            }
        }
        for (chunk, sets) in index_chunks.iter_mut().zip(per_tree) {
            for (key, set) in sets {
                chunk.put(key, &EntryIdSetCodec::V2.encode(&set)?)?;
            }
        }
        debug!(first = %first, count, "imported batch");
        Ok(count)
    }
}

/// Copies sorted `(dn key, id)` records into `dn2id`, checking that every
/// DN's parent came before it.
///
/// Returns the number of keys written and a chunk holding one `+1` count
/// delta per child, keyed by parent ID.
pub(crate) fn copy_dn2id<S: Storage>(
    container: &EntryContainer<S>,
    pipeline: &Pipeline,
    source: Box<dyn MeteredCursor>,
    cancel: &Cancellation,
) -> CoreResult<(u64, Box<dyn Chunk>)> {
    let dn2id = container.dn2id();
    let mut counts = pipeline.chunk(container.children_count().tree().to_string());
    let mut records = CollectorCursor::new(source, UniqueValueCollector);
    // Entries enclosing the current key, outermost first.
    let mut ancestors: Vec<(Vec<u8>, EntryId)> = Vec::new();
    let one = 1i64.to_be_bytes();

    let written = write_batches(
        container.storage(),
        &mut records,
        pipeline.batch_size(),
        cancel,
        |txn, key, value| {
            let id = EntryId::from_key(&value)?;
            if !key.is_empty() {
                while ancestors
                    .last()
                    .is_some_and(|(top, _)| !DnKeyFormat::is_in_subtree(top, &key))
                {
                    ancestors.pop();
                }
                let parent_len = DnKeyFormat::find_parent_key_length(&key);
                match ancestors.last() {
                    Some((parent, parent_id)) if Some(parent.len()) == parent_len => {
                        counts.put(&parent_id.to_key(), &one)?;
                    }
                    _ => {
                        let dn = dn2id
                            .decode_key(&key)
                            .map_or_else(|_| format!("{key:02x?}"), |dn| dn.to_string());
                        return Err(CoreError::NoSuchParent { dn });
                    }
                }
            }
            dn2id.put_key(txn, &key, id)?;
            ancestors.push((key, id));
            Ok(())
        },
    )?;
    debug!(keys = written, "copied dn2id");
    Ok((written, counts))
}

/// Copies summed count deltas into `id2childrencount` and stores `total` as
/// the total count.
pub(crate) fn copy_counts<S: Storage>(
    container: &EntryContainer<S>,
    pipeline: &Pipeline,
    source: Box<dyn MeteredCursor>,
    total: u64,
    cancel: &Cancellation,
) -> CoreResult<()> {
    let children = container.children_count();
    let mut records = CollectorCursor::new(source, CountCollector);
    let parents = write_batches(
        container.storage(),
        &mut records,
        pipeline.batch_size(),
        cancel,
        |txn, key, count| children.import_put_count(txn, EntryId::from_key(&key)?, count),
    )?;
    let total = i64::try_from(total)
        .map_err(|_| CoreError::invalid_operation("entry count overflows the total counter"))?;
    container
        .storage()
        .write(|txn| children.import_put_total_count(txn, total))?;
    debug!(parents, total, "copied children counts");
    Ok(())
}

fn prepare_entry(
    dn2id: &Dn2Id,
    attributes: &[AttributeIndex],
    id: EntryId,
    entry: Entry,
) -> CoreResult<PreparedEntry> {
    let entry = entry.normalized();
    let dn_key = dn2id.key(&entry.parsed_dn()?)?;
    let index_keys = attributes
        .iter()
        .flat_map(|attribute| attribute.entry_keys(&entry))
        .map(|(_, keys)| keys)
        .collect();
    Ok(PreparedEntry {
        id,
        dn_key,
        entry,
        index_keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, BufferKind, IndexDefinition, IndexType};
    use crate::dn::Dn;
    use dirdb_storage::TreeStorage;

    fn container(limit: u32) -> EntryContainer<TreeStorage> {
        let config = BackendConfig::new("dc=example,dc=com")
            .index_entry_limit(limit)
            .with_index(IndexDefinition::new("cn", &[IndexType::Equality, IndexType::Presence]))
            .with_index(IndexDefinition::new("objectclass", &[IndexType::Equality]));
        EntryContainer::open(TreeStorage::in_memory(), config).unwrap()
    }

    fn import_config(dir: &tempfile::TempDir) -> ImportConfig {
        ImportConfig::new()
            .buffer_size(256)
            .buffer_count(4)
            .buffer_kind(BufferKind::Heap)
            .threads(2)
            .batch_size(7)
            .temp_dir(dir.path())
    }

    fn person(dn: &str, cn: &str) -> CoreResult<Entry> {
        Ok(Entry::new(dn)
            .with_attribute("cn", [cn])
            .with_attribute("objectClass", ["person"]))
    }

    fn tree(people: usize) -> Vec<CoreResult<Entry>> {
        let mut entries = vec![
            Ok(Entry::new("dc=example,dc=com").with_attribute("objectClass", ["domain"])),
            Ok(Entry::new("ou=people,dc=example,dc=com")
                .with_attribute("objectClass", ["organizationalUnit"])),
        ];
        for i in 0..people {
            let dn = format!("cn=user{i},ou=people,dc=example,dc=com");
            entries.push(person(&dn, &format!("User {i}")));
        }
        entries.reverse();
        entries
    }

    #[test]
    fn imports_entries_counts_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let container = container(0);
        let report = Importer::new(&container, import_config(&dir))
            .unwrap()
            .import(tree(40))
            .unwrap();

        assert_eq!(report.entries, 42);
        assert_eq!(report.dn_keys, 42);
        assert_eq!(report.entry_limit_exceeded, 0);

        let people = Dn::parse("ou=people,dc=example,dc=com").unwrap();
        assert_eq!(container.num_children(&people).unwrap(), 40);
        assert_eq!(container.entry_count().unwrap(), 42);
        let base = Dn::parse("dc=example,dc=com").unwrap();
        assert_eq!(container.num_subordinates(&base).unwrap(), 41);
        let user = Dn::parse("cn=user7,ou=people,dc=example,dc=com").unwrap();
        let id = container.get_entry_id(&user).unwrap().unwrap();
        assert_eq!(container.get_entry_by_id(id).unwrap().unwrap().values("cn"), ["User 7"]);

        let hits = container.index_candidates("cn", IndexType::Equality, "USER 7").unwrap();
        assert_eq!(hits.ids(), [id]);
        let persons = container
            .index_candidates("objectClass", IndexType::Equality, "person")
            .unwrap();
        assert_eq!(persons.size(), 40);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn entry_limit_makes_keys_undefined() {
        let dir = tempfile::tempdir().unwrap();
        let container = container(10);
        let report = Importer::new(&container, import_config(&dir))
            .unwrap()
            .import(tree(20))
            .unwrap();
        assert!(report.entry_limit_exceeded >= 2);
        let persons = container
            .index_candidates("objectclass", IndexType::Equality, "person")
            .unwrap();
        assert!(!persons.is_defined());
    }

    #[test]
    fn missing_parent_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let container = container(0);
        let entries = vec![
            Ok(Entry::new("dc=example,dc=com")),
            person("cn=lost,ou=nowhere,dc=example,dc=com", "lost"),
        ];
        let err = Importer::new(&container, import_config(&dir))
            .unwrap()
            .import(entries)
            .unwrap_err();
        assert!(matches!(err, CoreError::NoSuchParent { dn } if dn.starts_with("cn=lost")));
    }

    #[test]
    fn duplicate_dn_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let container = container(0);
        let entries = vec![
            Ok(Entry::new("dc=example,dc=com")),
            person("cn=twin,dc=example,dc=com", "a"),
            person("CN=Twin,dc=example,dc=com", "b"),
        ];
        let err = Importer::new(&container, import_config(&dir))
            .unwrap()
            .import(entries)
            .unwrap_err();
        assert!(matches!(err, CoreError::UniquenessViolation { .. }));
    }

    #[test]
    fn cancelled_import_stops() {
        let dir = tempfile::tempdir().unwrap();
        let container = container(0);
        let cancel = Cancellation::new();
        cancel.cancel();
        let err = Importer::new(&container, import_config(&dir))
            .unwrap()
            .with_cancellation(cancel)
            .import(tree(3))
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
    }

    #[test]
    fn import_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let container = container(0);
        container
            .add_entry(Entry::new("dc=example,dc=com"))
            .unwrap();
        container
            .add_entry(Entry::new("ou=old,dc=example,dc=com"))
            .unwrap();
        Importer::new(&container, import_config(&dir))
            .unwrap()
            .import(tree(2))
            .unwrap();
        let old = Dn::parse("ou=old,dc=example,dc=com").unwrap();
        assert!(container.get_entry_id(&old).unwrap().is_none());
        assert_eq!(container.entry_count().unwrap(), 4);
    }
}
