//! Index rebuild from `id2entry`.
//!
//! Selected trees are marked untrusted and emptied, every stored entry is
//! streamed through the merge importer and the merged results are copied
//! back. Attribute indexes collect raw entry IDs with an
//! [`EntryIdsCollector`]; `dn2id` and `id2childrencount` are rebuilt together
//! from the entry DNs.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

use dirdb_storage::Storage;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::cancel::Cancellation;
use crate::config::ImportConfig;
use crate::container::EntryContainer;
use crate::entry::Entry;
use crate::error::{CoreError, CoreResult};
use crate::import::{
    copy_counts, copy_dn2id, copy_index, Chunk, CopyStats, EntryIdsCollector, NullChunk, Pipeline,
};
use crate::index::DefaultIndex;
use crate::state::IndexFlags;
use crate::types::EntryId;

/// Name accepted for the DN tree.
pub const DN2ID_INDEX: &str = "dn2id";

/// Name accepted for the children-count tree.
pub const CHILDREN_COUNT_INDEX: &str = "id2childrencount";

/// Which trees to rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildMode {
    /// Every attribute index plus `dn2id` and `id2childrencount`.
    All,
    /// Attribute indexes that are not TRUSTED.
    Degraded,
    /// Trees named by index id (`cn.equality`), attribute (`cn`),
    /// [`DN2ID_INDEX`] or [`CHILDREN_COUNT_INDEX`].
    Named(Vec<String>),
}

impl fmt::Display for RebuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Degraded => write!(f, "degraded"),
            Self::Named(names) => write!(f, "{}", names.join(",")),
        }
    }
}

/// Outcome of a rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    /// Index ids of the rebuilt trees.
    pub rebuilt: Vec<String>,
    /// Entries read from `id2entry`.
    pub entries: u64,
    /// Records written to the rebuilt trees.
    pub keys: u64,
    /// Attribute index keys stored undefined because they passed the limit.
    pub entry_limit_exceeded: u64,
    /// Wall time of the rebuild.
    pub elapsed: Duration,
}

/// Trees selected by name.
pub(crate) struct Targets<'a> {
    /// Attribute index trees, in container order.
    pub(crate) indexes: Vec<&'a DefaultIndex>,
    /// `dn2id` together with `id2childrencount`.
    pub(crate) system: bool,
}

/// Rebuilds the trees selected by `mode`.
///
/// # Errors
///
/// - [`CoreError::InvalidOperation`] for a name that matches no tree
/// - [`CoreError::Cancelled`] if `cancel` fires between batches
/// - storage, buffer and I/O failures
pub fn rebuild<S: Storage>(
    container: &EntryContainer<S>,
    mode: &RebuildMode,
    config: &ImportConfig,
    cancel: &Cancellation,
) -> CoreResult<RebuildReport> {
    let started = Instant::now();
    let targets = select(container, mode)?;
    let mut report = RebuildReport::default();
    if targets.system {
        report.rebuilt.push(DN2ID_INDEX.to_string());
        report.rebuilt.push(CHILDREN_COUNT_INDEX.to_string());
    }
    report
        .rebuilt
        .extend(targets.indexes.iter().map(|index| index.tree().index_id().to_string()));
    if report.rebuilt.is_empty() {
        info!(base = %container.base(), %mode, "nothing to rebuild");
        return Ok(report);
    }
    info!(base = %container.base(), %mode, trees = ?report.rebuilt, "starting rebuild");

    reset(container, &targets)?;

    let all: Vec<&DefaultIndex> = container.attribute_trees().collect();
    let selected: BTreeSet<_> = targets.indexes.iter().map(|index| index.tree()).collect();
    let pipeline = Pipeline::new(config, targets.indexes.len() + 2)?;
    let mut index_chunks: Vec<Box<dyn Chunk>> = all
        .iter()
        .map(|index| -> Box<dyn Chunk> {
            let name = index.tree().to_string();
            if selected.contains(index.tree()) {
                pipeline.chunk(name)
            } else {
                Box::new(NullChunk::new(name))
            }
        })
        .collect();
    let mut dn_chunk: Box<dyn Chunk> = if targets.system {
        pipeline.chunk(container.dn2id().tree().to_string())
    } else {
        Box::new(NullChunk::new(container.dn2id().tree().to_string()))
    };

    report.entries = container.storage().read(|txn| -> CoreResult<u64> {
        let mut read = 0u64;
        let mut batch = Vec::with_capacity(pipeline.batch_size());
        let mut entries = container.id2entry().iter_from(txn, EntryId::new(1))?;
        loop {
            let next = entries.next().transpose()?;
            let done = next.is_none();
            batch.extend(next);
            if batch.len() == pipeline.batch_size() || (done && !batch.is_empty()) {
                cancel.check()?;
                read += batch.len() as u64;
                let full = std::mem::take(&mut batch);
                let dn_chunk = dn_chunk.as_mut();
                feed(container, &pipeline, full, targets.system, dn_chunk, &mut index_chunks)?;
            }
            if done {
                return Ok(read);
            }
        }
    })?;
    debug!(entries = report.entries, "rebuild scan done");

    if targets.system {
        let (keys, counts) = copy_dn2id(container, &pipeline, dn_chunk.flip()?, cancel)?;
        copy_counts(container, &pipeline, counts.flip()?, keys.saturating_sub(1), cancel)?;
        report.keys += keys;
    }

    let mut jobs = Vec::with_capacity(targets.indexes.len());
    for (index, chunk) in all.iter().zip(index_chunks) {
        let source = chunk.flip()?;
        if selected.contains(index.tree()) {
            jobs.push((*index, source));
        }
    }
    let storage = container.storage();
    let batch_size = pipeline.batch_size();
    let stats = pipeline.install(|| {
        jobs.into_par_iter()
            .map(|(index, source)| {
                let collector = EntryIdsCollector::new(index.entry_limit());
                copy_index(storage, index, source, collector, batch_size, cancel)
            })
            .collect::<CoreResult<Vec<CopyStats>>>()
    })?;
    for stat in stats {
        report.keys += stat.keys;
        report.entry_limit_exceeded += stat.exceeded;
    }

    storage.write(|txn| -> CoreResult<()> {
        for index in &targets.indexes {
            index.set_trusted(txn, true)?;
        }
        Ok(())
    })?;
    report.elapsed = started.elapsed();
    info!(
        entries = report.entries,
        keys = report.keys,
        entry_limit_exceeded = report.entry_limit_exceeded,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "rebuild done"
    );
    Ok(report)
}

fn select<'a, S: Storage>(
    container: &'a EntryContainer<S>,
    mode: &RebuildMode,
) -> CoreResult<Targets<'a>> {
    match mode {
        RebuildMode::All => Ok(Targets {
            indexes: container.attribute_trees().collect(),
            system: true,
        }),
        RebuildMode::Degraded => {
            let indexes = container.storage().read(|txn| -> CoreResult<Vec<&DefaultIndex>> {
                let mut degraded = Vec::new();
                for index in container.attribute_trees() {
                    if !index.is_trusted(txn)? {
                        degraded.push(index);
                    }
                }
                Ok(degraded)
            })?;
            Ok(Targets {
                indexes,
                system: false,
            })
        }
        RebuildMode::Named(names) => named_targets(container, names),
    }
}

/// Resolves index ids, attribute names, [`DN2ID_INDEX`] and
/// [`CHILDREN_COUNT_INDEX`] to trees, case-insensitively.
pub(crate) fn named_targets<'a, S: Storage>(
    container: &'a EntryContainer<S>,
    names: &[String],
) -> CoreResult<Targets<'a>> {
    let mut targets = Targets {
        indexes: Vec::new(),
        system: false,
    };
    for name in names {
        let name = name.to_ascii_lowercase();
        if name == DN2ID_INDEX || name == CHILDREN_COUNT_INDEX {
            targets.system = true;
            continue;
        }
        let mut matched = false;
        for index in container.attribute_trees() {
            let id = index.tree().index_id();
            if id != name && id.split('.').next() != Some(name.as_str()) {
                continue;
            }
            matched = true;
            if !targets.indexes.iter().any(|t| t.tree() == index.tree()) {
                targets.indexes.push(index);
            }
        }
        if !matched {
            return Err(CoreError::invalid_operation(format!("no index named {name}")));
        }
    }
    Ok(targets)
}

/// Untrusts and empties the targets in one transaction.
fn reset<S: Storage>(container: &EntryContainer<S>, targets: &Targets<'_>) -> CoreResult<()> {
    let flags = if container.config().compact_encoding {
        IndexFlags::COMPACTED
    } else {
        IndexFlags::NONE
    };
    container.storage().write(|txn| -> CoreResult<()> {
        for index in &targets.indexes {
            container.state().set_flags(txn, index.tree(), flags)?;
            index.clear(txn)?;
        }
        if targets.system {
            for tree in [container.dn2id().tree(), container.children_count().tree()] {
                txn.delete_tree(tree)?;
                txn.open_tree(tree, true)?;
            }
        }
        Ok(())
    })
}

/// Entry ID, DN key when `dn2id` is rebuilt, and one key set per attribute
/// index tree.
type KeyedEntry = (EntryId, Option<Vec<u8>>, Vec<BTreeSet<Vec<u8>>>);

fn feed<S: Storage>(
    container: &EntryContainer<S>,
    pipeline: &Pipeline,
    batch: Vec<(EntryId, Entry)>,
    system: bool,
    dn_chunk: &mut dyn Chunk,
    index_chunks: &mut [Box<dyn Chunk>],
) -> CoreResult<()> {
    let dn2id = container.dn2id();
    let attributes = container.attribute_indexes();
    let keyed = pipeline.install(|| {
        batch
            .par_iter()
            .map(|(id, entry)| -> CoreResult<KeyedEntry> {
                let dn_key = if system {
                    Some(dn2id.key(&entry.parsed_dn()?)?)
                } else {
                    None
                };
                let keys = attributes
                    .iter()
                    .flat_map(|attribute| attribute.entry_keys(entry))
                    .map(|(_, keys)| keys)
                    .collect();
                Ok((*id, dn_key, keys))
            })
            .collect::<CoreResult<Vec<_>>>()
    })?;
    for (id, dn_key, keys) in keyed {
        let value = id.to_key();
        if let Some(dn_key) = dn_key {
            dn_chunk.put(&dn_key, &value)?;
        }
        for (chunk, keys) in index_chunks.iter_mut().zip(keys) {
            for key in keys {
                chunk.put(&key, &value)?;
            }
        }
    }
    Ok(())
}
