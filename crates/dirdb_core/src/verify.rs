//! Consistency check of a container.
//!
//! Every inconsistency is logged with one `warn!` and counted; the check
//! never stops at the first one. Runs in a single read transaction.

use std::collections::BTreeMap;

use dirdb_storage::{ReadableTransaction, Storage, TreeName};
use serde::Serialize;
use tracing::{info, warn};

use crate::cancel::Cancellation;
use crate::config::IndexType;
use crate::container::EntryContainer;
use crate::dn::DnKeyFormat;
use crate::entry::Entry;
use crate::error::CoreResult;
use crate::index::{AttributeIndex, DefaultIndex};
use crate::rebuild::named_targets;
use crate::types::EntryId;

/// Records between two cancellation checks.
const CHECK_INTERVAL: u64 = 1024;

/// Outcome of a consistency check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Inconsistencies found. Zero means clean.
    pub error_count: u64,
    /// Records checked in the verified trees.
    pub key_count: u64,
    /// Attribute index keys stored undefined.
    pub entry_limit_exceeded_count: u64,
    /// Largest defined ID set seen under one key.
    pub max_entries_per_key: u64,
}

impl VerifyReport {
    /// Returns `true` if no inconsistency was found.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.error_count == 0
    }
}

struct Checker<'a> {
    report: VerifyReport,
    cancel: &'a Cancellation,
    seen: u64,
}

impl Checker<'_> {
    fn issue(&mut self, tree: &TreeName, key: &[u8], problem: &str) {
        self.report.error_count += 1;
        warn!(%tree, key = ?String::from_utf8_lossy(key), problem, "index inconsistency");
    }

    fn tick(&mut self) -> CoreResult<()> {
        self.seen += 1;
        self.report.key_count += 1;
        if self.seen % CHECK_INTERVAL == 0 {
            self.cancel.check()?;
        }
        Ok(())
    }
}

/// Checks the trees named in `names`, or every tree when `names` is empty.
///
/// Names follow the rebuild naming: index id (`cn.equality`), attribute
/// (`cn`), `dn2id` or `id2childrencount`.
///
/// # Errors
///
/// Returns [`crate::CoreError::InvalidOperation`] for an unknown name,
/// [`crate::CoreError::Cancelled`], or a storage failure. Inconsistencies
/// are never errors.
pub fn verify<S: Storage>(
    container: &EntryContainer<S>,
    names: &[String],
    cancel: &Cancellation,
) -> CoreResult<VerifyReport> {
    let (indexes, system) = if names.is_empty() {
        (container.attribute_trees().collect::<Vec<_>>(), true)
    } else {
        let targets = named_targets(container, names)?;
        (targets.indexes, targets.system)
    };
    let mut checker = Checker {
        report: VerifyReport::default(),
        cancel,
        seen: 0,
    };

    container.storage().read(|txn| -> CoreResult<()> {
        if system {
            verify_dn_tree(container, txn, &mut checker)?;
        }
        for attribute in container.attribute_indexes() {
            for (ty, index) in attribute.indexes() {
                if indexes.iter().any(|target| target.tree() == index.tree()) {
                    verify_index(container, txn, attribute, ty, index, &mut checker)?;
                }
            }
        }
        Ok(())
    })?;

    let report = checker.report;
    info!(
        base = %container.base(),
        errors = report.error_count,
        keys = report.key_count,
        entry_limit_exceeded = report.entry_limit_exceeded_count,
        max_entries_per_key = report.max_entries_per_key,
        "verify done"
    );
    Ok(report)
}

fn verify_dn_tree<S: Storage>(
    container: &EntryContainer<S>,
    txn: &dyn ReadableTransaction,
    checker: &mut Checker<'_>,
) -> CoreResult<()> {
    let dn2id = container.dn2id();
    let id2entry = container.id2entry();
    let tree = dn2id.tree();
    let mut children: BTreeMap<EntryId, i64> = BTreeMap::new();
    let mut total = 0i64;

    let mut cursor = txn.open_cursor(tree)?;
    while cursor.next()? {
        let (Some(key), Some(value)) = (cursor.key(), cursor.value()) else {
            break;
        };
        checker.tick()?;
        let Ok(id) = EntryId::from_key(value) else {
            checker.issue(tree, key, "malformed entry ID");
            continue;
        };
        match id2entry.get(txn, id) {
            Ok(Some(entry)) => {
                let matches = entry
                    .parsed_dn()
                    .and_then(|dn| dn2id.key(&dn))
                    .is_ok_and(|entry_key| entry_key == key);
                if !matches {
                    checker.issue(tree, key, "entry stored under the ID has another DN");
                }
            }
            Ok(None) => checker.issue(tree, key, "entry ID missing from id2entry"),
            Err(_) => checker.issue(tree, key, "entry under the ID does not decode"),
        }
        let Some(parent_len) = DnKeyFormat::find_parent_key_length(key) else {
            continue;
        };
        total += 1;
        match dn2id.get_by_key(txn, &key[..parent_len]) {
            Ok(Some(parent)) => *children.entry(parent).or_default() += 1,
            Ok(None) => checker.issue(tree, key, "parent DN missing from dn2id"),
            Err(_) => checker.issue(tree, key, "parent DN record does not decode"),
        }
    }
    drop(cursor);

    for item in id2entry.iter_from(txn, EntryId::new(1))? {
        checker.tick()?;
        let (id, entry) = match item {
            Ok(record) => record,
            Err(_) => {
                checker.issue(id2entry.tree(), &[], "record does not decode");
                continue;
            }
        };
        let key = match entry.parsed_dn().and_then(|dn| dn2id.key(&dn)) {
            Ok(key) => key,
            Err(_) => {
                checker.issue(id2entry.tree(), &id.to_key(), "entry DN is invalid");
                continue;
            }
        };
        if dn2id.get_by_key(txn, &key)? != Some(id) {
            checker.issue(id2entry.tree(), &id.to_key(), "entry DN does not map back to its ID");
        }
    }

    let counts = container.children_count();
    let stored: BTreeMap<EntryId, i64> = counts.all_counts(txn)?.into_iter().collect();
    for (parent, expected) in &children {
        checker.tick()?;
        let actual = stored.get(parent).copied().unwrap_or(0);
        if actual != *expected {
            let problem = format!("children count {actual}, dn2id has {expected}");
            checker.issue(counts.tree(), &parent.to_key(), &problem);
        }
    }
    for (parent, actual) in &stored {
        if !children.contains_key(parent) && *actual != 0 {
            let problem = format!("children count {actual} for an entry without children");
            checker.issue(counts.tree(), &parent.to_key(), &problem);
        }
    }
    let stored_total = counts.get_total_count(txn)?;
    if stored_total != total {
        let problem = format!("total count {stored_total}, dn2id has {total}");
        checker.issue(counts.tree(), b"total", &problem);
    }
    Ok(())
}

fn verify_index<S: Storage>(
    container: &EntryContainer<S>,
    txn: &dyn ReadableTransaction,
    attribute: &AttributeIndex,
    ty: IndexType,
    index: &DefaultIndex,
    checker: &mut Checker<'_>,
) -> CoreResult<()> {
    let id2entry = container.id2entry();
    let tree = index.tree();
    let mut entries: BTreeMap<EntryId, Option<Entry>> = BTreeMap::new();

    // Every stored ID must still produce the key.
    index.for_each(txn, |key, set| {
        checker.tick()?;
        let Ok(set) = set else {
            checker.issue(tree, key, "entry ID set does not decode");
            return Ok(());
        };
        if !set.is_defined() {
            checker.report.entry_limit_exceeded_count += 1;
            return Ok(());
        }
        checker.report.max_entries_per_key = checker.report.max_entries_per_key.max(set.size());
        if index.exceeds_limit(&set) {
            checker.issue(tree, key, "defined set above the entry limit");
        }
        for id in set.iter() {
            if !entries.contains_key(&id) {
                let entry = id2entry.get(txn, id).ok().flatten();
                entries.insert(id, entry);
            }
            match entries.get(&id) {
                Some(Some(entry)) => {
                    if !attribute.keys(ty, entry.values(attribute.attribute())).contains(key) {
                        checker.issue(tree, key, &format!("entry {id} does not produce the key"));
                    }
                }
                _ => checker.issue(tree, key, &format!("entry {id} missing from id2entry")),
            }
        }
        Ok(())
    })?;

    // Every entry must be found under each of its keys.
    for item in id2entry.iter_from(txn, EntryId::new(1))? {
        let Ok((id, entry)) = item else {
            continue;
        };
        for key in attribute.keys(ty, entry.values(attribute.attribute())) {
            checker.tick()?;
            match index.read(txn, &key) {
                Ok(set) if set.contains(id) => {}
                Ok(_) => checker.issue(tree, &key, &format!("entry {id} missing under the key")),
                Err(_) => checker.issue(tree, &key, "record does not decode"),
            }
        }
    }
    Ok(())
}
