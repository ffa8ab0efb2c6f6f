//! Inspect command implementation.

use std::path::Path;

use dirdb_core::{BackendConfig, CoreError, EntryContainer};
use dirdb_storage::{Storage, TreeStorage};
use serde::Serialize;

use super::{open_container, print_json, CliError};

/// Backend inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Journal path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Normalized base DN.
    pub base_dn: String,
    /// Entries stored, the base entry included.
    pub entry_count: u64,
    /// Entries below the base according to the total count.
    pub subordinate_count: i64,
    /// Per-tree statistics.
    pub trees: Vec<TreeStats>,
}

/// Statistics for a single tree.
#[derive(Debug, Serialize)]
pub struct TreeStats {
    /// Full tree name.
    pub name: String,
    /// Number of records.
    pub records: u64,
    /// Index flags, for attribute indexes only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, backend: BackendConfig, format: &str) -> Result<(), CliError> {
    if !path.exists() {
        return Err(CliError::Usage(format!("No journal found at {:?}", path)));
    }
    let container = open_container(path, backend)?;
    let result = inspect(path, &container)?;

    match format {
        "json" => print_json(&result)?,
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Collects the statistics of every tree of `container`.
pub fn inspect(
    path: &Path,
    container: &EntryContainer<TreeStorage>,
) -> Result<InspectResult, CliError> {
    let trees = container.storage().read(|txn| -> Result<_, CoreError> {
        let mut trees = Vec::new();
        for tree in container.core_trees() {
            trees.push(TreeStats {
                name: tree.to_string(),
                records: txn.record_count(&tree)?,
                flags: None,
            });
        }
        for index in container.attribute_trees() {
            trees.push(TreeStats {
                name: index.tree().to_string(),
                records: txn.record_count(index.tree())?,
                flags: Some(index.flags(txn)?.to_string()),
            });
        }
        Ok(trees)
    })?;

    let subordinate_count = match container.num_subordinates(container.base()) {
        Err(CoreError::NoSuchEntry { .. }) => 0,
        other => other?,
    };

    Ok(InspectResult {
        path: path.display().to_string(),
        journal_size: container.storage().journal_size()?.unwrap_or(0),
        base_dn: container.base().to_string(),
        entry_count: container.entry_count()?,
        subordinate_count,
        trees,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Backend: {}", result.base_dn);
    println!("================================");
    println!();
    println!("Journal:");
    println!("  Path: {}", result.path);
    println!("  Size: {} bytes", result.journal_size);
    println!();
    println!("Entries:");
    println!("  Stored:       {}", result.entry_count);
    println!("  Below base:   {}", result.subordinate_count);
    println!();
    println!("Trees:");
    for tree in &result.trees {
        match &tree.flags {
            Some(flags) => println!("  {:<40} {:>10} records  [{}]", tree.name, tree.records, flags),
            None => println!("  {:<40} {:>10} records", tree.name, tree.records),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirdb_core::{Entry, IndexDefinition, IndexType};

    #[test]
    fn reports_trees_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backend.journal");
        let backend = BackendConfig::new("o=test")
            .with_index(IndexDefinition::new("cn", &[IndexType::Equality]));
        let container = open_container(&path, backend).unwrap();
        container.add_entry(Entry::new("o=test")).unwrap();
        container
            .add_entry(Entry::new("cn=a,o=test").with_attribute("cn", ["a"]))
            .unwrap();

        let result = inspect(&path, &container).unwrap();
        assert_eq!(result.entry_count, 2);
        assert_eq!(result.subordinate_count, 1);
        let index = result
            .trees
            .iter()
            .find(|tree| tree.name.ends_with("cn.equality"))
            .unwrap();
        assert_eq!(index.records, 1);
        assert!(index.flags.as_deref().unwrap().contains("TRUSTED"));
    }
}
