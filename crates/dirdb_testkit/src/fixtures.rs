//! Test fixtures and backend helpers.
//!
//! Provides convenience functions for setting up test backends
//! and generated directory trees.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use dirdb_core::{BackendConfig, BufferKind, Entry, EntryContainer, ImportConfig, IndexDefinition, IndexType};
use dirdb_storage::TreeStorage;
use tempfile::TempDir;

/// A test backend with automatic cleanup.
pub struct TestBackend {
    /// The container instance.
    pub container: EntryContainer<TreeStorage>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: TempDir,
    durable: bool,
}

impl TestBackend {
    /// Creates a backend over in-memory storage.
    pub fn memory(config: BackendConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let container = EntryContainer::open(TreeStorage::in_memory(), config)
            .expect("Failed to open in-memory backend");
        Self {
            container,
            temp_dir,
            durable: false,
        }
    }

    /// Creates a backend journaled to a file in a temp directory.
    pub fn file(config: BackendConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage = TreeStorage::open(&temp_dir.path().join("backend.journal"))
            .expect("Failed to open journal");
        let container = EntryContainer::open(storage, config).expect("Failed to open file backend");
        Self {
            container,
            temp_dir,
            durable: true,
        }
    }

    /// Journal path if file-based, None if in-memory.
    pub fn journal_path(&self) -> Option<PathBuf> {
        self.durable
            .then(|| self.temp_dir.path().join("backend.journal"))
    }

    /// Directory for import temp files, removed with the backend.
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Import settings small enough to force spills on tiny inputs.
    pub fn import_config(&self) -> ImportConfig {
        small_import_config(self.temp_dir.path().join("import"))
    }
}

impl std::ops::Deref for TestBackend {
    type Target = EntryContainer<TreeStorage>;

    fn deref(&self) -> &Self::Target {
        &self.container
    }
}

/// Backend with `cn` presence/equality/substring and `mail` equality
/// indexes.
pub fn standard_config(base_dn: &str) -> BackendConfig {
    BackendConfig::new(base_dn)
        .children_count_shards(4)
        .with_index(IndexDefinition::new(
            "cn",
            &[IndexType::Presence, IndexType::Equality, IndexType::Substring],
        ))
        .with_index(IndexDefinition::new("mail", &[IndexType::Equality]))
        .with_index(IndexDefinition::new("objectclass", &[IndexType::Equality]).entry_limit(8))
}

/// Importer settings with 512-byte buffers and two workers.
pub fn small_import_config(temp_dir: impl Into<PathBuf>) -> ImportConfig {
    ImportConfig::new()
        .buffer_size(512)
        .buffer_count(4)
        .buffer_kind(BufferKind::Heap)
        .threads(2)
        .batch_size(16)
        .temp_dir(temp_dir)
}

/// A person entry named `cn` directly under `parent`.
pub fn person(parent: &str, cn: &str) -> Entry {
    let uid = cn.to_ascii_lowercase().replace(' ', ".");
    Entry::new(format!("cn={cn},{parent}"))
        .with_attribute("objectClass", ["top", "person"])
        .with_attribute("cn", [cn])
        .with_attribute("mail", [format!("{uid}@example.com")])
}

/// Generates the base entry, `units` organizational units and `people`
/// persons per unit, parents before children.
pub fn directory_entries(base_dn: &str, units: usize, people: usize) -> Vec<Entry> {
    let mut entries = Vec::with_capacity(1 + units * (people + 1));
    entries.push(Entry::new(base_dn).with_attribute("objectClass", ["top", "domain"]));
    for unit in 0..units {
        let unit_dn = format!("ou=unit{unit},{base_dn}");
        entries.push(
            Entry::new(unit_dn.clone())
                .with_attribute("objectClass", ["top", "organizationalUnit"])
                .with_attribute("ou", [format!("unit{unit}")]),
        );
        for n in 0..people {
            entries.push(person(&unit_dn, &format!("User {unit}-{n}")));
        }
    }
    entries
}

/// Writes `entries` as JSON lines, the format the CLI imports.
pub fn write_json_lines(path: &Path, entries: &[Entry]) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for entry in entries {
        serde_json::to_writer(&mut out, entry)?;
        out.write_all(b"\n")?;
    }
    out.flush()
}

/// Runs a test with a temporary in-memory backend.
///
/// # Example
///
/// ```rust
/// use dirdb_testkit::{standard_config, with_temp_backend};
///
/// with_temp_backend(standard_config("o=test"), |backend| {
///     assert_eq!(backend.entry_count().unwrap(), 0);
/// });
/// ```
pub fn with_temp_backend<F, R>(config: BackendConfig, f: F) -> R
where
    F: FnOnce(&TestBackend) -> R,
{
    let backend = TestBackend::memory(config);
    f(&backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirdb_core::Dn;
    use std::io::{BufRead, BufReader};

    #[test]
    fn test_directory_shape() {
        let entries = directory_entries("o=test", 3, 4);
        assert_eq!(entries.len(), 1 + 3 * 5);
        let base = Dn::parse("o=test").unwrap();
        for (i, entry) in entries.iter().enumerate().skip(1) {
            let parent = entry.parsed_dn().unwrap().parent().unwrap();
            assert!(parent.is_within(&base));
            let parent_first = entries[..i]
                .iter()
                .any(|earlier| earlier.parsed_dn().unwrap() == parent);
            assert!(parent_first, "parent of {} comes later", entry.dn);
        }
    }

    #[test]
    fn test_file_backend() {
        let backend = TestBackend::file(standard_config("o=test"));
        assert!(backend.journal_path().unwrap().exists());
        for entry in directory_entries("o=test", 1, 2) {
            backend.add_entry(entry).unwrap();
        }
        assert_eq!(backend.entry_count().unwrap(), 4);
    }

    #[test]
    fn test_json_lines() {
        let backend = TestBackend::memory(standard_config("o=test"));
        let path = backend.temp_dir().join("entries.jsonl");
        let entries = directory_entries("o=test", 1, 1);
        write_json_lines(&path, &entries).unwrap();

        let read: Vec<Entry> = BufReader::new(File::open(&path).unwrap())
            .lines()
            .map(|line| serde_json::from_str(&line.unwrap()).unwrap())
            .collect();
        assert_eq!(read, entries);
    }
}
