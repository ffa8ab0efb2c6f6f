//! Backend and import configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Default maximum number of entry IDs kept under one index key.
pub const DEFAULT_INDEX_ENTRY_LIMIT: u32 = 4000;

/// Default length of indexed substrings.
pub const DEFAULT_SUBSTRING_LENGTH: usize = 6;

/// Kind of attribute index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    /// Entries that have the attribute at all.
    Presence,
    /// Entries with a value equal to the key.
    Equality,
    /// Entries with a value containing the key.
    Substring,
}

impl IndexType {
    /// Suffix used in tree names, e.g. `cn.equality`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Presence => "presence",
            Self::Equality => "equality",
            Self::Substring => "substring",
        }
    }
}

/// Definition of the indexes kept for one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Attribute type, compared case-insensitively.
    pub attribute: String,
    /// Index kinds maintained for the attribute.
    pub types: Vec<IndexType>,
    /// Per-index override of the backend entry limit.
    #[serde(default)]
    pub entry_limit: Option<u32>,
    /// Length of indexed substrings.
    #[serde(default = "default_substring_length")]
    pub substring_length: usize,
}

fn default_substring_length() -> usize {
    DEFAULT_SUBSTRING_LENGTH
}

impl IndexDefinition {
    /// Creates a definition for `attribute` with the given index kinds.
    pub fn new(attribute: impl Into<String>, types: &[IndexType]) -> Self {
        Self {
            attribute: attribute.into().to_ascii_lowercase(),
            types: types.to_vec(),
            entry_limit: None,
            substring_length: DEFAULT_SUBSTRING_LENGTH,
        }
    }

    /// Sets the per-index entry limit.
    #[must_use]
    pub const fn entry_limit(mut self, limit: u32) -> Self {
        self.entry_limit = Some(limit);
        self
    }

    /// Sets the substring length.
    #[must_use]
    pub const fn substring_length(mut self, length: usize) -> Self {
        self.substring_length = length;
        self
    }
}

/// Configuration of one backend (one base DN).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base DN served by the backend.
    pub base_dn: String,

    /// Entry IDs kept per index key before the key is marked undefined
    /// (0 = unlimited).
    pub index_entry_limit: u32,

    /// Number of shards per parent in the children-count tree.
    pub children_count_shards: u8,

    /// Whether newly created indexes use the compact (V2) ID-set encoding.
    pub compact_encoding: bool,

    /// Attribute indexes.
    pub indexes: Vec<IndexDefinition>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_dn: String::new(),
            index_entry_limit: DEFAULT_INDEX_ENTRY_LIMIT,
            children_count_shards: 16,
            compact_encoding: true,
            indexes: Vec::new(),
        }
    }
}

impl BackendConfig {
    /// Creates a configuration for `base_dn` with default values.
    pub fn new(base_dn: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            ..Self::default()
        }
    }

    /// Sets the index entry limit.
    #[must_use]
    pub const fn index_entry_limit(mut self, limit: u32) -> Self {
        self.index_entry_limit = limit;
        self
    }

    /// Sets the children-count shard count.
    #[must_use]
    pub const fn children_count_shards(mut self, shards: u8) -> Self {
        self.children_count_shards = shards;
        self
    }

    /// Sets whether new indexes use the compact encoding.
    #[must_use]
    pub const fn compact_encoding(mut self, value: bool) -> Self {
        self.compact_encoding = value;
        self
    }

    /// Adds an attribute index.
    #[must_use]
    pub fn with_index(mut self, definition: IndexDefinition) -> Self {
        self.indexes.push(definition);
        self
    }

    /// Checks the configuration for values the backend cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero shard count, a zero substring length or a
    /// duplicated attribute index.
    pub fn validate(&self) -> CoreResult<()> {
        if self.children_count_shards == 0 {
            return Err(CoreError::invalid_operation(
                "children_count_shards must be at least 1",
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for definition in &self.indexes {
            if !seen.insert(definition.attribute.to_ascii_lowercase()) {
                return Err(CoreError::invalid_operation(format!(
                    "attribute {} is indexed twice",
                    definition.attribute
                )));
            }
            if definition.types.contains(&IndexType::Substring) && definition.substring_length == 0 {
                return Err(CoreError::invalid_operation(format!(
                    "substring length of {} must be at least 1",
                    definition.attribute
                )));
            }
        }
        Ok(())
    }
}

/// Where import buffers live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BufferKind {
    /// Ordinary heap allocations.
    Heap,
    /// Anonymous memory mappings outside the allocator.
    OffHeap,
    /// Off-heap when the platform supports it, heap otherwise.
    #[default]
    Auto,
}

/// Configuration of the on-disk merge importer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Size of one sort buffer in bytes.
    pub buffer_size: usize,

    /// Number of buffers in the pool.
    pub buffer_count: usize,

    /// Buffer placement.
    pub buffer_kind: BufferKind,

    /// Directory for external-sort temp files.
    pub temp_dir: PathBuf,

    /// Worker threads for sorting and key generation.
    pub threads: usize,

    /// Entries or keys written per storage transaction.
    pub batch_size: usize,

    /// How long to wait for a free buffer before failing, in milliseconds.
    pub buffer_timeout_ms: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism().map_or(2, |n| n.get());
        Self {
            buffer_size: 1024 * 1024, // 1 MB
            buffer_count: threads * 2 + 2,
            buffer_kind: BufferKind::Auto,
            temp_dir: std::env::temp_dir(),
            threads,
            batch_size: 1000,
            buffer_timeout_ms: 30_000,
        }
    }
}

impl ImportConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the buffer size.
    #[must_use]
    pub const fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Sets the number of buffers.
    #[must_use]
    pub const fn buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = count;
        self
    }

    /// Sets the buffer placement.
    #[must_use]
    pub const fn buffer_kind(mut self, kind: BufferKind) -> Self {
        self.buffer_kind = kind;
        self
    }

    /// Sets the temp directory.
    #[must_use]
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Sets the worker thread count.
    #[must_use]
    pub const fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub const fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the buffer acquire timeout.
    #[must_use]
    pub const fn buffer_timeout_ms(mut self, millis: u64) -> Self {
        self.buffer_timeout_ms = millis;
        self
    }

    /// Buffer acquire timeout.
    #[must_use]
    pub const fn buffer_timeout(&self) -> Duration {
        Duration::from_millis(self.buffer_timeout_ms)
    }

    /// Checks the configuration for values the importer cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error if any size or count is zero.
    pub fn validate(&self) -> CoreResult<()> {
        if self.buffer_size < 64 {
            return Err(CoreError::invalid_operation("buffer_size must be at least 64 bytes"));
        }
        if self.buffer_count == 0 || self.threads == 0 || self.batch_size == 0 {
            return Err(CoreError::invalid_operation(
                "buffer_count, threads and batch_size must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backend_config() {
        let config = BackendConfig::new("dc=example,dc=com");
        assert_eq!(config.index_entry_limit, DEFAULT_INDEX_ENTRY_LIMIT);
        assert!(config.compact_encoding);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = BackendConfig::new("o=test")
            .index_entry_limit(10)
            .children_count_shards(4)
            .compact_encoding(false)
            .with_index(IndexDefinition::new("CN", &[IndexType::Equality]).entry_limit(3));

        assert_eq!(config.index_entry_limit, 10);
        assert_eq!(config.children_count_shards, 4);
        assert!(!config.compact_encoding);
        assert_eq!(config.indexes[0].attribute, "cn");
        assert_eq!(config.indexes[0].entry_limit, Some(3));
    }

    #[test]
    fn rejects_duplicate_index() {
        let config = BackendConfig::new("o=test")
            .with_index(IndexDefinition::new("cn", &[IndexType::Presence]))
            .with_index(IndexDefinition::new("CN", &[IndexType::Equality]));
        assert!(config.validate().is_err());
        assert!(BackendConfig::new("o=test").children_count_shards(0).validate().is_err());
    }

    #[test]
    fn backend_config_from_json() {
        let json = r#"{
            "base_dn": "dc=example,dc=com",
            "indexes": [{"attribute": "mail", "types": ["equality", "substring"]}]
        }"#;
        let config: BackendConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.index_entry_limit, DEFAULT_INDEX_ENTRY_LIMIT);
        assert_eq!(config.indexes[0].substring_length, DEFAULT_SUBSTRING_LENGTH);
        assert_eq!(
            config.indexes[0].types,
            vec![IndexType::Equality, IndexType::Substring]
        );
    }

    #[test]
    fn import_config_validation() {
        let config = ImportConfig::new().buffer_size(4096).threads(2).buffer_count(3);
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer_timeout(), Duration::from_millis(30_000));
        assert!(ImportConfig::new().batch_size(0).validate().is_err());
        assert!(ImportConfig::new().buffer_size(8).validate().is_err());
    }
}
