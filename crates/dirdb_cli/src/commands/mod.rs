//! CLI command implementations.

pub mod import;
pub mod inspect;
pub mod rebuild;
pub mod search;
pub mod verify;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use dirdb_core::{BackendConfig, CoreError, EntryContainer, ImportConfig};
use dirdb_storage::{StorageError, TreeStorage};
use serde::Deserialize;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Core engine error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage engine error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Input or output failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON input.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid command-line usage.
    #[error("{0}")]
    Usage(String),

    /// Verification found inconsistencies.
    #[error("verification found {0} error(s)")]
    VerifyFailed(u64),
}

/// Backend definition file: the backend itself plus import tuning.
#[derive(Debug, Deserialize)]
pub struct DirectoryConfig {
    /// The backend served from the journal.
    pub backend: BackendConfig,
    /// Importer settings, defaults when absent.
    #[serde(default)]
    pub import: ImportConfig,
}

/// Reads a backend definition file.
pub fn load_config(path: &Path) -> Result<DirectoryConfig, CliError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Opens the journal at `path` and the container of `config` in it.
pub fn open_container(
    path: &Path,
    config: BackendConfig,
) -> Result<EntryContainer<TreeStorage>, CliError> {
    let storage = TreeStorage::open(path)?;
    Ok(EntryContainer::open(storage, config)?)
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
