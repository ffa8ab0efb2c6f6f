//! Rebuild command implementation.

use std::path::Path;

use dirdb_core::{rebuild, BackendConfig, Cancellation, ImportConfig, RebuildMode};
use dirdb_storage::Storage;

use super::{open_container, CliError};

/// Maps the command-line switches to a rebuild mode.
pub fn mode(all: bool, degraded: bool, indexes: Vec<String>) -> Result<RebuildMode, CliError> {
    match (all, degraded, indexes.is_empty()) {
        (true, false, true) => Ok(RebuildMode::All),
        (false, true, true) => Ok(RebuildMode::Degraded),
        (false, false, false) => Ok(RebuildMode::Named(indexes)),
        (false, false, true) => Err(CliError::Usage(
            "one of --all, --degraded or --index is required".to_string(),
        )),
        _ => Err(CliError::Usage(
            "--all, --degraded and --index are exclusive".to_string(),
        )),
    }
}

/// Runs the rebuild command.
pub fn run(
    path: &Path,
    backend: BackendConfig,
    config: ImportConfig,
    mode: &RebuildMode,
) -> Result<(), CliError> {
    println!("Rebuilding {} indexes of {}", mode, backend.base_dn);
    println!();

    let container = open_container(path, backend)?;
    let report = rebuild(&container, mode, &config, &Cancellation::new())?;
    container.storage().close()?;

    if report.rebuilt.is_empty() {
        println!("Nothing to rebuild");
        return Ok(());
    }
    for name in &report.rebuilt {
        println!("  rebuilt {}", name);
    }
    println!();
    println!("  Entries read:          {}", report.entries);
    println!("  Keys written:          {}", report.keys);
    println!("  Entry limit exceeded:  {}", report.entry_limit_exceeded);
    println!("  Elapsed:               {:.2?}", report.elapsed);
    println!();
    println!("✓ Rebuild complete");
    Ok(())
}
