//! Verify command implementation.

use std::path::Path;

use dirdb_core::{verify, BackendConfig, Cancellation, VerifyReport};

use super::{open_container, print_json, CliError};

/// Runs the verify command.
pub fn run(
    path: &Path,
    backend: BackendConfig,
    indexes: &[String],
    format: &str,
) -> Result<(), CliError> {
    let container = open_container(path, backend)?;
    let report = verify(&container, indexes, &Cancellation::new())?;

    match format {
        "json" => print_json(&report)?,
        _ => print_text_output(path, indexes, &report),
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(CliError::VerifyFailed(report.error_count))
    }
}

fn print_text_output(path: &Path, indexes: &[String], report: &VerifyReport) {
    println!("Verifying backend at {:?}", path);
    if indexes.is_empty() {
        println!("  Trees: all");
    } else {
        println!("  Trees: {}", indexes.join(", "));
    }
    println!();
    println!("  Keys checked:          {}", report.key_count);
    println!("  Entry limit exceeded:  {}", report.entry_limit_exceeded_count);
    println!("  Max entries per key:   {}", report.max_entries_per_key);
    println!("  Errors:                {}", report.error_count);
    println!();
    if report.is_clean() {
        println!("✓ Verification passed");
    } else {
        println!("✗ Verification failed (see warnings above)");
    }
}
