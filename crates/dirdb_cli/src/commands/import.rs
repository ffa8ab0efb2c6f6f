//! Import command implementation.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use dirdb_core::{BackendConfig, CoreError, CoreResult, Entry, ImportConfig, Importer};
use dirdb_storage::Storage;

use super::{open_container, CliError};

/// Runs the import command.
pub fn run(
    path: &Path,
    backend: BackendConfig,
    config: ImportConfig,
    input: &Path,
) -> Result<(), CliError> {
    println!("Importing {:?} into {}", input, backend.base_dn);
    println!();

    let container = open_container(path, backend)?;
    let reader = BufReader::new(File::open(input)?);
    let report = Importer::new(&container, config)?.import(read_entries(reader))?;
    container.storage().close()?;

    println!("  Entries:               {}", report.entries);
    println!("  DN keys:               {}", report.dn_keys);
    println!("  Index keys:            {}", report.index_keys);
    println!("  Entry limit exceeded:  {}", report.entry_limit_exceeded);
    println!("  Elapsed:               {:.2?}", report.elapsed);
    println!();
    println!("✓ Import complete");
    Ok(())
}

/// Parses one JSON entry per non-blank line.
pub fn read_entries<R: BufRead>(reader: R) -> impl Iterator<Item = CoreResult<Entry>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(number, line)| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(serde_json::from_str::<Entry>(&line).map_err(|err| {
                CoreError::invalid_format(format!("line {}: {}", number + 1, err))
            })),
            Err(err) => Some(Err(err.into())),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_json_lines() {
        let input = concat!(
            r#"{"dn": "dc=example,dc=com"}"#,
            "\n\n",
            r#"{"dn": "cn=a,dc=example,dc=com", "attributes": {"cn": ["a"]}}"#,
            "\n",
        );
        let entries: Vec<Entry> = read_entries(input.as_bytes())
            .collect::<CoreResult<_>>()
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].values("cn"), ["a".to_string()]);
    }

    #[test]
    fn reports_bad_line_number() {
        let input = "{\"dn\": \"o=test\"}\nnot json\n";
        let results: Vec<_> = read_entries(input.as_bytes()).collect();
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err().to_string();
        assert!(err.contains("line 2"), "{err}");
    }
}
