//! Search command implementation.
//!
//! Candidates come from the attribute index when it is trusted and the key
//! is defined; otherwise every stored entry is scanned. Candidates are
//! always re-checked against the assertion.

use std::path::Path;

use dirdb_core::{
    normalize_value, BackendConfig, CoreResult, Entry, EntryContainer, EntryId,
    IndexType,
};
use dirdb_storage::Storage;
use tracing::debug;

use super::{open_container, print_json, CliError};

/// A single-attribute assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    attribute: String,
    kind: AssertionKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AssertionKind {
    Presence,
    Equality(String),
    Substring {
        part: String,
        anchored_start: bool,
        anchored_end: bool,
    },
}

impl Assertion {
    /// Parses `attr=*`, `attr=value`, `attr=*part*`, `attr=part*` or `attr=*part`.
    pub fn parse(filter: &str) -> Result<Self, CliError> {
        let (attribute, value) = filter
            .split_once('=')
            .ok_or_else(|| CliError::Usage(format!("expected attr=value, got {filter:?}")))?;
        let attribute = attribute.trim().to_ascii_lowercase();
        if attribute.is_empty() {
            return Err(CliError::Usage(format!("missing attribute in {filter:?}")));
        }

        let kind = if value == "*" {
            AssertionKind::Presence
        } else if !value.contains('*') {
            AssertionKind::Equality(value.to_string())
        } else {
            let anchored_start = !value.starts_with('*');
            let anchored_end = !value.ends_with('*');
            let part = value.trim_matches('*');
            if part.is_empty() || part.contains('*') {
                return Err(CliError::Usage(format!(
                    "only one substring component is supported in {filter:?}"
                )));
            }
            AssertionKind::Substring {
                part: part.to_string(),
                anchored_start,
                anchored_end,
            }
        };
        Ok(Self { attribute, kind })
    }

    fn index_type(&self) -> IndexType {
        match self.kind {
            AssertionKind::Presence => IndexType::Presence,
            AssertionKind::Equality(_) => IndexType::Equality,
            AssertionKind::Substring { .. } => IndexType::Substring,
        }
    }

    fn index_value(&self) -> &str {
        match &self.kind {
            AssertionKind::Presence => "",
            AssertionKind::Equality(value) => value,
            AssertionKind::Substring { part, .. } => part,
        }
    }

    /// Returns `true` if `entry` satisfies the assertion.
    pub fn matches(&self, entry: &Entry) -> bool {
        let values = entry.values(&self.attribute);
        match &self.kind {
            AssertionKind::Presence => !values.is_empty(),
            AssertionKind::Equality(expected) => {
                let expected = normalize_value(expected);
                values.iter().any(|value| normalize_value(value) == expected)
            }
            AssertionKind::Substring {
                part,
                anchored_start,
                anchored_end,
            } => {
                let part = normalize_value(part);
                values.iter().any(|value| {
                    let value = normalize_value(value);
                    match (anchored_start, anchored_end) {
                        (true, _) => value.starts_with(&part),
                        (_, true) => value.ends_with(&part),
                        _ => value.contains(&part),
                    }
                })
            }
        }
    }
}

/// Runs the search command.
pub fn run(
    path: &Path,
    backend: BackendConfig,
    filter: &str,
    limit: Option<usize>,
    format: &str,
) -> Result<(), CliError> {
    let assertion = Assertion::parse(filter)?;
    let container = open_container(path, backend)?;
    let entries = search(&container, &assertion, limit)?;

    match format {
        "json" => print_json(&entries)?,
        _ => {
            for entry in &entries {
                println!("dn: {}", entry.dn);
                for (attribute, values) in &entry.attributes {
                    for value in values {
                        println!("{}: {}", attribute, value);
                    }
                }
                println!();
            }
            println!("# {} entries", entries.len());
        }
    }
    Ok(())
}

/// Returns up to `limit` entries matching `assertion`, in ID order.
pub fn search<S: Storage>(
    container: &EntryContainer<S>,
    assertion: &Assertion,
    limit: Option<usize>,
) -> Result<Vec<Entry>, CliError> {
    let limit = limit.unwrap_or(usize::MAX);
    let candidates = container.index_candidates(
        &assertion.attribute,
        assertion.index_type(),
        assertion.index_value(),
    )?;

    let entries = if candidates.is_defined() {
        debug!(candidates = candidates.size(), "searching index candidates");
        let mut entries = Vec::new();
        for id in candidates.iter() {
            if entries.len() >= limit {
                break;
            }
            match container.get_entry_by_id(id)? {
                Some(entry) if assertion.matches(&entry) => entries.push(entry),
                _ => {}
            }
        }
        entries
    } else {
        debug!(attribute = %assertion.attribute, "no usable index, scanning entries");
        container.storage().read(|txn| -> CoreResult<Vec<Entry>> {
            let mut entries = Vec::new();
            for record in container.id2entry().iter_from(txn, EntryId::new(1))? {
                let (_, entry) = record?;
                if entries.len() >= limit {
                    break;
                }
                if assertion.matches(&entry) {
                    entries.push(entry);
                }
            }
            Ok(entries)
        })?
    };
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirdb_core::IndexDefinition;
    use dirdb_storage::TreeStorage;

    fn container(indexed: bool) -> EntryContainer<TreeStorage> {
        let mut backend = BackendConfig::new("o=test");
        if indexed {
            backend = backend.with_index(IndexDefinition::new(
                "cn",
                &[IndexType::Presence, IndexType::Equality, IndexType::Substring],
            ));
        }
        let container = EntryContainer::open(TreeStorage::in_memory(), backend).unwrap();
        container.add_entry(Entry::new("o=test")).unwrap();
        for name in ["Alice Adams", "Bob Brown", "Carol Adams"] {
            let dn = format!("cn={name},o=test");
            container
                .add_entry(Entry::new(dn).with_attribute("cn", [name]))
                .unwrap();
        }
        container
    }

    fn names(entries: &[Entry]) -> Vec<&str> {
        entries.iter().map(|entry| entry.values("cn")[0].as_str()).collect()
    }

    #[test]
    fn parses_assertions() {
        assert_eq!(
            Assertion::parse("CN=*").unwrap().kind,
            AssertionKind::Presence
        );
        assert_eq!(
            Assertion::parse("cn=Bob").unwrap().kind,
            AssertionKind::Equality("Bob".to_string())
        );
        assert_eq!(
            Assertion::parse("cn=ada*").unwrap().kind,
            AssertionKind::Substring {
                part: "ada".to_string(),
                anchored_start: true,
                anchored_end: false,
            }
        );
        assert!(Assertion::parse("cn").is_err());
        assert!(Assertion::parse("=x").is_err());
        assert!(Assertion::parse("cn=a*b*c").is_err());
    }

    #[test]
    fn searches_through_index_and_scan() {
        for indexed in [true, false] {
            let container = container(indexed);
            let hits = search(&container, &Assertion::parse("cn=bob brown").unwrap(), None).unwrap();
            assert_eq!(names(&hits), ["Bob Brown"]);

            let hits = search(&container, &Assertion::parse("cn=*adams").unwrap(), None).unwrap();
            assert_eq!(names(&hits), ["Alice Adams", "Carol Adams"]);

            let hits = search(&container, &Assertion::parse("cn=*").unwrap(), Some(2)).unwrap();
            assert_eq!(hits.len(), 2);
        }
    }

    #[test]
    fn rechecks_substring_candidates() {
        let container = container(true);
        let hits = search(&container, &Assertion::parse("cn=adams*").unwrap(), None).unwrap();
        assert!(hits.is_empty());
    }
}
