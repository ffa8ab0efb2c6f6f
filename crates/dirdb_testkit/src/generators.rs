//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random DNs, ID sets and directory
//! trees that satisfy the backend's structural rules.

use std::collections::BTreeSet;

use dirdb_core::{Entry, EntryId, EntryIdSet};
use proptest::prelude::*;

/// Strategy for generating entry IDs.
pub fn entry_id_strategy() -> impl Strategy<Value = EntryId> {
    (1u64..1 << 40).prop_map(EntryId::new)
}

/// Strategy for generating defined ID sets of up to `max_len` IDs.
pub fn entry_id_set_strategy(max_len: usize) -> impl Strategy<Value = EntryIdSet> {
    prop::collection::vec(1u64..100_000, 0..=max_len)
        .prop_map(|ids| EntryIdSet::from_ids(ids.into_iter().map(EntryId::new)))
}

/// Strategy for generating attribute values safe to use unescaped in a DN.
pub fn rdn_value_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,9}").expect("Invalid regex")
}

/// Strategy for generating a relative DN like `cn=value`.
pub fn rdn_strategy() -> impl Strategy<Value = String> {
    (prop::sample::select(vec!["cn", "ou", "uid"]), rdn_value_strategy())
        .prop_map(|(attr, value)| format!("{attr}={value}"))
}

/// Strategy for generating a DN 1 to `max_depth` levels below `base`.
pub fn dn_under_strategy(base: &'static str, max_depth: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(rdn_strategy(), 1..=max_depth.max(1))
        .prop_map(move |rdns| format!("{},{base}", rdns.join(",")))
}

/// Strategy for generating a valid two-level directory below `base`: the
/// base entry, then units, each followed by its people.
pub fn directory_strategy(base: &'static str) -> impl Strategy<Value = Vec<Entry>> {
    prop::collection::btree_map(
        rdn_value_strategy(),
        prop::collection::btree_set(rdn_value_strategy(), 0..6),
        1..6,
    )
    .prop_map(move |units| {
        let mut entries = vec![Entry::new(base)];
        for (unit, people) in units {
            let unit_dn = format!("ou={unit},{base}");
            entries.push(Entry::new(unit_dn.clone()).with_attribute("ou", [unit.as_str()]));
            for name in people {
                entries.push(
                    Entry::new(format!("cn={name},{unit_dn}"))
                        .with_attribute("objectClass", ["person"])
                        .with_attribute("cn", [name.as_str()])
                        .with_attribute("mail", [format!("{name}@{unit}.example.com")]),
                );
            }
        }
        entries
    })
}

/// Operation applied by model-based tests.
#[derive(Debug, Clone)]
pub enum DirectoryOperation {
    /// Add a person below a unit
    Add {
        /// Unit number
        unit: usize,
        /// Common name
        cn: String,
    },
    /// Delete a person
    Delete {
        /// Unit number
        unit: usize,
        /// Common name
        cn: String,
    },
    /// Replace the mail of a person
    ChangeMail {
        /// Unit number
        unit: usize,
        /// Common name
        cn: String,
        /// New mail value
        mail: String,
    },
}

/// Strategy for generating directory operations over `units` units.
pub fn directory_operation_strategy(units: usize) -> impl Strategy<Value = DirectoryOperation> {
    let names = || prop::sample::select(vec!["ann", "bob", "cid", "dee", "eve", "fay"]);
    prop_oneof![
        3 => (0..units, names()).prop_map(|(unit, cn)| DirectoryOperation::Add {
            unit,
            cn: cn.to_string()
        }),
        1 => (0..units, names()).prop_map(|(unit, cn)| DirectoryOperation::Delete {
            unit,
            cn: cn.to_string()
        }),
        2 => (0..units, names(), rdn_value_strategy()).prop_map(|(unit, cn, mail)| {
            DirectoryOperation::ChangeMail {
                unit,
                cn: cn.to_string(),
                mail: format!("{mail}@example.com"),
            }
        }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    units: usize,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<DirectoryOperation>> {
    prop::collection::vec(directory_operation_strategy(units), min_ops..max_ops)
}

/// Distinct IDs of a generated set, for comparisons against a model.
pub fn id_model(set: &EntryIdSet) -> BTreeSet<u64> {
    set.iter().map(EntryId::as_u64).collect()
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
