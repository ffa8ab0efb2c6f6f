//! Model-checking harness for entry and index operations.
//!
//! Every operation is applied to a real backend and to an in-memory model;
//! [`IntegrationHarness::verify_all`] compares entries, index candidates and
//! children counts against the model and runs the consistency checker.

use std::collections::{BTreeMap, BTreeSet};

use dirdb_core::{
    verify, BackendConfig, Cancellation, CoreError, Dn, Entry, EntryId, IndexType,
};

use crate::fixtures::{person, TestBackend};
use crate::generators::DirectoryOperation;

const BASE_DN: &str = "o=harness";

/// A test harness for model-based testing.
pub struct IntegrationHarness {
    /// The backend under test.
    pub backend: TestBackend,
    units: usize,
    people: BTreeMap<(usize, String), (EntryId, Entry)>,
}

impl IntegrationHarness {
    /// Creates a harness with the base entry and `units` empty units.
    pub fn new(config: BackendConfig, units: usize) -> Self {
        let backend = TestBackend::memory(BackendConfig {
            base_dn: BASE_DN.to_string(),
            ..config
        });
        backend
            .add_entry(Entry::new(BASE_DN))
            .expect("Failed to add base entry");
        for unit in 0..units {
            backend
                .add_entry(Entry::new(Self::unit_dn(unit)).with_attribute("ou", [format!("unit{unit}")]))
                .expect("Failed to add unit");
        }
        Self {
            backend,
            units,
            people: BTreeMap::new(),
        }
    }

    fn unit_dn(unit: usize) -> String {
        format!("ou=unit{unit},{BASE_DN}")
    }

    fn person_dn(unit: usize, cn: &str) -> Dn {
        Dn::parse(&format!("cn={cn},{}", Self::unit_dn(unit))).expect("Invalid generated DN")
    }

    /// Applies `op` to the backend and the model.
    ///
    /// Operations the model rejects must fail on the backend with the
    /// matching error.
    pub fn apply(&mut self, op: &DirectoryOperation) {
        match op {
            DirectoryOperation::Add { unit, cn } => {
                let entry = person(&Self::unit_dn(*unit), cn);
                let result = self.backend.add_entry(entry.clone());
                match self.people.entry((*unit, cn.clone())) {
                    std::collections::btree_map::Entry::Occupied(_) => {
                        assert!(matches!(result, Err(CoreError::EntryAlreadyExists { .. })));
                    }
                    std::collections::btree_map::Entry::Vacant(slot) => {
                        let id = result.expect("Failed to add entry");
                        slot.insert((id, entry.normalized()));
                    }
                }
            }
            DirectoryOperation::Delete { unit, cn } => {
                let result = self.backend.delete_entry(&Self::person_dn(*unit, cn));
                if self.people.remove(&(*unit, cn.clone())).is_some() {
                    result.expect("Failed to delete entry");
                } else {
                    assert!(matches!(result, Err(CoreError::NoSuchEntry { .. })));
                }
            }
            DirectoryOperation::ChangeMail { unit, cn, mail } => {
                let dn = Self::person_dn(*unit, cn);
                match self.people.get_mut(&(*unit, cn.clone())) {
                    Some((_, entry)) => {
                        let mut attributes = entry.attributes.clone();
                        attributes.insert("mail".to_string(), vec![mail.clone()]);
                        self.backend
                            .modify_entry(&dn, attributes.clone())
                            .expect("Failed to modify entry");
                        entry.attributes = attributes;
                    }
                    None => {
                        let result = self.backend.modify_entry(&dn, BTreeMap::new());
                        assert!(matches!(result, Err(CoreError::NoSuchEntry { .. })));
                    }
                }
            }
        }
    }

    /// Compares the backend against the model. Panics on the first
    /// difference.
    pub fn verify_all(&self) {
        for ((unit, cn), (id, expected)) in &self.people {
            let dn = Self::person_dn(*unit, cn);
            assert_eq!(self.backend.get_entry_id(&dn).unwrap(), Some(*id));
            let actual = self.backend.get_entry(&dn).unwrap();
            assert_eq!(actual.as_ref(), Some(expected), "entry mismatch for {dn}");
        }

        let all: BTreeSet<EntryId> = self.people.values().map(|(id, _)| *id).collect();
        let present = self
            .backend
            .index_candidates("cn", IndexType::Presence, "")
            .unwrap();
        assert_eq!(present.iter().collect::<BTreeSet<_>>(), all);

        let mut by_mail: BTreeMap<&str, BTreeSet<EntryId>> = BTreeMap::new();
        for (id, entry) in self.people.values() {
            for mail in entry.values("mail") {
                by_mail.entry(mail.as_str()).or_default().insert(*id);
            }
        }
        for (mail, ids) in &by_mail {
            let found = self
                .backend
                .index_candidates("mail", IndexType::Equality, mail)
                .unwrap();
            assert_eq!(&found.iter().collect::<BTreeSet<_>>(), ids, "mail {mail}");
        }

        for unit in 0..self.units {
            let expected = self.people.keys().filter(|(u, _)| *u == unit).count() as i64;
            let dn = Dn::parse(&Self::unit_dn(unit)).unwrap();
            assert_eq!(self.backend.num_children(&dn).unwrap(), expected);
        }
        let base = Dn::parse(BASE_DN).unwrap();
        assert_eq!(
            self.backend.num_subordinates(&base).unwrap(),
            (self.units + self.people.len()) as i64
        );

        let report = verify(&self.backend.container, &[], &Cancellation::new()).unwrap();
        assert!(report.is_clean(), "{report:?}");
    }

    /// Returns the count of tracked people.
    pub fn tracked_count(&self) -> usize {
        self.people.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::standard_config;
    use crate::generators::{operation_sequence_strategy, PropTestConfig};
    use proptest::prelude::*;

    #[test]
    fn test_harness_basic() {
        let mut harness = IntegrationHarness::new(standard_config(BASE_DN), 2);
        let add = DirectoryOperation::Add {
            unit: 0,
            cn: "ann".to_string(),
        };
        harness.apply(&add);
        harness.apply(&add);
        harness.apply(&DirectoryOperation::ChangeMail {
            unit: 0,
            cn: "ann".to_string(),
            mail: "ann@new.example.com".to_string(),
        });
        harness.apply(&DirectoryOperation::Delete {
            unit: 1,
            cn: "ann".to_string(),
        });
        assert_eq!(harness.tracked_count(), 1);
        harness.verify_all();
    }

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn backend_matches_model(ops in operation_sequence_strategy(3, 1, 40)) {
            let mut harness = IntegrationHarness::new(standard_config(BASE_DN), 3);
            for op in &ops {
                harness.apply(op);
            }
            harness.verify_all();
        }
    }
}
