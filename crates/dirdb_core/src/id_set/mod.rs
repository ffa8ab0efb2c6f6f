//! Sets of entry IDs.
//!
//! An [`EntryIdSet`] is either *defined*, a sorted duplicate-free list of
//! IDs, or *undefined*, meaning "too many matches to enumerate". Attribute
//! indexes store one set per key and switch a key to undefined once it
//! exceeds the entry limit.
//!
//! ## Invariants
//!
//! - A defined set is always strictly ascending.
//! - Mutating an undefined set is a no-op that reports success.
//! - An undefined set contains every ID, iterates as empty and reports
//!   [`EntryIdSet::UNDEFINED_SIZE`] as its size.

mod codec;

use std::cmp::Ordering;
use std::fmt;

pub use codec::EntryIdSetCodec;

use crate::types::EntryId;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Repr {
    Defined(Vec<EntryId>),
    Undefined { key: Option<Vec<u8>> },
}

/// A defined or undefined set of entry IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryIdSet {
    repr: Repr,
}

impl Default for EntryIdSet {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryIdSet {
    /// Size reported by undefined sets.
    pub const UNDEFINED_SIZE: u64 = u64::MAX;

    /// Creates an empty defined set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            repr: Repr::Defined(Vec::new()),
        }
    }

    /// Creates a defined set from IDs in any order.
    pub fn from_ids(ids: impl IntoIterator<Item = EntryId>) -> Self {
        let mut ids: Vec<EntryId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self {
            repr: Repr::Defined(ids),
        }
    }

    /// Creates a defined set holding one ID.
    #[must_use]
    pub fn single(id: EntryId) -> Self {
        Self {
            repr: Repr::Defined(vec![id]),
        }
    }

    /// Creates a defined set from IDs already strictly ascending.
    pub(crate) fn from_sorted(ids: Vec<EntryId>) -> Self {
        debug_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        Self {
            repr: Repr::Defined(ids),
        }
    }

    /// Creates an undefined set.
    #[must_use]
    pub const fn undefined() -> Self {
        Self {
            repr: Repr::Undefined { key: None },
        }
    }

    /// Creates an undefined set tagged with the index key that overflowed.
    pub fn undefined_with_key(key: impl Into<Vec<u8>>) -> Self {
        Self {
            repr: Repr::Undefined {
                key: Some(key.into()),
            },
        }
    }

    /// Returns `true` for a defined set.
    #[must_use]
    pub const fn is_defined(&self) -> bool {
        matches!(self.repr, Repr::Defined(_))
    }

    /// Diagnostic key of an undefined set.
    #[must_use]
    pub fn undefined_key(&self) -> Option<&[u8]> {
        match &self.repr {
            Repr::Undefined { key } => key.as_deref(),
            Repr::Defined(_) => None,
        }
    }

    /// Number of IDs, or [`Self::UNDEFINED_SIZE`] for an undefined set.
    #[must_use]
    pub fn size(&self) -> u64 {
        match &self.repr {
            Repr::Defined(ids) => ids.len() as u64,
            Repr::Undefined { .. } => Self::UNDEFINED_SIZE,
        }
    }

    /// Returns `true` for a defined set without IDs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(&self.repr, Repr::Defined(ids) if ids.is_empty())
    }

    /// The IDs of a defined set. Empty for an undefined set.
    #[must_use]
    pub fn ids(&self) -> &[EntryId] {
        match &self.repr {
            Repr::Defined(ids) => ids,
            Repr::Undefined { .. } => &[],
        }
    }

    /// Iterates the IDs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.ids().iter().copied()
    }

    /// Iterates the IDs not below `from` in ascending order.
    pub fn iter_from(&self, from: EntryId) -> impl Iterator<Item = EntryId> + '_ {
        let ids = self.ids();
        let start = ids.partition_point(|id| *id < from);
        ids[start..].iter().copied()
    }

    /// Returns `true` if the set holds `id`. Always `true` when undefined.
    #[must_use]
    pub fn contains(&self, id: EntryId) -> bool {
        match &self.repr {
            Repr::Defined(ids) => ids.binary_search(&id).is_ok(),
            Repr::Undefined { .. } => true,
        }
    }

    /// Inserts `id`. Returns `false` if it was already present.
    pub fn add(&mut self, id: EntryId) -> bool {
        match &mut self.repr {
            Repr::Defined(ids) => match ids.binary_search(&id) {
                Ok(_) => false,
                Err(pos) => {
                    ids.insert(pos, id);
                    true
                }
            },
            Repr::Undefined { .. } => true,
        }
    }

    /// Removes `id`. Returns `false` if it was absent.
    pub fn remove(&mut self, id: EntryId) -> bool {
        match &mut self.repr {
            Repr::Defined(ids) => match ids.binary_search(&id) {
                Ok(pos) => {
                    ids.remove(pos);
                    true
                }
                Err(_) => false,
            },
            Repr::Undefined { .. } => true,
        }
    }

    /// Adds every ID of `other`. An undefined `other` makes `self` undefined.
    pub fn add_all(&mut self, other: &Self) {
        let Repr::Defined(ids) = &mut self.repr else {
            return;
        };
        match &other.repr {
            Repr::Defined(theirs) => {
                if !theirs.is_empty() {
                    *ids = merge(ids, theirs);
                }
            }
            Repr::Undefined { key } => {
                self.repr = Repr::Undefined { key: key.clone() };
            }
        }
    }

    /// Removes every ID of `other`. An undefined `other` makes `self`
    /// undefined, since the IDs left over are unknown.
    pub fn remove_all(&mut self, other: &Self) {
        let Repr::Defined(ids) = &mut self.repr else {
            return;
        };
        match &other.repr {
            Repr::Defined(theirs) => {
                if !theirs.is_empty() && !ids.is_empty() {
                    *ids = difference(ids, theirs);
                }
            }
            Repr::Undefined { key } => {
                self.repr = Repr::Undefined { key: key.clone() };
            }
        }
    }

    /// Keeps only the IDs also in `other`.
    ///
    /// An undefined `self` stands for an unknown superset, so intersecting it
    /// with a defined `other` yields `other`.
    pub fn retain_all(&mut self, other: &Self) {
        let Repr::Defined(theirs) = &other.repr else {
            return;
        };
        match &mut self.repr {
            Repr::Defined(ids) => *ids = intersection(ids, theirs),
            Repr::Undefined { .. } => self.repr = Repr::Defined(theirs.clone()),
        }
    }

    /// Union of `sets`. Undefined if any input is undefined, empty and
    /// defined for no input.
    #[must_use]
    pub fn new_set_from_union(sets: &[Self]) -> Self {
        let mut all = Vec::new();
        for set in sets {
            match &set.repr {
                Repr::Defined(ids) => all.extend_from_slice(ids),
                Repr::Undefined { key } => {
                    return Self {
                        repr: Repr::Undefined { key: key.clone() },
                    }
                }
            }
        }
        Self::from_ids(all)
    }
}

fn merge(a: &[EntryId], b: &[EntryId]) -> Vec<EntryId> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

fn difference(a: &[EntryId], b: &[EntryId]) -> Vec<EntryId> {
    let mut out = Vec::with_capacity(a.len());
    let mut j = 0;
    for id in a {
        while j < b.len() && b[j] < *id {
            j += 1;
        }
        if j >= b.len() || b[j] != *id {
            out.push(*id);
        }
    }
    out
}

fn intersection(a: &[EntryId], b: &[EntryId]) -> Vec<EntryId> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

impl fmt::Display for EntryIdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Defined(ids) => {
                f.write_str("[")?;
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{id}")?;
                }
                f.write_str("]")
            }
            Repr::Undefined { .. } => f.write_str("[NOT-INDEXED]"),
        }
    }
}

impl FromIterator<EntryId> for EntryIdSet {
    fn from_iter<I: IntoIterator<Item = EntryId>>(iter: I) -> Self {
        Self::from_ids(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(ids: &[u64]) -> EntryIdSet {
        ids.iter().copied().map(EntryId::new).collect()
    }

    fn raw(set: &EntryIdSet) -> Vec<u64> {
        set.iter().map(EntryId::as_u64).collect()
    }

    #[test]
    fn add_keeps_order_and_reports_duplicates() {
        let mut s = EntryIdSet::new();
        assert!(s.add(EntryId::new(5)));
        assert!(s.add(EntryId::new(1)));
        assert!(!s.add(EntryId::new(5)));
        assert_eq!(raw(&s), vec![1, 5]);
        assert_eq!(s.size(), 2);
        assert!(s.remove(EntryId::new(1)));
        assert!(!s.remove(EntryId::new(1)));
    }

    #[test]
    fn undefined_set_contract() {
        let mut u = EntryIdSet::undefined_with_key(b"cn=x".to_vec());
        assert!(!u.is_defined());
        assert_eq!(u.size(), EntryIdSet::UNDEFINED_SIZE);
        assert!(u.contains(EntryId::new(42)));
        assert_eq!(u.iter().count(), 0);
        assert!(u.add(EntryId::new(1)));
        assert!(u.remove(EntryId::new(1)));
        u.add_all(&set(&[1, 2]));
        u.remove_all(&set(&[1]));
        assert!(!u.is_defined());
        assert_eq!(u.undefined_key(), Some(&b"cn=x"[..]));
        assert_eq!(u.to_string(), "[NOT-INDEXED]");
    }

    #[test]
    fn set_algebra() {
        let mut s = set(&[1, 3, 5, 7]);
        s.add_all(&set(&[2, 3, 8]));
        assert_eq!(raw(&s), vec![1, 2, 3, 5, 7, 8]);
        s.remove_all(&set(&[1, 5, 9]));
        assert_eq!(raw(&s), vec![2, 3, 7, 8]);
        s.retain_all(&set(&[3, 4, 8]));
        assert_eq!(raw(&s), vec![3, 8]);
        assert_eq!(s.to_string(), "[3,8]");
    }

    #[test]
    fn undefined_argument_propagates() {
        let mut s = set(&[1]);
        s.add_all(&EntryIdSet::undefined());
        assert!(!s.is_defined());

        let mut s = set(&[1]);
        s.remove_all(&EntryIdSet::undefined());
        assert!(!s.is_defined());

        let mut s = set(&[1]);
        s.retain_all(&EntryIdSet::undefined());
        assert_eq!(raw(&s), vec![1]);
    }

    #[test]
    fn retain_on_undefined_takes_defined_side() {
        let mut u = EntryIdSet::undefined();
        u.retain_all(&set(&[4, 9]));
        assert!(u.is_defined());
        assert_eq!(raw(&u), vec![4, 9]);
    }

    #[test]
    fn iter_from_skips_smaller_ids() {
        let s = set(&[2, 4, 6, 8]);
        let tail: Vec<u64> = s.iter_from(EntryId::new(5)).map(EntryId::as_u64).collect();
        assert_eq!(tail, vec![6, 8]);
        assert_eq!(s.iter_from(EntryId::new(9)).count(), 0);
    }

    #[test]
    fn union_of_sets() {
        let union = EntryIdSet::new_set_from_union(&[set(&[5, 1]), set(&[3]), set(&[1, 9])]);
        assert_eq!(raw(&union), vec![1, 3, 5, 9]);

        let union = EntryIdSet::new_set_from_union(&[set(&[1]), EntryIdSet::undefined()]);
        assert!(!union.is_defined());

        let empty = EntryIdSet::new_set_from_union(&[]);
        assert!(empty.is_defined() && empty.is_empty());
    }

    proptest! {
        #[test]
        fn inserted_ids_iterate_ascending(ids in proptest::collection::vec(0u64..500, 0..200)) {
            let mut s = EntryIdSet::new();
            for id in &ids {
                s.add(EntryId::new(*id));
            }
            let out = raw(&s);
            prop_assert!(out.windows(2).all(|w| w[0] < w[1]));
            for probe in 0u64..500 {
                prop_assert_eq!(s.contains(EntryId::new(probe)), ids.contains(&probe));
            }
        }

        #[test]
        fn union_matches_btreeset(
            a in proptest::collection::vec(0u64..300, 0..60),
            b in proptest::collection::vec(0u64..300, 0..60),
            c in proptest::collection::vec(0u64..300, 0..60),
        ) {
            let expected: std::collections::BTreeSet<u64> =
                a.iter().chain(&b).chain(&c).copied().collect();
            let union = EntryIdSet::new_set_from_union(&[set(&a), set(&b), set(&c)]);
            prop_assert_eq!(raw(&union), expected.into_iter().collect::<Vec<_>>());
        }
    }
}
