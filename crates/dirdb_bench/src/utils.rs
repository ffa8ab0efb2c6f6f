//! Benchmark utilities.

use dirdb_core::{Entry, EntryId, EntryIdSet};
use rand::seq::SliceRandom;
use rand::Rng;

/// Generate a defined ID set of `len` IDs with gaps of up to `max_gap`.
pub fn random_id_set(len: usize, max_gap: u64) -> EntryIdSet {
    let mut rng = rand::thread_rng();
    let mut next = 0u64;
    EntryIdSet::from_ids((0..len).map(|_| {
        next += rng.gen_range(1..=max_gap.max(1));
        EntryId::new(next)
    }))
}

/// Generate `count` shuffled `(key, value)` records with `key_len`-byte
/// random keys.
pub fn shuffled_records(count: usize, key_len: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut rng = rand::thread_rng();
    let mut records: Vec<(Vec<u8>, Vec<u8>)> = (0..count)
        .map(|i| {
            let key = (0..key_len).map(|_| rng.gen()).collect();
            (key, (i as u64).to_be_bytes().to_vec())
        })
        .collect();
    records.shuffle(&mut rng);
    records
}

/// Generate a flat directory: the base entry and `count` people below it.
pub fn flat_directory(base_dn: &str, count: usize) -> Vec<Entry> {
    let mut entries = Vec::with_capacity(count + 1);
    entries.push(Entry::new(base_dn));
    entries.extend((0..count).map(|i| {
        Entry::new(format!("uid=user{i},{base_dn}"))
            .with_attribute("objectClass", ["top", "person"])
            .with_attribute("cn", [format!("User Number {i}")])
            .with_attribute("mail", [format!("user{i}@example.com")])
    }));
    entries
}
