//! Sequential cursors over sorted records.
//!
//! Every chunk and region flips into a [`MeteredCursor`]. A
//! [`CompositeCursor`] merges several of them into one non-decreasing
//! stream, keeping duplicates. A [`CollectorCursor`] then folds each run of
//! equal keys into one value with a [`Collector`].

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::error::CoreResult;
use crate::import::collector::Collector;

/// Forward cursor over `(key, value)` records that reports progress.
pub trait MeteredCursor: Send {
    /// Moves to the next record. Returns `false` once exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying data is corrupt or unreadable.
    fn next(&mut self) -> CoreResult<bool>;

    /// Key of the current record, empty when not positioned.
    fn key(&self) -> &[u8];

    /// Value of the current record, empty when not positioned.
    fn value(&self) -> &[u8];

    /// Name used in logs.
    fn name(&self) -> &str;

    /// Bytes consumed so far.
    fn bytes_read(&self) -> u64;

    /// Bytes available in total.
    fn total_bytes(&self) -> u64;
}

/// Cursor without records.
#[derive(Debug, Default)]
pub struct EmptyCursor {
    name: String,
}

impl EmptyCursor {
    /// Creates an empty cursor.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl MeteredCursor for EmptyCursor {
    fn next(&mut self) -> CoreResult<bool> {
        Ok(false)
    }

    fn key(&self) -> &[u8] {
        &[]
    }

    fn value(&self) -> &[u8] {
        &[]
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn bytes_read(&self) -> u64 {
        0
    }

    fn total_bytes(&self) -> u64 {
        0
    }
}

/// K-way merge of sorted cursors.
///
/// Records come out in non-decreasing unsigned key order. Equal keys from
/// different sources come out in source order and are not collapsed.
pub struct CompositeCursor {
    name: String,
    sources: Vec<Box<dyn MeteredCursor>>,
    heap: BinaryHeap<Reverse<(Vec<u8>, usize)>>,
    current: Option<usize>,
    started: bool,
}

impl CompositeCursor {
    /// Merges `sources`, each of which must already be sorted.
    pub fn new(name: impl Into<String>, sources: Vec<Box<dyn MeteredCursor>>) -> Self {
        Self {
            name: name.into(),
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            current: None,
            started: false,
        }
    }

    /// Number of merged sources.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    fn advance(&mut self, source: usize) -> CoreResult<()> {
        let cursor = &mut self.sources[source];
        if cursor.next()? {
            self.heap.push(Reverse((cursor.key().to_vec(), source)));
        }
        Ok(())
    }
}

impl MeteredCursor for CompositeCursor {
    fn next(&mut self) -> CoreResult<bool> {
        if !self.started {
            self.started = true;
            for source in 0..self.sources.len() {
                self.advance(source)?;
            }
        } else if let Some(source) = self.current.take() {
            self.advance(source)?;
        }
        match self.heap.pop() {
            Some(Reverse((_, source))) => {
                self.current = Some(source);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn key(&self) -> &[u8] {
        match self.current {
            Some(source) => self.sources[source].key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.current {
            Some(source) => self.sources[source].value(),
            None => &[],
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn bytes_read(&self) -> u64 {
        self.sources.iter().map(|source| source.bytes_read()).sum()
    }

    fn total_bytes(&self) -> u64 {
        self.sources.iter().map(|source| source.total_bytes()).sum()
    }
}

/// Folds runs of equal keys of a sorted cursor with a [`Collector`].
///
/// Yields one `(key, merged value)` pair per distinct key, in key order.
pub struct CollectorCursor<C: Collector> {
    source: Box<dyn MeteredCursor>,
    collector: C,
    positioned: bool,
    started: bool,
    done: bool,
}

impl<C: Collector> CollectorCursor<C> {
    /// Wraps a sorted `source`.
    pub fn new(source: Box<dyn MeteredCursor>, collector: C) -> Self {
        Self {
            source,
            collector,
            positioned: false,
            started: false,
            done: false,
        }
    }

    /// The wrapped cursor, for progress reporting.
    pub fn source(&self) -> &dyn MeteredCursor {
        self.source.as_ref()
    }

    /// Next merged record, or `None` when exhausted.
    ///
    /// # Errors
    ///
    /// Returns the first source or collector error.
    pub fn next_record(&mut self) -> CoreResult<Option<(Vec<u8>, C::Output)>> {
        if !self.started {
            self.started = true;
            self.positioned = self.source.next()?;
        }
        if !self.positioned {
            return Ok(None);
        }
        let key = self.source.key().to_vec();
        let mut state = self.collector.get();
        loop {
            state = self.collector.accept(state, &key, self.source.value())?;
            self.positioned = self.source.next()?;
            if !self.positioned || self.source.key() != key.as_slice() {
                break;
            }
        }
        let merged = self.collector.merge(&key, state)?;
        Ok(Some((key, merged)))
    }
}

impl<C: Collector> Iterator for CollectorCursor<C> {
    type Item = CoreResult<(Vec<u8>, C::Output)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.next_record().transpose();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

/// Cursor over an owned, already sorted list of records.
#[derive(Debug)]
pub struct VecCursor {
    name: String,
    records: Vec<(Vec<u8>, Vec<u8>)>,
    position: Option<usize>,
    bytes_read: u64,
    total: u64,
}

impl VecCursor {
    /// Creates a cursor over `records`, which must be sorted by key.
    pub fn new(name: impl Into<String>, records: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        let total = records.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum();
        Self {
            name: name.into(),
            records,
            position: None,
            bytes_read: 0,
            total,
        }
    }

    fn current(&self) -> Option<&(Vec<u8>, Vec<u8>)> {
        self.position.and_then(|p| self.records.get(p))
    }
}

impl MeteredCursor for VecCursor {
    fn next(&mut self) -> CoreResult<bool> {
        let next = self.position.map_or(0, |p| p + 1);
        self.position = Some(next.min(self.records.len()));
        match self.records.get(next) {
            Some((key, value)) => {
                self.bytes_read += (key.len() + value.len()) as u64;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn key(&self) -> &[u8] {
        match self.current() {
            Some((key, _)) => key,
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.current() {
            Some((_, value)) => value,
            None => &[],
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    fn total_bytes(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::import::collector::UniqueValueCollector;

    fn source(name: &str, records: &[(&str, &str)]) -> Box<dyn MeteredCursor> {
        Box::new(VecCursor::new(
            name,
            records
                .iter()
                .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
                .collect(),
        ))
    }

    fn drain(cursor: &mut dyn MeteredCursor) -> Vec<(String, String)> {
        let mut out = Vec::new();
        while cursor.next().unwrap() {
            out.push((
                String::from_utf8_lossy(cursor.key()).into_owned(),
                String::from_utf8_lossy(cursor.value()).into_owned(),
            ));
        }
        out
    }

    #[test]
    fn composite_merges_and_keeps_ties_in_source_order() {
        let mut cursor = CompositeCursor::new(
            "merge",
            vec![
                source("a", &[("k1", "a1"), ("k3", "a3")]),
                source("b", &[("k1", "b1"), ("k2", "b2")]),
                source("c", &[]),
            ],
        );
        let records = drain(&mut cursor);
        let pairs: Vec<(&str, &str)> = records.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(pairs, vec![("k1", "a1"), ("k1", "b1"), ("k2", "b2"), ("k3", "a3")]);
        assert_eq!(cursor.bytes_read(), cursor.total_bytes());
        assert!(!cursor.next().unwrap());
        assert!(cursor.key().is_empty());
    }

    #[test]
    fn collector_cursor_rejects_duplicates_for_unique_values() {
        let merged = CompositeCursor::new(
            "dn",
            vec![source("a", &[("x", "1"), ("y", "2")]), source("b", &[("y", "3")])],
        );
        let mut cursor = CollectorCursor::new(Box::new(merged), UniqueValueCollector);
        let (key, value) = cursor.next().unwrap().unwrap();
        assert_eq!((key.as_slice(), value.as_slice()), (&b"x"[..], &b"1"[..]));
        let err = cursor.next().unwrap().unwrap_err();
        assert!(matches!(err, CoreError::UniquenessViolation { ref key } if key == b"y"));
        assert!(cursor.next().is_none());
    }

    #[test]
    fn empty_sources() {
        let mut cursor = CollectorCursor::new(Box::new(EmptyCursor::new("none")), UniqueValueCollector);
        assert!(cursor.next().is_none());
        let mut composite = CompositeCursor::new("nothing", Vec::new());
        assert!(!composite.next().unwrap());
        assert_eq!(composite.source_count(), 0);
    }
}
