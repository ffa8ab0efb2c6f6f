//! Reductions applied to runs of equal keys during a merge.

use crate::error::{CoreError, CoreResult};
use crate::id_set::{EntryIdSet, EntryIdSetCodec};
use crate::types::EntryId;

/// Seed, accumulate and finalize the values sharing one key.
pub trait Collector: Send {
    /// Accumulator.
    type State;
    /// Final value per key.
    type Output;

    /// Fresh accumulator for a new key.
    fn get(&self) -> Self::State;

    /// Folds one value of `key` into `state`.
    ///
    /// # Errors
    ///
    /// Returns an error for a value the collector cannot accept.
    fn accept(&self, state: Self::State, key: &[u8], value: &[u8]) -> CoreResult<Self::State>;

    /// Turns the accumulator of `key` into the final value.
    ///
    /// # Errors
    ///
    /// Returns an error if the accumulated values are invalid.
    fn merge(&self, key: &[u8], state: Self::State) -> CoreResult<Self::Output>;
}

/// Accepts exactly one value per key.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniqueValueCollector;

impl Collector for UniqueValueCollector {
    type State = Option<Vec<u8>>;
    type Output = Vec<u8>;

    fn get(&self) -> Self::State {
        None
    }

    fn accept(&self, state: Self::State, key: &[u8], value: &[u8]) -> CoreResult<Self::State> {
        match state {
            Some(_) => Err(CoreError::UniquenessViolation { key: key.to_vec() }),
            None => Ok(Some(value.to_vec())),
        }
    }

    fn merge(&self, key: &[u8], state: Self::State) -> CoreResult<Self::Output> {
        state.ok_or_else(|| {
            CoreError::invalid_operation(format!("no value collected for key {key:02x?}"))
        })
    }
}

/// Gathers 8-byte entry IDs into an [`EntryIdSet`].
///
/// Past `limit` IDs (0 means no limit) the key goes undefined and further
/// IDs are dropped. Each ID is expected once per key.
#[derive(Debug, Clone, Copy)]
pub struct EntryIdsCollector {
    limit: u32,
}

impl EntryIdsCollector {
    /// Creates the collector.
    #[must_use]
    pub const fn new(limit: u32) -> Self {
        Self { limit }
    }
}

impl Collector for EntryIdsCollector {
    /// `None` once the limit was exceeded.
    type State = Option<Vec<EntryId>>;
    type Output = EntryIdSet;

    fn get(&self) -> Self::State {
        Some(Vec::new())
    }

    fn accept(&self, state: Self::State, _key: &[u8], value: &[u8]) -> CoreResult<Self::State> {
        let Some(mut ids) = state else {
            return Ok(None);
        };
        ids.push(EntryId::from_key(value)?);
        if self.limit > 0 && ids.len() > self.limit as usize {
            return Ok(None);
        }
        Ok(Some(ids))
    }

    fn merge(&self, key: &[u8], state: Self::State) -> CoreResult<Self::Output> {
        Ok(match state {
            Some(ids) => EntryIdSet::from_ids(ids),
            None => EntryIdSet::undefined_with_key(key),
        })
    }
}

/// Accumulator of [`EntryIdSetsCollector`].
#[derive(Debug)]
pub enum IdSets {
    /// No value yet.
    Empty,
    /// Exactly one encoded value, not decoded yet.
    Single(Vec<u8>),
    /// Decoded values.
    Many(Vec<EntryIdSet>),
}

/// Unions encoded [`EntryIdSet`] values.
///
/// A key with a single value is decoded as is. A union above `limit` IDs
/// (0 means no limit), or including an undefined set, is undefined.
#[derive(Debug, Clone, Copy)]
pub struct EntryIdSetsCollector {
    limit: u32,
}

impl EntryIdSetsCollector {
    /// Creates the collector.
    #[must_use]
    pub const fn new(limit: u32) -> Self {
        Self { limit }
    }

    fn decode(value: &[u8]) -> CoreResult<EntryIdSet> {
        EntryIdSetCodec::V2.decode(value)
    }
}

impl Collector for EntryIdSetsCollector {
    type State = IdSets;
    type Output = EntryIdSet;

    fn get(&self) -> Self::State {
        IdSets::Empty
    }

    fn accept(&self, state: Self::State, _key: &[u8], value: &[u8]) -> CoreResult<Self::State> {
        Ok(match state {
            IdSets::Empty => IdSets::Single(value.to_vec()),
            IdSets::Single(first) => IdSets::Many(vec![Self::decode(&first)?, Self::decode(value)?]),
            IdSets::Many(mut sets) => {
                sets.push(Self::decode(value)?);
                IdSets::Many(sets)
            }
        })
    }

    fn merge(&self, key: &[u8], state: Self::State) -> CoreResult<Self::Output> {
        let set = match state {
            IdSets::Empty => EntryIdSet::new(),
            IdSets::Single(value) => Self::decode(&value)?,
            IdSets::Many(sets) => EntryIdSet::new_set_from_union(&sets),
        };
        let over_limit = self.limit > 0 && set.is_defined() && set.size() > u64::from(self.limit);
        Ok(if over_limit || (!set.is_defined() && set.undefined_key().is_none()) {
            EntryIdSet::undefined_with_key(key)
        } else {
            set
        })
    }
}

/// Sums 8-byte big-endian signed deltas.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountCollector;

impl Collector for CountCollector {
    type State = i64;
    type Output = i64;

    fn get(&self) -> Self::State {
        0
    }

    fn accept(&self, state: Self::State, key: &[u8], value: &[u8]) -> CoreResult<Self::State> {
        let bytes: [u8; 8] = value.try_into().map_err(|_| {
            CoreError::invalid_format(format!(
                "count delta for key {key:02x?} has {} bytes",
                value.len()
            ))
        })?;
        Ok(state + i64::from_be_bytes(bytes))
    }

    fn merge(&self, _key: &[u8], state: Self::State) -> CoreResult<Self::Output> {
        Ok(state)
    }
}
