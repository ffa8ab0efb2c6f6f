//! Wire formats of [`EntryIdSet`].
//!
//! ```text
//! V1 defined:   01 | count u32 BE | count x id u64 BE
//! V1 undefined: 01 | FF FF FF FF  | key
//! V2 defined:   02 | count varint | first id varint | count-1 x delta varint
//! V2 undefined: 02 | 00           | key
//! ```
//!
//! The first byte selects the format on decode, so either codec reads what
//! the other wrote. An empty defined set encodes to no bytes at all, and no
//! bytes decode to an undefined set.

use crate::error::{CoreError, CoreResult};
use crate::id_set::EntryIdSet;
use crate::packed::{self, PackedReader};
use crate::types::EntryId;

const V1_MARKER: u8 = 0x01;
const V2_MARKER: u8 = 0x02;
const V1_UNDEFINED_COUNT: u32 = u32::MAX;

/// Encoding version used when writing ID sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryIdSetCodec {
    /// Fixed-width big-endian IDs.
    V1,
    /// Delta-encoded packed IDs.
    V2,
}

impl EntryIdSetCodec {
    /// Encodes `set`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if a defined set is too large for
    /// the V1 count prefix.
    pub fn encode(self, set: &EntryIdSet) -> CoreResult<Vec<u8>> {
        match self {
            Self::V1 => encode_v1(set),
            Self::V2 => Ok(encode_v2(set)),
        }
    }

    /// Decodes a value written by either codec.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] for an unknown discriminator,
    /// truncated data, trailing bytes or IDs out of order.
    pub fn decode(self, bytes: &[u8]) -> CoreResult<EntryIdSet> {
        decode(bytes)
    }

    /// Exact encoded size of `set`.
    #[must_use]
    pub fn encoded_len(self, set: &EntryIdSet) -> usize {
        if set.is_empty() {
            return 0;
        }
        let key_len = set.undefined_key().map_or(0, <[u8]>::len);
        match (self, set.is_defined()) {
            (Self::V1, true) => 5 + 8 * set.ids().len(),
            (Self::V1, false) => 5 + key_len,
            (Self::V2, false) => 2 + key_len,
            (Self::V2, true) => {
                let ids = set.ids();
                let mut len = 1 + packed::len_u64(ids.len() as u64);
                let mut prev = 0;
                for (i, id) in ids.iter().enumerate() {
                    let delta = if i == 0 { id.0 } else { id.0 - prev };
                    len += packed::len_u64(delta);
                    prev = id.0;
                }
                len
            }
        }
    }
}

fn encode_v1(set: &EntryIdSet) -> CoreResult<Vec<u8>> {
    if set.is_empty() {
        return Ok(Vec::new());
    }
    if !set.is_defined() {
        let key = set.undefined_key().unwrap_or_default();
        let mut out = Vec::with_capacity(5 + key.len());
        out.push(V1_MARKER);
        out.extend_from_slice(&V1_UNDEFINED_COUNT.to_be_bytes());
        out.extend_from_slice(key);
        return Ok(out);
    }
    let ids = set.ids();
    let count = v1_count(ids.len())?;
    let mut out = Vec::with_capacity(5 + 8 * ids.len());
    out.push(V1_MARKER);
    out.extend_from_slice(&count.to_be_bytes());
    for id in ids {
        out.extend_from_slice(&id.to_key());
    }
    Ok(out)
}

/// Count prefix of a defined V1 set. `u32::MAX` is reserved for undefined.
fn v1_count(len: usize) -> CoreResult<u32> {
    u32::try_from(len)
        .ok()
        .filter(|&count| count != V1_UNDEFINED_COUNT)
        .ok_or_else(|| CoreError::invalid_format(format!("{len} IDs do not fit a V1 entry ID set")))
}

fn encode_v2(set: &EntryIdSet) -> Vec<u8> {
    if set.is_empty() {
        return Vec::new();
    }
    if !set.is_defined() {
        let key = set.undefined_key().unwrap_or_default();
        let mut out = Vec::with_capacity(2 + key.len());
        out.push(V2_MARKER);
        out.push(0);
        out.extend_from_slice(key);
        return out;
    }
    let ids = set.ids();
    let mut out = Vec::with_capacity(2 + 2 * ids.len());
    out.push(V2_MARKER);
    packed::write_u64(&mut out, ids.len() as u64);
    let mut prev = 0u64;
    for (i, id) in ids.iter().enumerate() {
        let delta = if i == 0 { id.0 } else { id.0 - prev };
        packed::write_u64(&mut out, delta);
        prev = id.0;
    }
    out
}

fn decode(bytes: &[u8]) -> CoreResult<EntryIdSet> {
    let Some((&marker, body)) = bytes.split_first() else {
        return Ok(EntryIdSet::undefined());
    };
    match marker {
        V1_MARKER => decode_v1(body),
        V2_MARKER => decode_v2(body),
        other => Err(CoreError::invalid_format(format!(
            "unknown entry ID set format {other:#04x}"
        ))),
    }
}

fn decode_v1(body: &[u8]) -> CoreResult<EntryIdSet> {
    if body.len() < 4 {
        return Err(CoreError::invalid_format("truncated V1 entry ID set"));
    }
    let count = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    let rest = &body[4..];
    if count == V1_UNDEFINED_COUNT {
        return Ok(undefined_from(rest));
    }
    if rest.len() != count as usize * 8 {
        return Err(CoreError::invalid_format(format!(
            "V1 entry ID set declares {count} IDs but holds {} bytes",
            rest.len()
        )));
    }
    let ids = rest
        .chunks_exact(8)
        .map(EntryId::from_key)
        .collect::<CoreResult<Vec<_>>>()?;
    ascending(ids)
}

fn decode_v2(body: &[u8]) -> CoreResult<EntryIdSet> {
    let mut reader = PackedReader::new(body);
    let count = reader.read_u64()?;
    if count == 0 {
        return Ok(undefined_from(reader.remaining()));
    }
    // Every packed ID takes at least one byte.
    if count > reader.remaining().len() as u64 {
        return Err(CoreError::invalid_format("truncated V2 entry ID set"));
    }
    let mut ids = Vec::with_capacity(count as usize);
    let mut prev = 0u64;
    for i in 0..count {
        let delta = reader.read_u64()?;
        if i > 0 && delta == 0 {
            return Err(CoreError::invalid_format("V2 entry ID set has a zero delta"));
        }
        prev = prev
            .checked_add(delta)
            .ok_or_else(|| CoreError::invalid_format("V2 entry ID overflows"))?;
        ids.push(EntryId::new(prev));
    }
    if !reader.remaining().is_empty() {
        return Err(CoreError::invalid_format("trailing bytes after V2 entry ID set"));
    }
    Ok(EntryIdSet::from_sorted(ids))
}

fn undefined_from(key: &[u8]) -> EntryIdSet {
    if key.is_empty() {
        EntryIdSet::undefined()
    } else {
        EntryIdSet::undefined_with_key(key.to_vec())
    }
}

fn ascending(ids: Vec<EntryId>) -> CoreResult<EntryIdSet> {
    if ids.windows(2).any(|w| w[0] >= w[1]) {
        return Err(CoreError::invalid_format("entry IDs are not strictly ascending"));
    }
    Ok(EntryIdSet::from_sorted(ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CODECS: [EntryIdSetCodec; 2] = [EntryIdSetCodec::V1, EntryIdSetCodec::V2];

    fn set(ids: &[u64]) -> EntryIdSet {
        ids.iter().copied().map(EntryId::new).collect()
    }

    #[test]
    fn v1_layout() {
        let bytes = EntryIdSetCodec::V1.encode(&set(&[1, 258])).unwrap();
        assert_eq!(
            bytes,
            vec![0x01, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 1, 2]
        );
    }

    #[test]
    fn v2_layout_is_delta_packed() {
        let bytes = EntryIdSetCodec::V2.encode(&set(&[100, 101, 300])).unwrap();
        assert_eq!(bytes, vec![0x02, 3, 100, 1, 0xC7, 0x01]);
        assert_eq!(bytes.len(), EntryIdSetCodec::V2.encoded_len(&set(&[100, 101, 300])));
    }

    #[test]
    fn codecs_read_each_other() {
        let original = set(&[3, 7, 1 << 40]);
        for writer in CODECS {
            for reader in CODECS {
                let decoded = reader.decode(&writer.encode(&original).unwrap()).unwrap();
                assert_eq!(decoded, original, "{writer:?} -> {reader:?}");
            }
        }
    }

    #[test]
    fn undefined_keeps_key() {
        let undefined = EntryIdSet::undefined_with_key(b"mail=x".to_vec());
        for writer in CODECS {
            let bytes = writer.encode(&undefined).unwrap();
            assert_eq!(bytes.len(), writer.encoded_len(&undefined));
            let decoded = EntryIdSetCodec::V2.decode(&bytes).unwrap();
            assert!(!decoded.is_defined());
            assert_eq!(decoded.size(), EntryIdSet::UNDEFINED_SIZE);
            assert_eq!(decoded.undefined_key(), Some(&b"mail=x"[..]));
        }
        let plain = EntryIdSetCodec::V1
            .decode(&EntryIdSetCodec::V1.encode(&EntryIdSet::undefined()).unwrap())
            .unwrap();
        assert_eq!(plain, EntryIdSet::undefined());
    }

    #[test]
    fn empty_defined_set_reads_back_undefined() {
        for codec in CODECS {
            let bytes = codec.encode(&EntryIdSet::new()).unwrap();
            assert!(bytes.is_empty());
            assert_eq!(codec.encoded_len(&EntryIdSet::new()), 0);
            assert!(!codec.decode(&bytes).unwrap().is_defined());
        }
    }

    #[test]
    fn v1_count_prefix_never_truncates() {
        assert_eq!(v1_count(3).unwrap(), 3);
        assert_eq!(v1_count(u32::MAX as usize - 1).unwrap(), u32::MAX - 1);
        // u32::MAX marks an undefined set.
        assert!(matches!(
            v1_count(u32::MAX as usize),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let codec = EntryIdSetCodec::V1;
        assert!(codec.decode(&[0x07, 1]).is_err());
        assert!(codec.decode(&[0x01, 0, 0]).is_err());
        assert!(codec.decode(&[0x01, 0, 0, 0, 1, 0, 0]).is_err());
        let descending = [
            0x01, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 5, 0, 0, 0, 0, 0, 0, 0, 3,
        ];
        assert!(codec.decode(&descending).is_err());
        assert!(codec.decode(&[0x02, 2, 5]).is_err());
        assert!(codec.decode(&[0x02, 2, 5, 0]).is_err());
        assert!(codec.decode(&[0x02, 1, 5, 9]).is_err());
    }

    proptest! {
        #[test]
        fn round_trip_any_defined_set(ids in proptest::collection::btree_set(1u64..u64::MAX / 2, 1..100)) {
            let original: EntryIdSet = ids.into_iter().map(EntryId::new).collect();
            for codec in CODECS {
                let bytes = codec.encode(&original).unwrap();
                prop_assert_eq!(bytes.len(), codec.encoded_len(&original));
                prop_assert_eq!(codec.decode(&bytes).unwrap(), original.clone());
            }
        }
    }
}
