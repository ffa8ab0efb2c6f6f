//! Ordered byte keys for DNs.
//!
//! A DN below the base DN is encoded root-most RDN first, each RDN preceded by
//! the separator byte:
//!
//! ```text
//! key(base)                       = []
//! key(ou=people,<base>)           = 00 "ou=people"
//! key(cn=john,ou=people,<base>)   = 00 "ou=people" 00 "cn=john"
//! ```
//!
//! RDN bytes never contain the separator. `0x00` and `0x01` inside RDN content
//! are escaped as `01 01` and `01 02`. Hence:
//!
//! - every descendant key of `P` starts with `P 00`, and all of them sort
//!   inside `[P 00, P 01)`
//! - the parent key of any key is the prefix before its last `00`
//! - a key sorts directly before all keys of its subtree, so a forward scan
//!   visits parents before children
//!
//! ## Invariants
//!
//! - `find_parent_key_length(dn_to_key(child)) == Some(dn_to_key(parent).len())`
//! - `decode_key(dn_to_key(dn)) == dn` for every DN within the base

use crate::dn::name::{Dn, Rdn};
use crate::error::{CoreError, CoreResult};

/// Byte layout of DN keys.
#[derive(Debug, Clone, Copy)]
pub struct DnKeyFormat;

impl DnKeyFormat {
    /// Byte that precedes every RDN in a key.
    pub const SEPARATOR: u8 = 0x00;

    /// Byte that introduces an escaped `0x00`/`0x01` inside RDN content.
    pub const ESCAPE: u8 = 0x01;

    /// Encodes `dn` relative to `base`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidDn`] if `dn` is not within `base`.
    pub fn dn_to_key(dn: &Dn, base: &Dn) -> CoreResult<Vec<u8>> {
        if !dn.is_within(base) {
            return Err(CoreError::invalid_dn(
                dn.to_string(),
                format!("not within base {base}"),
            ));
        }
        let below = dn.len() - base.len();
        let mut key = Vec::new();
        for rdn in dn.rdns()[..below].iter().rev() {
            Self::append_rdn(&mut key, rdn);
        }
        Ok(key)
    }

    /// Appends one RDN component to a parent key.
    pub fn append_rdn(key: &mut Vec<u8>, rdn: &Rdn) {
        key.push(Self::SEPARATOR);
        for byte in rdn.normalized_bytes() {
            match byte {
                0x00 => key.extend_from_slice(&[Self::ESCAPE, 0x01]),
                0x01 => key.extend_from_slice(&[Self::ESCAPE, 0x02]),
                other => key.push(other),
            }
        }
    }

    /// Decodes a key back into a DN below `base`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] for a malformed key or an RDN that
    /// does not parse.
    pub fn decode_key(key: &[u8], base: &Dn) -> CoreResult<Dn> {
        if key.is_empty() {
            return Ok(base.clone());
        }
        if key[0] != Self::SEPARATOR {
            return Err(CoreError::invalid_format("DN key must start with a separator"));
        }

        let mut dn = base.clone();
        for component in key[1..].split(|b| *b == Self::SEPARATOR) {
            let rdn = Rdn::from_normalized_bytes(&Self::unescape(component)?)?;
            dn = dn.child(rdn);
        }
        Ok(dn)
    }

    fn unescape(component: &[u8]) -> CoreResult<Vec<u8>> {
        let mut out = Vec::with_capacity(component.len());
        let mut bytes = component.iter();
        while let Some(&byte) = bytes.next() {
            if byte != Self::ESCAPE {
                out.push(byte);
                continue;
            }
            match bytes.next() {
                Some(0x01) => out.push(0x00),
                Some(0x02) => out.push(0x01),
                _ => return Err(CoreError::invalid_format("malformed escape in DN key")),
            }
        }
        Ok(out)
    }

    /// Length of the parent key of `key`, or `None` for the base key.
    #[must_use]
    pub fn find_parent_key_length(key: &[u8]) -> Option<usize> {
        key.iter().rposition(|b| *b == Self::SEPARATOR)
    }

    /// Returns `true` if `child` is an immediate child of `parent`.
    #[must_use]
    pub fn is_child(parent: &[u8], child: &[u8]) -> bool {
        child.len() > parent.len()
            && child.starts_with(parent)
            && Self::find_parent_key_length(child) == Some(parent.len())
    }

    /// First key that may belong to the subtree of `parent` (inclusive).
    #[must_use]
    pub fn before_first_child(parent: &[u8]) -> Vec<u8> {
        let mut key = parent.to_vec();
        key.push(Self::SEPARATOR);
        key
    }

    /// First key after the whole subtree of `parent` (exclusive).
    #[must_use]
    pub fn after_last_child(parent: &[u8]) -> Vec<u8> {
        let mut key = parent.to_vec();
        key.push(Self::SEPARATOR + 1);
        key
    }

    /// Returns `true` if `key` lies strictly inside the subtree of `parent`.
    #[must_use]
    pub fn is_in_subtree(parent: &[u8], key: &[u8]) -> bool {
        key.len() > parent.len()
            && key.starts_with(parent)
            && key[parent.len()] == Self::SEPARATOR
    }
}
