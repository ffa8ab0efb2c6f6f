//! Distinguished name parsing and normalization.
//!
//! Parsing follows the string form of RFC 4514: RDNs separated by `,`,
//! multi-valued RDNs joined by `+`, and `\` escapes either of a special
//! character or of two hex digits. Normalization lower-cases attribute types
//! and values, trims them, collapses inner whitespace runs and sorts the AVAs
//! of a multi-valued RDN, so two spellings of the same name compare equal.

use std::fmt;

use crate::error::{CoreError, CoreResult};

/// One `type=value` assertion, normalized.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ava {
    attr_type: String,
    value: String,
}

impl Ava {
    /// Creates a normalized assertion.
    pub fn new(attr_type: &str, value: &str) -> Self {
        Self {
            attr_type: attr_type.trim().to_ascii_lowercase(),
            value: normalize_value(value),
        }
    }

    /// Attribute type.
    #[must_use]
    pub fn attr_type(&self) -> &str {
        &self.attr_type
    }

    /// Normalized value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Normalizes an attribute value: case-folded, trimmed, inner whitespace
/// collapsed to single spaces.
#[must_use]
pub fn normalize_value(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A relative distinguished name: one or more AVAs, kept sorted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rdn {
    avas: Vec<Ava>,
}

impl Rdn {
    /// Creates a single-valued RDN.
    pub fn new(attr_type: &str, value: &str) -> Self {
        Self {
            avas: vec![Ava::new(attr_type, value)],
        }
    }

    /// Creates an RDN from several AVAs.
    ///
    /// # Errors
    ///
    /// Returns an error if `avas` is empty.
    pub fn from_avas(mut avas: Vec<Ava>) -> CoreResult<Self> {
        if avas.is_empty() {
            return Err(CoreError::invalid_dn("", "RDN without attribute value assertions"));
        }
        avas.sort();
        avas.dedup();
        Ok(Self { avas })
    }

    /// The AVAs in normalized order.
    #[must_use]
    pub fn avas(&self) -> &[Ava] {
        &self.avas
    }

    /// Canonical byte form used in DN keys.
    ///
    /// `\` and `+` inside values are escaped so AVA boundaries stay
    /// unambiguous.
    #[must_use]
    pub fn normalized_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, ava) in self.avas.iter().enumerate() {
            if i > 0 {
                out.push(b'+');
            }
            out.extend_from_slice(ava.attr_type.as_bytes());
            out.push(b'=');
            for byte in ava.value.bytes() {
                if byte == b'\\' || byte == b'+' {
                    out.push(b'\\');
                }
                out.push(byte);
            }
        }
        out
    }

    /// Parses the output of [`Rdn::normalized_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the bytes are not a normalized
    /// RDN.
    pub fn from_normalized_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| CoreError::invalid_format("normalized RDN is not UTF-8"))?;

        let mut avas = Vec::new();
        let mut current = String::new();
        let mut chars = text.chars();
        loop {
            match chars.next() {
                Some('\\') => match chars.next() {
                    Some(c) => {
                        current.push('\\');
                        current.push(c);
                    }
                    None => return Err(CoreError::invalid_format("dangling escape in RDN")),
                },
                Some('+') => avas.push(parse_normalized_ava(&std::mem::take(&mut current))?),
                Some(c) => current.push(c),
                None => {
                    avas.push(parse_normalized_ava(&current)?);
                    break;
                }
            }
        }
        Self::from_avas(avas).map_err(|_| CoreError::invalid_format("empty RDN"))
    }
}

fn parse_normalized_ava(raw: &str) -> CoreResult<Ava> {
    let (attr_type, escaped) = raw
        .split_once('=')
        .filter(|(t, _)| !t.is_empty())
        .ok_or_else(|| CoreError::invalid_format(format!("{raw:?} is not an AVA")))?;
    let mut value = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                value.push(next);
            }
        } else {
            value.push(c);
        }
    }
    Ok(Ava::new(attr_type, &value))
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, ava) in self.avas.iter().enumerate() {
            if i > 0 {
                f.write_str("+")?;
            }
            write!(f, "{}=", ava.attr_type)?;
            let last = ava.value.chars().count().saturating_sub(1);
            for (pos, c) in ava.value.chars().enumerate() {
                let special = matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
                    || (pos == 0 && matches!(c, '#' | ' '))
                    || (pos == last && c == ' ');
                if special {
                    f.write_str("\\")?;
                }
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

/// A normalized distinguished name.
///
/// RDNs are stored leaf first, the way the string form is written. The root
/// DN has no RDNs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    /// The empty root DN.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses and normalizes a DN string.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidDn`] on syntax errors.
    pub fn parse(input: &str) -> CoreResult<Self> {
        let mut rdns = Vec::new();
        if input.trim().is_empty() {
            return Ok(Self { rdns });
        }

        let mut avas = Vec::new();
        let mut chars = input.chars().peekable();
        loop {
            let attr_type = read_type(input, &mut chars)?;
            let value = read_value(input, &mut chars)?;
            avas.push(Ava::new(&attr_type, &value));
            match chars.next() {
                Some('+') => {}
                Some(',' | ';') => {
                    rdns.push(Rdn::from_avas(std::mem::take(&mut avas))?);
                }
                None => {
                    rdns.push(Rdn::from_avas(std::mem::take(&mut avas))?);
                    break;
                }
                Some(other) => {
                    return Err(CoreError::invalid_dn(
                        input,
                        format!("unexpected character {other:?}"),
                    ))
                }
            }
        }
        Ok(Self { rdns })
    }

    /// Returns `true` for the root DN.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Number of RDNs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    /// Returns `true` for the root DN.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// RDNs, leaf first.
    #[must_use]
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// Leaf RDN, `None` for the root DN.
    #[must_use]
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    /// Parent DN, `None` for the root DN.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.rdns.is_empty() {
            None
        } else {
            Some(Self {
                rdns: self.rdns[1..].to_vec(),
            })
        }
    }

    /// Immediate child of this DN.
    #[must_use]
    pub fn child(&self, rdn: Rdn) -> Self {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend_from_slice(&self.rdns);
        Self { rdns }
    }

    /// Returns `true` if `self` equals `base` or lies below it.
    #[must_use]
    pub fn is_within(&self, base: &Self) -> bool {
        self.rdns.len() >= base.rdns.len()
            && self.rdns[self.rdns.len() - base.rdns.len()..] == base.rdns[..]
    }

    /// Returns `true` if `self` lies strictly below `base`.
    #[must_use]
    pub fn is_descendant_of(&self, base: &Self) -> bool {
        self.rdns.len() > base.rdns.len() && self.is_within(base)
    }

    /// Replaces the `old_base` suffix by `new_base`.
    ///
    /// Returns `None` if `self` is not within `old_base`.
    #[must_use]
    pub fn rename_suffix(&self, old_base: &Self, new_base: &Self) -> Option<Self> {
        if !self.is_within(old_base) {
            return None;
        }
        let keep = self.rdns.len() - old_base.rdns.len();
        let mut rdns = self.rdns[..keep].to_vec();
        rdns.extend_from_slice(&new_base.rdns);
        Some(Self { rdns })
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{rdn}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Dn {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

type Chars<'a> = std::iter::Peekable<std::str::Chars<'a>>;

fn read_type(input: &str, chars: &mut Chars<'_>) -> CoreResult<String> {
    let mut attr_type = String::new();
    loop {
        match chars.next() {
            Some('=') => break,
            Some(c) if c.is_ascii_alphanumeric() || c == '-' || c == '.' => attr_type.push(c),
            Some(c) if c.is_whitespace() => {}
            Some(c) => {
                return Err(CoreError::invalid_dn(
                    input,
                    format!("invalid character {c:?} in attribute type"),
                ))
            }
            None => return Err(CoreError::invalid_dn(input, "attribute type without value")),
        }
    }
    if attr_type.is_empty() {
        return Err(CoreError::invalid_dn(input, "empty attribute type"));
    }
    Ok(attr_type)
}

fn read_value(input: &str, chars: &mut Chars<'_>) -> CoreResult<String> {
    while chars.peek().is_some_and(|c| *c == ' ') {
        chars.next();
    }
    if chars.peek() == Some(&'"') {
        chars.next();
        let mut value = String::new();
        loop {
            match chars.next() {
                Some('"') => break,
                Some('\\') => match chars.next() {
                    Some(c) => value.push(c),
                    None => return Err(CoreError::invalid_dn(input, "dangling escape")),
                },
                Some(c) => value.push(c),
                None => return Err(CoreError::invalid_dn(input, "unterminated quoted value")),
            }
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        return Ok(value);
    }

    let mut bytes = Vec::new();
    while let Some(&c) = chars.peek() {
        if matches!(c, ',' | ';' | '+') {
            break;
        }
        chars.next();
        if c != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let Some(first) = chars.next() else {
            return Err(CoreError::invalid_dn(input, "dangling escape"));
        };
        match first.to_digit(16) {
            Some(high) => {
                let low = chars
                    .next()
                    .and_then(|c| c.to_digit(16))
                    .ok_or_else(|| CoreError::invalid_dn(input, "incomplete hex escape"))?;
                bytes.push((high * 16 + low) as u8);
            }
            None => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(first.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    String::from_utf8(bytes).map_err(|_| CoreError::invalid_dn(input, "value is not valid UTF-8"))
}
