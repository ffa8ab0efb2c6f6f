//! Distinguished names and their ordered key encoding.

mod key;
mod name;

pub use key::DnKeyFormat;
pub use name::{normalize_value, Ava, Dn, Rdn};
