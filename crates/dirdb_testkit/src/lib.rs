//! # dirdb Testkit
//!
//! Test utilities for the dirdb directory backend.
//!
//! This crate provides:
//! - Backend fixtures and generated directory trees
//! - Property-based test generators using proptest
//! - A model-checking harness for entry and index operations
//! - End-to-end scenarios for the merge importer, rebuild and verify
//! - Concurrent stress runs for the sharded children counts
//!
//! ## Usage
//!
//! ```rust
//! use dirdb_testkit::prelude::*;
//!
//! let backend = TestBackend::memory(standard_config("dc=example,dc=com"));
//! for entry in directory_entries("dc=example,dc=com", 2, 3) {
//!     backend.add_entry(entry).unwrap();
//! }
//! assert_eq!(backend.entry_count().unwrap(), 9);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod scenarios;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::scenarios::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use scenarios::*;
pub use stress::*;
