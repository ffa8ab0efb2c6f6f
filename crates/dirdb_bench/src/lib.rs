//! Benchmark support for dirdb.

pub mod utils;
