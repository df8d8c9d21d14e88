//! Filter implementations for efficient key existence checking.
//!
//! Tables carry one filter over the user keys they contain, so point reads
//! can skip a table without touching its index or data blocks.

pub mod bloom;

pub use bloom::{BloomFilter, BloomFilterBuilder};
