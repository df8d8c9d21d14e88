//! Shared cache of decoded table blocks.
//!
//! One cache is created per database (sized by `Options::block_cache_size`)
//! and handed to every table reader. Reads that set
//! `ReadOptions::fill_cache = false` consult it without populating it.

mod lru;

pub use lru::{BlockCache, CacheKey, CacheStats};
