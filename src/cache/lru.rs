//! LRU (Least Recently Used) cache implementation for block caching.
//!
//! Decoded blocks are shared between every reader of a table; the cache
//! evicts least recently used blocks once the byte budget is exceeded.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::sstable::Block;

/// A unique identifier for a cached block.
///
/// File numbers are never reused, so `(file, offset)` names a block for
/// the life of the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Table file number
    pub file_number: u64,
    /// Block offset in the file
    pub offset: u64,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(file_number: u64, offset: u64) -> Self {
        Self {
            file_number,
            offset,
        }
    }
}

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of insertions
    pub insertions: u64,
    /// Number of evictions
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

struct Slot {
    block: Block,
    tick: u64,
}

#[derive(Default)]
struct LruState {
    entries: HashMap<CacheKey, Slot>,
    /// Access tick → key, oldest first.
    order: BTreeMap<u64, CacheKey>,
    next_tick: u64,
    usage: usize,
}

impl LruState {
    fn touch(&mut self, key: &CacheKey) -> Option<Block> {
        let tick = self.next_tick;
        let slot = self.entries.get_mut(key)?;
        self.order.remove(&slot.tick);
        slot.tick = tick;
        self.order.insert(tick, *key);
        self.next_tick += 1;
        Some(slot.block.clone())
    }

    fn remove(&mut self, key: &CacheKey) -> bool {
        match self.entries.remove(key) {
            Some(slot) => {
                self.order.remove(&slot.tick);
                self.usage -= slot.block.size();
                true
            }
            None => false,
        }
    }
}

/// Thread-safe LRU cache for decoded table blocks.
///
/// # Thread Safety
///
/// Share it across tables with `Arc<BlockCache>`. A single mutex guards the
/// map and recency order; it is held only for map operations.
pub struct BlockCache {
    capacity: usize,
    state: Mutex<LruState>,
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

impl BlockCache {
    /// Create a new BlockCache holding up to `capacity` bytes of blocks.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata::cache::BlockCache;
    ///
    /// // Create a 8MB cache
    /// let cache = BlockCache::new(8 * 1024 * 1024);
    /// assert_eq!(cache.capacity(), 8 * 1024 * 1024);
    /// ```
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LruState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            insertions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Looks up a block, marking it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Block> {
        let found = self.state.lock().touch(key);
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Inserts a block, evicting older blocks to stay within capacity.
    ///
    /// Blocks larger than the whole cache are not stored.
    pub fn insert(&self, key: CacheKey, block: Block) {
        let size = block.size();
        if size > self.capacity {
            return;
        }
        let mut state = self.state.lock();
        state.remove(&key);
        while state.usage + size > self.capacity {
            let Some((_, victim)) = state.order.pop_first() else {
                break;
            };
            if let Some(slot) = state.entries.remove(&victim) {
                state.usage -= slot.block.size();
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        let tick = state.next_tick;
        state.next_tick += 1;
        state.order.insert(tick, key);
        state.entries.insert(key, Slot { block, tick });
        state.usage += size;
        self.insertions.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops every cached block of a file.
    pub fn erase_file(&self, file_number: u64) {
        let mut state = self.state.lock();
        let keys: Vec<CacheKey> = state
            .entries
            .keys()
            .filter(|k| k.file_number == file_number)
            .copied()
            .collect();
        for key in keys {
            state.remove(&key);
        }
    }

    /// Bytes currently cached.
    pub fn usage(&self) -> usize {
        self.state.lock().usage
    }

    /// Number of cached blocks.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum bytes held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
