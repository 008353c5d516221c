//! In-memory image cache with reclaimable entries.
//!
//! Keys are spread over independently locked shards. Each shard is an LRU
//! bounded by entry count and decoded byte size; entries pushed out of the LRU
//! are only weakly retained, so an image survives eviction exactly as long as
//! some display target still holds it.

use std::collections::HashMap;
use std::hash::{BuildHasher, RandomState};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, CachedImage};
use crate::domain::ports::ImageCachePort;

/// Default maximum number of strongly held images.
pub const DEFAULT_MAX_ENTRIES: usize = 256;

/// Default budget for strongly held decoded pixels (64 MB).
pub const DEFAULT_MAX_BYTES: u64 = 64 * 1024 * 1024;

/// Default number of shards.
pub const DEFAULT_SHARDS: usize = 8;

/// Sizing of the memory cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCacheConfig {
    /// Maximum strongly held images across all shards.
    pub max_entries: usize,
    /// Maximum strongly held decoded bytes across all shards.
    pub max_bytes: u64,
    /// Number of independently locked shards.
    pub shards: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: DEFAULT_MAX_BYTES,
            shards: DEFAULT_SHARDS,
        }
    }
}

struct Shard {
    entries: LruCache<CacheKey, Arc<CachedImage>>,
    bytes: u64,
    max_bytes: u64,
    demoted: HashMap<CacheKey, Weak<CachedImage>>,
}

enum Lookup {
    Hit(Arc<CachedImage>),
    Recovered(Arc<CachedImage>),
    Miss,
}

impl Shard {
    fn new(max_entries: usize, max_bytes: u64) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(cap),
            bytes: 0,
            max_bytes,
            demoted: HashMap::new(),
        }
    }

    fn insert(&mut self, key: CacheKey, image: Arc<CachedImage>) {
        let size = image.size_bytes();
        self.demoted.remove(&key);

        if let Some((old_key, old)) = self.entries.push(key.clone(), image) {
            self.bytes = self.bytes.saturating_sub(old.size_bytes());
            if old_key != key {
                self.demote(old_key, &old);
            }
        }
        self.bytes += size;

        // The newest entry stays even if it alone exceeds the budget.
        while self.bytes > self.max_bytes && self.entries.len() > 1 {
            let Some((old_key, old)) = self.entries.pop_lru() else {
                break;
            };
            self.bytes = self.bytes.saturating_sub(old.size_bytes());
            self.demote(old_key, &old);
        }
    }

    fn demote(&mut self, key: CacheKey, image: &Arc<CachedImage>) {
        trace!(key = %key, "Demoting image to weak retention");
        self.demoted.insert(key, Arc::downgrade(image));

        if self.demoted.len() > self.entries.cap().get() {
            self.demoted.retain(|_, weak| weak.strong_count() > 0);
        }
    }

    fn lookup(&mut self, key: &CacheKey) -> Lookup {
        if let Some(image) = self.entries.get(key) {
            return Lookup::Hit(image.clone());
        }

        match self.demoted.remove(key).map(|weak| weak.upgrade()) {
            Some(Some(image)) => {
                self.insert(key.clone(), image.clone());
                Lookup::Recovered(image)
            }
            Some(None) | None => Lookup::Miss,
        }
    }

    fn peek(&self, key: &CacheKey) -> Option<Arc<CachedImage>> {
        self.entries
            .peek(key)
            .cloned()
            .or_else(|| self.demoted.get(key).and_then(Weak::upgrade))
    }

    fn remove(&mut self, key: &CacheKey) -> bool {
        let demoted = self.demoted.remove(key).is_some();
        if let Some(old) = self.entries.pop(key) {
            self.bytes = self.bytes.saturating_sub(old.size_bytes());
            return true;
        }
        demoted
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.demoted.clear();
        self.bytes = 0;
    }
}

/// Sharded in-memory cache for decoded images.
pub struct MemoryImageCache {
    shards: Box<[Mutex<Shard>]>,
    hasher: RandomState,
    hits: AtomicU64,
    misses: AtomicU64,
    recoveries: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a cache with the given sizing.
    #[must_use]
    pub fn new(config: MemoryCacheConfig) -> Self {
        let shard_count = config.shards.max(1);
        let per_shard_entries = config.max_entries.div_ceil(shard_count).max(1);
        let per_shard_bytes = config.max_bytes / shard_count as u64;

        let shards = (0..shard_count)
            .map(|_| Mutex::new(Shard::new(per_shard_entries, per_shard_bytes)))
            .collect();

        Self {
            shards,
            hasher: RandomState::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
        }
    }

    /// Creates a cache with the default sizing.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(MemoryCacheConfig::default())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn shard(&self, key: &CacheKey) -> &Mutex<Shard> {
        let index = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[index]
    }

    /// Peeks at an image without promoting it in the LRU or counting a hit.
    #[must_use]
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<CachedImage>> {
        self.shard(key).lock().peek(key)
    }

    /// Looks up an image like `get`, promoting and recovering it, without
    /// touching the hit and miss counters.
    #[must_use]
    pub fn get_uncounted(&self, key: &CacheKey) -> Option<Arc<CachedImage>> {
        match self.shard(key).lock().lookup(key) {
            Lookup::Hit(image) | Lookup::Recovered(image) => Some(image),
            Lookup::Miss => None,
        }
    }

    /// Returns the strongly held decoded bytes across all shards.
    #[must_use]
    pub fn current_bytes(&self) -> u64 {
        self.shards.iter().map(|shard| shard.lock().bytes).sum()
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits,
            misses,
            recoveries: self.recoveries.load(Ordering::Relaxed),
            hit_rate,
            size: self.len(),
            bytes: self.current_bytes(),
        }
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for MemoryImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryImageCache")
            .field("shards", &self.shards.len())
            .finish_non_exhaustive()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits, recoveries included.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hits served from weakly retained images.
    pub recoveries: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of strongly held images.
    pub size: usize,
    /// Current strongly held decoded bytes.
    pub bytes: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images ({} bytes), {:.1}% hit rate ({} hits, {} recovered, {} misses)",
            self.size, self.bytes, self.hit_rate, self.hits, self.recoveries, self.misses
        )
    }
}

impl ImageCachePort for MemoryImageCache {
    fn get(&self, key: &CacheKey) -> Option<Arc<CachedImage>> {
        let lookup = self.shard(key).lock().lookup(key);
        match lookup {
            Lookup::Hit(image) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "Memory cache hit");
                Some(image)
            }
            Lookup::Recovered(image) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.recoveries.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "Memory cache hit on weakly retained image");
                Some(image)
            }
            Lookup::Miss => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "Memory cache miss");
                None
            }
        }
    }

    fn put(&self, key: CacheKey, image: Arc<CachedImage>) {
        debug!(key = %key, bytes = image.size_bytes(), "Storing image in memory cache");
        self.shard(&key).lock().insert(key, image);
    }

    fn evict(&self, key: &CacheKey) {
        if self.shard(key).lock().remove(key) {
            debug!(key = %key, "Evicted image from memory cache");
        }
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().entries.len()).sum()
    }

    fn clear(&self) {
        for shard in &*self.shards {
            shard.lock().clear();
        }
        debug!("Cleared memory image cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(key: &str, side: u32) -> Arc<CachedImage> {
        CachedImage::shared(CacheKey::from(key), image::DynamicImage::new_rgb8(side, side))
    }

    fn single_shard(max_entries: usize, max_bytes: u64) -> MemoryImageCache {
        MemoryImageCache::new(MemoryCacheConfig {
            max_entries,
            max_bytes,
            shards: 1,
        })
    }

    #[test]
    fn test_cache_put_and_get() {
        let cache = MemoryImageCache::with_defaults();
        let key = CacheKey::from("http://x/a.jpg");

        cache.put(key.clone(), image("http://x/a.jpg", 100));
        let retrieved = cache.get(&key);

        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().width(), 100);
    }

    #[test]
    fn test_cache_miss() {
        let cache = MemoryImageCache::with_defaults();
        assert!(cache.get(&CacheKey::from("nonexistent")).is_none());
    }

    #[test]
    fn test_entry_limit_drops_unreferenced_images() {
        let cache = single_shard(2, u64::MAX);
        let k1 = CacheKey::from("k1");
        let k2 = CacheKey::from("k2");
        let k3 = CacheKey::from("k3");

        cache.put(k1.clone(), image("k1", 10));
        cache.put(k2.clone(), image("k2", 10));
        cache.put(k3.clone(), image("k3", 10));

        // Nobody holds k1 any more, so it is gone for good.
        assert!(cache.get(&k1).is_none());
        assert!(cache.get(&k2).is_some());
        assert!(cache.get(&k3).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_displayed_image_survives_eviction() {
        let cache = single_shard(1, u64::MAX);
        let k1 = CacheKey::from("k1");
        let displayed = image("k1", 10);

        cache.put(k1.clone(), displayed.clone());
        cache.put(CacheKey::from("k2"), image("k2", 10));

        let recovered = cache.get(&k1).expect("still held by a target");
        assert!(Arc::ptr_eq(&recovered, &displayed));
        assert_eq!(cache.stats().recoveries, 1);

        drop(recovered);
        drop(displayed);
        cache.put(CacheKey::from("k3"), image("k3", 10));
        assert!(cache.get(&k1).is_none());
    }

    #[test]
    fn test_byte_budget_eviction() {
        // 10x10 rgb8 = 300 bytes each.
        let cache = single_shard(100, 700);
        let k1 = CacheKey::from("k1");

        cache.put(k1.clone(), image("k1", 10));
        cache.put(CacheKey::from("k2"), image("k2", 10));
        assert_eq!(cache.current_bytes(), 600);

        cache.put(CacheKey::from("k3"), image("k3", 10));
        assert_eq!(cache.current_bytes(), 600);
        assert!(cache.get(&k1).is_none());
    }

    #[test]
    fn test_oversized_image_is_kept_alone() {
        let cache = single_shard(10, 100);
        let big = CacheKey::from("big");

        cache.put(CacheKey::from("small"), image("small", 2));
        cache.put(big.clone(), image("big", 20));

        assert_eq!(cache.len(), 1);
        assert!(cache.get(&big).is_some());
    }

    #[test]
    fn test_replacing_key_updates_bytes() {
        let cache = single_shard(10, u64::MAX);
        let key = CacheKey::from("k");

        cache.put(key.clone(), image("k", 10));
        cache.put(key.clone(), image("k", 20));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_bytes(), 20 * 20 * 3);
    }

    #[test]
    fn test_evict_removes_weak_retention_too() {
        let cache = single_shard(1, u64::MAX);
        let k1 = CacheKey::from("k1");
        let displayed = image("k1", 10);

        cache.put(k1.clone(), displayed.clone());
        cache.put(CacheKey::from("k2"), image("k2", 10));
        cache.evict(&k1);

        assert!(cache.get(&k1).is_none());
    }

    #[test]
    fn test_cache_stats() {
        let cache = MemoryImageCache::with_defaults();
        let key = CacheKey::from("k1");

        cache.put(key.clone(), image("k1", 10));
        let _ = cache.get(&key);
        let _ = cache.get(&CacheKey::from("missing"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.bytes, 300);
    }

    #[test]
    fn test_peek_does_not_promote() {
        let cache = single_shard(2, u64::MAX);
        let k1 = CacheKey::from("k1");

        cache.put(k1.clone(), image("k1", 10));
        cache.put(CacheKey::from("k2"), image("k2", 10));

        let _ = cache.peek(&k1);
        cache.put(CacheKey::from("k3"), image("k3", 10));

        assert!(cache.peek(&k1).is_none());
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_uncounted_lookup_recovers_without_counting() {
        let cache = single_shard(1, u64::MAX);
        let k1 = CacheKey::from("k1");
        let displayed = image("k1", 10);

        cache.put(k1.clone(), displayed.clone());
        cache.put(CacheKey::from("k2"), image("k2", 10));

        let recovered = cache.get_uncounted(&k1).expect("still held by a target");
        assert!(Arc::ptr_eq(&recovered, &displayed));
        assert!(cache.get_uncounted(&CacheKey::from("missing")).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.recoveries, 0);

        drop(recovered);
        drop(displayed);
        assert!(cache.peek(&k1).is_some(), "recovered entry is strongly held again");
    }

    #[test]
    fn test_clear() {
        let cache = MemoryImageCache::with_defaults();
        cache.put(CacheKey::from("a"), image("a", 4));
        cache.put(CacheKey::from("b"), image("b", 4));

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.current_bytes(), 0);
    }

    #[test]
    fn test_concurrent_distinct_keys() {
        let cache = MemoryImageCache::with_defaults();

        std::thread::scope(|scope| {
            for t in 0..4 {
                let cache = &cache;
                scope.spawn(move || {
                    for i in 0..25 {
                        let url = format!("http://x/{t}/{i}.jpg");
                        cache.put(CacheKey::from(url.as_str()), image(&url, 2));
                        assert!(cache.get(&CacheKey::from(url)).is_some());
                    }
                });
            }
        });

        assert_eq!(cache.len(), 100);
    }
}
