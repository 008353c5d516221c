//! Port definition for the in-memory image tier.

use std::sync::Arc;

use crate::domain::entities::{CacheKey, CachedImage};

/// Port for in-memory image caching.
///
/// Entries are reclaimable: a `put` never guarantees a later `get` hit, and
/// callers must treat every lookup as "maybe present". Implementations must
/// be thread-safe and must not block on I/O.
pub trait ImageCachePort: Send + Sync {
    /// Attempts to get an image from the cache.
    fn get(&self, key: &CacheKey) -> Option<Arc<CachedImage>>;

    /// Stores an image in the cache, replacing any previous entry.
    fn put(&self, key: CacheKey, image: Arc<CachedImage>);

    /// Removes an image from the cache.
    fn evict(&self, key: &CacheKey);

    /// Returns the current number of cached images.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all images from the cache.
    fn clear(&self);
}
