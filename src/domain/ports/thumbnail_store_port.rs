//! Port for the persistent thumbnail store.

use async_trait::async_trait;
use image::DynamicImage;

use crate::domain::entities::CacheKey;
use crate::domain::errors::StoreError;

/// Persistent store for decoded thumbnails, keyed by URL.
///
/// Calls may be slow; the cache only invokes them from background tasks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ThumbnailStorePort: Send + Sync {
    /// Returns the stored thumbnail for `key`, if any.
    async fn get_thumbnail(&self, key: &CacheKey) -> Result<Option<DynamicImage>, StoreError>;

    /// Stores the thumbnail for `key`, replacing any previous one.
    async fn put_thumbnail(&self, key: &CacheKey, image: &DynamicImage) -> Result<(), StoreError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::sync::Semaphore;

    /// In-memory thumbnail store for testing.
    #[derive(Default)]
    pub struct InMemoryThumbnailStore {
        thumbnails: Mutex<HashMap<CacheKey, DynamicImage>>,
        reads: Mutex<usize>,
        read_gate: Mutex<Option<Arc<Semaphore>>>,
    }

    impl InMemoryThumbnailStore {
        /// Creates empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates store holding one thumbnail.
        pub fn with_thumbnail(key: &CacheKey, image: DynamicImage) -> Self {
            let store = Self::new();
            store.thumbnails.lock().insert(key.clone(), image);
            store
        }

        /// Returns whether a thumbnail is stored for `key`.
        pub fn contains(&self, key: &CacheKey) -> bool {
            self.thumbnails.lock().contains_key(key)
        }

        /// Number of lookups started.
        pub fn reads(&self) -> usize {
            *self.reads.lock()
        }

        /// Holds lookups until [`Self::release_reads`] is called.
        pub fn gate_reads(&self) {
            *self.read_gate.lock() = Some(Arc::new(Semaphore::new(0)));
        }

        /// Lets held and future lookups proceed.
        pub fn release_reads(&self) {
            if let Some(gate) = self.read_gate.lock().take() {
                gate.close();
            }
        }
    }

    #[async_trait]
    impl ThumbnailStorePort for InMemoryThumbnailStore {
        async fn get_thumbnail(&self, key: &CacheKey) -> Result<Option<DynamicImage>, StoreError> {
            *self.reads.lock() += 1;

            let gate = self.read_gate.lock().clone();
            if let Some(gate) = gate {
                let _ = gate.acquire().await;
            }

            Ok(self.thumbnails.lock().get(key).cloned())
        }

        async fn put_thumbnail(&self, key: &CacheKey, image: &DynamicImage) -> Result<(), StoreError> {
            self.thumbnails.lock().insert(key.clone(), image.clone());
            Ok(())
        }
    }
}
