//! Disk-backed thumbnail store for persistence across sessions.

use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use tokio::fs;
use tracing::{debug, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::StoreError;
use crate::domain::ports::ThumbnailStorePort;

/// Maximum disk store size in bytes (200 MB default).
pub const DEFAULT_MAX_STORE_SIZE: u64 = 200 * 1024 * 1024;

const EXTENSION: &str = "png";

/// Stores thumbnails as PNG files named after the key's storage id.
pub struct DiskThumbnailStore {
    store_dir: PathBuf,
    max_size: u64,
    current_size: AtomicU64,
    item_count: AtomicUsize,
}

impl DiskThumbnailStore {
    /// Opens (creating if needed) a store in `store_dir`.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created or read.
    pub async fn new(store_dir: PathBuf, max_size: u64) -> Result<Self, StoreError> {
        fs::create_dir_all(&store_dir)
            .await
            .map_err(|e| StoreError::Io(format!("failed to create store dir: {e}")))?;

        let mut total_size = 0u64;
        let mut count = 0usize;

        let mut entries = fs::read_dir(&store_dir)
            .await
            .map_err(|e| StoreError::Io(format!("failed to read store dir: {e}")))?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == EXTENSION)
                && let Ok(meta) = entry.metadata().await
            {
                total_size += meta.len();
                count += 1;
            }
        }

        let store = Self {
            store_dir,
            max_size,
            current_size: AtomicU64::new(total_size),
            item_count: AtomicUsize::new(count),
        };

        store.cleanup_if_needed().await;

        Ok(store)
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.store_dir.join(format!("{}.{EXTENSION}", key.storage_id()))
    }

    /// Returns the store directory.
    #[must_use]
    pub const fn dir(&self) -> &PathBuf {
        &self.store_dir
    }

    /// Removes a thumbnail.
    pub async fn evict(&self, key: &CacheKey) {
        let path = self.path_for(key);
        let size = fs::metadata(&path).await.map(|m| m.len()).ok();
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(key = %key, error = %e, "Failed to evict thumbnail");
            }
        } else if let Some(s) = size {
            self.current_size.fetch_sub(s, Ordering::Relaxed);
            self.item_count.fetch_sub(1, Ordering::Relaxed);
            debug!(key = %key, "Evicted thumbnail from disk");
        }
    }

    /// Removes every stored thumbnail.
    ///
    /// # Errors
    /// Returns error if the store directory cannot be read.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut entries = fs::read_dir(&self.store_dir)
            .await
            .map_err(|e| StoreError::Io(format!("failed to read store dir: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(format!("failed to read entry: {e}")))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == EXTENSION)
                && fs::remove_file(&path).await.is_err()
            {
                warn!(path = %path.display(), "Failed to remove thumbnail file");
            }
        }
        self.current_size.store(0, Ordering::Relaxed);
        self.item_count.store(0, Ordering::Relaxed);
        debug!("Cleared thumbnail store");
        Ok(())
    }

    /// Returns the current store size in bytes.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Returns the number of stored thumbnails.
    #[must_use]
    pub fn len(&self) -> usize {
        self.item_count.load(Ordering::Relaxed)
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks if a thumbnail is stored.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        fs::try_exists(self.path_for(key)).await.unwrap_or(false)
    }

    /// Drops the least recently accessed files once over the size limit,
    /// freeing an extra tenth of the budget.
    async fn cleanup_if_needed(&self) {
        let current_size = self.current_size();
        if current_size <= self.max_size {
            return;
        }

        debug!(
            current_size = current_size,
            max_size = self.max_size,
            "Thumbnail store over limit, cleaning up"
        );

        let Ok(mut entries) = fs::read_dir(&self.store_dir).await else {
            return;
        };

        let mut files: Vec<(PathBuf, std::time::SystemTime, u64)> = Vec::new();

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != EXTENSION) {
                continue;
            }

            if let Ok(meta) = entry.metadata().await {
                let accessed = meta
                    .accessed()
                    .or_else(|_| meta.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                files.push((path, accessed, meta.len()));
            }
        }

        files.sort_by_key(|(_, time, _)| *time);

        let mut freed_size = 0u64;
        let mut freed_count = 0usize;
        let target = current_size - self.max_size + (self.max_size / 10);

        for (path, _, size) in files {
            if freed_size >= target {
                break;
            }

            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove old thumbnail");
            } else {
                freed_size += size;
                freed_count += 1;
            }
        }
        self.current_size.fetch_sub(freed_size, Ordering::Relaxed);
        self.item_count.fetch_sub(freed_count, Ordering::Relaxed);

        debug!(
            freed_size = freed_size,
            freed_count = freed_count,
            "Thumbnail store cleanup complete"
        );
    }
}

impl std::fmt::Debug for DiskThumbnailStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskThumbnailStore")
            .field("store_dir", &self.store_dir)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ThumbnailStorePort for DiskThumbnailStore {
    async fn get_thumbnail(&self, key: &CacheKey) -> Result<Option<DynamicImage>, StoreError> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(key = %key, "Thumbnail store miss");
                return Ok(None);
            }
            Err(e) => return Err(StoreError::Io(format!("failed to read thumbnail: {e}"))),
        };

        let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|e| StoreError::Decode(format!("decode task panicked: {e}")))?
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        trace!(key = %key, path = %path.display(), "Thumbnail store hit");
        Ok(Some(decoded))
    }

    async fn put_thumbnail(&self, key: &CacheKey, image: &DynamicImage) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let old_size = fs::metadata(&path).await.map(|m| m.len()).ok();

        let dir = self.store_dir.clone();
        let target = path.clone();
        let image = image.clone();
        let new_size = tokio::task::spawn_blocking(move || -> Result<u64, StoreError> {
            let mut encoded = Vec::new();
            image
                .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
                .map_err(|e| StoreError::Encode(e.to_string()))?;

            let mut file = tempfile::NamedTempFile::new_in(&dir)
                .map_err(|e| StoreError::Io(format!("failed to create thumbnail file: {e}")))?;
            file.write_all(&encoded)
                .map_err(|e| StoreError::Io(format!("failed to write thumbnail file: {e}")))?;
            file.persist(&target)
                .map_err(|e| StoreError::Io(format!("failed to persist thumbnail file: {}", e.error)))?;

            Ok(encoded.len() as u64)
        })
        .await
        .map_err(|e| StoreError::Encode(format!("encode task panicked: {e}")))??;

        if let Some(old) = old_size {
            if new_size > old {
                self.current_size.fetch_add(new_size - old, Ordering::Relaxed);
            } else {
                self.current_size.fetch_sub(old - new_size, Ordering::Relaxed);
            }
        } else {
            self.current_size.fetch_add(new_size, Ordering::Relaxed);
            self.item_count.fetch_add(1, Ordering::Relaxed);
        }

        debug!(key = %key, path = %path.display(), size = new_size, "Stored thumbnail");

        self.cleanup_if_needed().await;

        Ok(())
    }
}
