//! Domain types for cached cover images.

use std::sync::Arc;

use image::DynamicImage;

/// Stable identity of a fetchable image: the URL it is fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Creates a new key from a URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// Returns the URL.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a filesystem-safe identifier derived from the URL by hashing it.
    #[must_use]
    pub fn storage_id(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A decoded image together with the key it was fetched for.
///
/// Shared through `Arc` between the memory cache and every target currently
/// displaying it.
#[derive(Debug)]
pub struct CachedImage {
    key: CacheKey,
    image: DynamicImage,
}

impl CachedImage {
    /// Wraps a decoded image.
    #[must_use]
    pub const fn new(key: CacheKey, image: DynamicImage) -> Self {
        Self { key, image }
    }

    /// Wraps a decoded image into a shared handle.
    #[must_use]
    pub fn shared(key: CacheKey, image: DynamicImage) -> Arc<Self> {
        Arc::new(Self::new(key, image))
    }

    /// Key this image was fetched for.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The decoded pixels.
    #[must_use]
    pub const fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Approximate resident size of the decoded pixel buffer.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.image.as_bytes().len() as u64
    }
}

/// Where a delivered image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Served from the in-memory cache.
    MemoryCache,
    /// Served from the persistent thumbnail store.
    LocalStore,
    /// Downloaded and decoded.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::LocalStore => write!(f, "store"),
            Self::Network => write!(f, "network"),
        }
    }
}
