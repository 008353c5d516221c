//! Infrastructure layer with external service adapters.

/// Application configuration.
pub mod config;
/// Image handling (caching, fetching, delivery).
pub mod image;
/// Request signing and token persistence.
pub mod session;

pub use config::{AppConfig, CliArgs, ConfigError, LogLevel, StorageManager};
pub use image::{
    CacheStats, DiskThumbnailStore, HttpByteFetcher, ImageLoader, ImageLoaderConfig,
    ImageReadyEvent, MemoryImageCache, RequestStatus,
};
pub use session::{KeyringSessionStorage, SessionSigner};
