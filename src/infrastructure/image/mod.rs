//! Image handling infrastructure.
//!
//! This module provides:
//! - Sharded memory cache with reclaimable entries
//! - Disk thumbnail store
//! - Deduplicated network fetch and decode
//! - Per-target delivery binding

pub mod bindings;
pub mod decoder;
pub mod disk_store;
pub mod fetcher;
pub mod in_flight;
pub mod loader;
pub mod memory_cache;

pub use bindings::{Binding, BindingTracker};
pub use decoder::ImageDecoder;
pub use disk_store::{DEFAULT_MAX_STORE_SIZE, DiskThumbnailStore};
pub use fetcher::HttpByteFetcher;
pub use in_flight::{DEFAULT_MAX_IN_FLIGHT, FetchDeduplicator};
pub use loader::{ImageLoader, ImageLoaderConfig, ImageReadyEvent, LoaderStats, RequestStatus};
pub use memory_cache::{CacheStats, MemoryCacheConfig, MemoryImageCache};
