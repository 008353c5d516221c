//! Domain layer with core entities, errors and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{CacheKey, CachedImage, ImageSource, SessionToken, TargetId};
pub use errors::{CacheError, FetchError, SessionError, StoreError};
pub use ports::{ByteFetcherPort, ImageCachePort, RequestSignerPort, ThumbnailStorePort};
