mod byte_fetcher_port;
mod image_cache_port;
mod request_signer_port;
mod session_storage_port;
mod thumbnail_store_port;

pub use byte_fetcher_port::ByteFetcherPort;
pub use image_cache_port::ImageCachePort;
pub use request_signer_port::{RequestSignerPort, UnsignedRequests};
pub use session_storage_port::SessionStoragePort;
pub use thumbnail_store_port::ThumbnailStorePort;
