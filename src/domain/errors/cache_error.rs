//! Cache construction error types.

use thiserror::Error;

/// Errors raised while assembling the cache and its adapters.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum CacheError {
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    #[error("failed to create HTTP client: {0}")]
    HttpClient(String),
}

/// Result type for cache setup.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
