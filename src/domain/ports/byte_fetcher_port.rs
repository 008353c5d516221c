//! Port for raw image byte downloads.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::FetchError;

/// Port performing a single authenticated download.
///
/// Implementations must not retry; a failure is terminal for that attempt.
#[async_trait]
pub trait ByteFetcherPort: Send + Sync {
    /// Downloads the body at `url`.
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}
