//! HTTP byte fetcher.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, trace, warn};

use crate::domain::errors::{CacheError, CacheResult, FetchError};
use crate::domain::ports::{ByteFetcherPort, RequestSignerPort};

const USER_AGENT: &str = concat!("coverfetch/", env!("CARGO_PKG_VERSION"));

/// Downloads image bytes over HTTP, signing every request first.
pub struct HttpByteFetcher {
    client: Client,
    signer: Arc<dyn RequestSignerPort>,
}

impl HttpByteFetcher {
    /// Creates a fetcher whose requests time out after `timeout`.
    ///
    /// # Errors
    /// Returns error if HTTP client creation fails.
    pub fn new(signer: Arc<dyn RequestSignerPort>, timeout: Duration) -> CacheResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::HttpClient(e.to_string()))?;

        Ok(Self { client, signer })
    }
}

impl std::fmt::Debug for HttpByteFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpByteFetcher")
            .field("signed", &self.signer.has_session())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ByteFetcherPort for HttpByteFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        if !self.signer.has_session() {
            trace!(url = %url, "No session, sending unsigned request");
        }

        let request = self.signer.sign(self.client.get(url));

        let response = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Image request failed");
            if e.is_timeout() {
                FetchError::network("request timed out")
            } else if e.is_connect() {
                FetchError::network(format!("failed to connect: {e}"))
            } else {
                FetchError::network(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::network(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::network(format!("failed to read body: {e}")))?;

        debug!(url = %url, size = bytes.len(), "Downloaded image bytes");
        Ok(bytes)
    }
}
