//! Fetch pipeline error types.

use thiserror::Error;

/// Failure of a fetch+decode pipeline.
///
/// Both variants collapse to "no image available" at the delivery boundary;
/// the distinction is kept for logging.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum FetchError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("decode error: {message}")]
    Decode { message: String },
}

impl FetchError {
    /// Creates network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Pipeline could not be scheduled because too many fetches are running.
    #[must_use]
    pub fn capacity_exhausted() -> Self {
        Self::network("fetch capacity exhausted")
    }

    /// Pipeline ended without publishing an outcome.
    #[must_use]
    pub fn aborted() -> Self {
        Self::network("fetch pipeline aborted")
    }

    /// Returns whether error is network related.
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Returns whether error came from decoding.
    #[must_use]
    pub const fn is_decode_error(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}
