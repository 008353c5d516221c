//! Persistent thumbnail store error types.

use thiserror::Error;

/// Thumbnail store error variants.
///
/// Never fatal to the in-memory path: callers log and fall through.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(String),

    #[error("failed to encode thumbnail: {0}")]
    Encode(String),

    #[error("failed to decode stored thumbnail: {0}")]
    Decode(String),
}
