//! Session storage error types.

use thiserror::Error;

/// Session storage error variants.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The keyring entry could not be opened, or the account name is unusable.
    #[error("failed to access secure storage: {0}")]
    AccessFailed(String),

    /// Reading a stored session failed.
    #[error("failed to retrieve session: {0}")]
    RetrievalFailed(String),

    /// Writing a session failed.
    #[error("failed to store session: {0}")]
    StorageFailed(String),

    /// Removing a stored session failed.
    #[error("failed to delete session: {0}")]
    DeletionFailed(String),
}
