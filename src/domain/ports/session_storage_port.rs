//! Port for persisting per-account collection sessions.

use async_trait::async_trait;

use crate::domain::entities::SessionToken;
use crate::domain::errors::SessionError;

/// Stores at most one session token per collection account.
///
/// Adapters store and return tokens verbatim; validating a restored token is
/// the caller's job.
#[async_trait]
pub trait SessionStoragePort: Send + Sync {
    /// Loads the session stored for `account`.
    async fn load_session(&self, account: &str) -> Result<Option<SessionToken>, SessionError>;

    /// Saves `token` as the session of `account`, replacing any previous one.
    async fn save_session(&self, account: &str, token: &SessionToken) -> Result<(), SessionError>;

    /// Removes the session of `account`. Removing a missing session succeeds.
    async fn remove_session(&self, account: &str) -> Result<(), SessionError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;

    use parking_lot::Mutex;

    /// Session storage backed by a map of account to token.
    #[derive(Default)]
    pub struct MockSessionStorage {
        sessions: Mutex<HashMap<String, SessionToken>>,
        removals: Mutex<Vec<String>>,
    }

    impl MockSessionStorage {
        /// Creates storage without sessions.
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates storage holding `token` for `account`.
        pub fn with_session(account: &str, token: SessionToken) -> Self {
            let storage = Self::new();
            storage.sessions.lock().insert(account.to_string(), token);
            storage
        }

        /// Returns whether `account` has a stored session.
        pub fn has_session(&self, account: &str) -> bool {
            self.sessions.lock().contains_key(account)
        }

        /// Accounts whose session was removed, in call order.
        pub fn removals(&self) -> Vec<String> {
            self.removals.lock().clone()
        }
    }

    #[async_trait]
    impl SessionStoragePort for MockSessionStorage {
        async fn load_session(&self, account: &str) -> Result<Option<SessionToken>, SessionError> {
            Ok(self.sessions.lock().get(account).cloned())
        }

        async fn save_session(&self, account: &str, token: &SessionToken) -> Result<(), SessionError> {
            self.sessions.lock().insert(account.to_string(), token.clone());
            Ok(())
        }

        async fn remove_session(&self, account: &str) -> Result<(), SessionError> {
            self.sessions.lock().remove(account);
            self.removals.lock().push(account.to_string());
            Ok(())
        }
    }
}
