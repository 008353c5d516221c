//! OS keyring session storage, one credential per collection account.

use async_trait::async_trait;
use keyring::Entry;
use tracing::{debug, warn};

use crate::domain::entities::SessionToken;
use crate::domain::errors::SessionError;
use crate::domain::ports::SessionStoragePort;

const KEYRING_SERVICE: &str = "coverfetch";

/// Keyring adapter; the account name is the credential's user.
pub struct KeyringSessionStorage {
    service: String,
}

impl KeyringSessionStorage {
    /// Creates storage under the `coverfetch` keyring service.
    #[must_use]
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    /// Stores credentials under a different keyring service.
    #[must_use]
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, account: &str) -> Result<Entry, SessionError> {
        if account.trim().is_empty() {
            return Err(SessionError::AccessFailed(
                "account name must not be empty".to_string(),
            ));
        }
        Entry::new(&self.service, account).map_err(|e| {
            SessionError::AccessFailed(format!("keyring entry for {account}: {e}"))
        })
    }
}

impl Default for KeyringSessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStoragePort for KeyringSessionStorage {
    async fn load_session(&self, account: &str) -> Result<Option<SessionToken>, SessionError> {
        match self.entry(account)?.get_password() {
            Ok(secret) => {
                debug!(account, "Session found in keyring");
                Ok(Some(SessionToken::new_unchecked(secret)))
            }
            Err(keyring::Error::NoEntry) => {
                debug!(account, "No session in keyring");
                Ok(None)
            }
            Err(e) => {
                warn!(account, error = %e, "Keyring read failed");
                Err(SessionError::RetrievalFailed(e.to_string()))
            }
        }
    }

    async fn save_session(&self, account: &str, token: &SessionToken) -> Result<(), SessionError> {
        self.entry(account)?
            .set_password(token.as_str())
            .map_err(|e| {
                warn!(account, error = %e, "Keyring write failed");
                SessionError::StorageFailed(e.to_string())
            })?;
        debug!(account, token = %token, "Session saved to keyring");
        Ok(())
    }

    async fn remove_session(&self, account: &str) -> Result<(), SessionError> {
        match self.entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => {
                warn!(account, error = %e, "Keyring delete failed");
                Err(SessionError::DeletionFailed(e.to_string()))
            }
        }
    }
}
