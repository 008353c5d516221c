//! Token-based request signer.

use parking_lot::RwLock;
use reqwest::{RequestBuilder, header};
use tracing::{debug, info, warn};

use crate::domain::entities::SessionToken;
use crate::domain::errors::SessionError;
use crate::domain::ports::{RequestSignerPort, SessionStoragePort};

/// Authorization scheme used by the Discogs image servers.
pub const DEFAULT_AUTH_SCHEME: &str = "Discogs";

/// Signs requests with the current session token, if any.
///
/// Produces `Authorization: <scheme> token=<token>`.
pub struct SessionSigner {
    scheme: String,
    token: RwLock<Option<SessionToken>>,
}

impl SessionSigner {
    /// Creates a signer without a session.
    #[must_use]
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            token: RwLock::new(None),
        }
    }

    /// Installs the session token used for subsequent requests.
    pub fn set_session(&self, token: SessionToken) {
        debug!(token = %token, "Session installed");
        *self.token.write() = Some(token);
    }

    /// Drops the session; subsequent requests go out unsigned.
    pub fn clear_session(&self) {
        if self.token.write().take().is_some() {
            debug!("Session cleared");
        }
    }

    /// Restores the session stored for `account`.
    ///
    /// A stored value that no longer passes token validation is removed
    /// from storage and ignored. Returns whether a session was installed.
    ///
    /// # Errors
    /// Returns error if the storage cannot be read.
    pub async fn restore(
        &self,
        storage: &dyn SessionStoragePort,
        account: &str,
    ) -> Result<bool, SessionError> {
        let Some(stored) = storage.load_session(account).await? else {
            return Ok(false);
        };

        let Some(token) = SessionToken::new(stored.as_str()) else {
            warn!(account, "Discarding malformed stored session");
            if let Err(e) = storage.remove_session(account).await {
                warn!(account, error = %e, "Failed to remove malformed session");
            }
            return Ok(false);
        };

        info!(account, token = %token, "Restored stored session");
        self.set_session(token);
        Ok(true)
    }
}

impl Default for SessionSigner {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_SCHEME)
    }
}

impl std::fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSigner")
            .field("scheme", &self.scheme)
            .field("token", &*self.token.read())
            .finish()
    }
}

impl RequestSignerPort for SessionSigner {
    fn sign(&self, request: RequestBuilder) -> RequestBuilder {
        match &*self.token.read() {
            Some(token) => request.header(
                header::AUTHORIZATION,
                format!("{} token={}", self.scheme, token.as_str()),
            ),
            None => request,
        }
    }

    fn has_session(&self) -> bool {
        self.token.read().is_some()
    }
}
