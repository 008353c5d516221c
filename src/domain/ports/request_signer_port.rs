//! Request signing capability provided by the session subsystem.

use reqwest::RequestBuilder;

/// Port that authenticates outbound image requests.
pub trait RequestSignerPort: Send + Sync {
    /// Signs the request. Returns it unmodified when there is no valid
    /// session; the server then rejects it like any other failed fetch.
    fn sign(&self, request: RequestBuilder) -> RequestBuilder;

    /// Returns whether a valid session is available.
    fn has_session(&self) -> bool;
}

/// Signer for anonymous access.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsignedRequests;

impl RequestSignerPort for UnsignedRequests {
    fn sign(&self, request: RequestBuilder) -> RequestBuilder {
        request
    }

    fn has_session(&self) -> bool {
        false
    }
}
