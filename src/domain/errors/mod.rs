//! Domain error types.

mod cache_error;
mod fetch_error;
mod session_error;
mod store_error;

pub use cache_error::{CacheError, CacheResult};
pub use fetch_error::FetchError;
pub use session_error::SessionError;
pub use store_error::StoreError;
