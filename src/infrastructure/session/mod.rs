//! Session adapters: request signing and token persistence.

mod keyring_storage;
mod signer;

pub use keyring_storage::KeyringSessionStorage;
pub use signer::{DEFAULT_AUTH_SCHEME, SessionSigner};
