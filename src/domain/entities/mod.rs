//! Domain entity definitions.

mod image;
mod session_token;
mod target;

pub use image::{CacheKey, CachedImage, ImageSource};
pub use session_token::SessionToken;
pub use target::TargetId;
