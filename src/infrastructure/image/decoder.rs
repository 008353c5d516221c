//! Image decoding.

use image::DynamicImage;
use image::imageops::FilterType;

use crate::domain::errors::FetchError;

/// Turns downloaded bytes into a decoded image.
///
/// Pure and synchronous; the pipeline runs it on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder {
    max_dimension: Option<u32>,
}

impl ImageDecoder {
    /// Creates a decoder that keeps images at their original size.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_dimension: None,
        }
    }

    /// Creates a decoder that downscales images whose larger side exceeds
    /// `max_dimension`, preserving aspect ratio.
    #[must_use]
    pub const fn with_max_dimension(max_dimension: u32) -> Self {
        Self {
            max_dimension: Some(max_dimension),
        }
    }

    /// Decodes `bytes`.
    ///
    /// # Errors
    /// Returns `FetchError::Decode` for empty, truncated or unrecognised input.
    pub fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, FetchError> {
        if bytes.is_empty() {
            return Err(FetchError::decode("empty response body"));
        }

        let img = image::load_from_memory(bytes)
            .map_err(|e| FetchError::decode(format!("failed to decode image: {e}")))?;

        match self.max_dimension {
            Some(max) if img.width() > max || img.height() > max => {
                Ok(img.resize(max, max, FilterType::Lanczos3))
            }
            _ => Ok(img),
        }
    }
}
