//! Image payload submitted alongside clinical data.
//!
//! The bytes are opaque to this crate; only the inference engine interprets
//! them. The encoding tag is sniffed from magic bytes for logging and for
//! engines that care.

use base64::engine::general_purpose;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Upper bound on decoded image size.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Declared or sniffed encoding of an image payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageEncoding {
    Png,
    Jpeg,
    Unknown,
}

impl ImageEncoding {
    /// Identify the encoding from leading magic bytes.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
            Self::Png
        } else if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
            Self::Jpeg
        } else {
            Self::Unknown
        }
    }
}

/// Decoded image bytes plus their encoding tag.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    bytes: Vec<u8>,
    encoding: ImageEncoding,
}

impl ImagePayload {
    /// Wrap raw image bytes.
    ///
    /// # Errors
    /// Returns error if the payload is empty or larger than [`MAX_IMAGE_BYTES`].
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, String> {
        if bytes.is_empty() {
            return Err("Image payload is empty".to_string());
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(format!(
                "Image payload is {} bytes, limit is {MAX_IMAGE_BYTES}",
                bytes.len()
            ));
        }
        let encoding = ImageEncoding::sniff(&bytes);
        Ok(Self { bytes, encoding })
    }

    /// Decode a standard base64 image string as sent by clients.
    ///
    /// # Errors
    /// Returns error if the string is not valid base64 or the result is unusable.
    pub fn from_base64(encoded: &str) -> Result<Self, String> {
        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| format!("Invalid image data: {e}"))?;
        Self::from_bytes(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn encoding(&self) -> ImageEncoding {
        self.encoding
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The first `max_len` bytes (or the whole payload if shorter).
    #[must_use]
    pub fn prefix(&self, max_len: usize) -> &[u8] {
        &self.bytes[..self.bytes.len().min(max_len)]
    }
}

// Image bytes are patient data; never print them.
impl std::fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePayload")
            .field("encoding", &self.encoding)
            .field("size_bytes", &self.bytes.len())
            .finish()
    }
}
