//! Content fingerprints used as prediction cache keys.
//!
//! A fingerprint is SHA-256 over the scaled clinical vector and a bounded
//! prefix of the image bytes. Images that agree on that prefix map to the
//! same fingerprint. This trades precision for hashing cost: a collision
//! only ever yields a stale cache hit, the key never gates access.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{ClinicalFeatureVector, ImagePayload};

/// Default number of image bytes that participate in the fingerprint.
///
/// 75 raw bytes correspond to the first 100 characters of the base64 form
/// clients submit.
pub const DEFAULT_IMAGE_PREFIX_BYTES: usize = 75;

const DOMAIN_TAG: &[u8] = b"quantumhealth/fingerprint/v1\0";

/// Deterministic cache key (lowercase hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives fingerprints with a fixed image prefix length.
#[derive(Debug, Clone, Copy)]
pub struct FingerprintGenerator {
    prefix_len: usize,
}

impl Default for FingerprintGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_PREFIX_BYTES)
    }
}

impl FingerprintGenerator {
    #[must_use]
    pub fn new(prefix_len: usize) -> Self {
        Self { prefix_len }
    }

    #[must_use]
    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    /// Fingerprint a scaled clinical vector and an image.
    #[must_use]
    pub fn fingerprint(&self, features: &ClinicalFeatureVector, image: &ImagePayload) -> Fingerprint {
        self.fingerprint_prefix(features, image.prefix(self.prefix_len))
    }

    /// Fingerprint a scaled clinical vector and an already-truncated image prefix.
    ///
    /// Bytes beyond the configured prefix length are ignored.
    #[must_use]
    pub fn fingerprint_prefix(&self, features: &ClinicalFeatureVector, image_prefix: &[u8]) -> Fingerprint {
        let prefix = &image_prefix[..image_prefix.len().min(self.prefix_len)];

        let mut hasher = Sha256::new();
        hasher.update(DOMAIN_TAG);

        let values = features.as_slice();
        hasher.update((values.len() as u32).to_be_bytes());
        for value in values {
            // Fold -0.0 into 0.0 so equal values always hash equally.
            let canonical = if *value == 0.0 { 0.0f64 } else { *value };
            hasher.update(canonical.to_bits().to_be_bytes());
        }

        hasher.update((prefix.len() as u32).to_be_bytes());
        hasher.update(prefix);

        let digest = hasher.finalize();
        Fingerprint(digest.iter().map(|b| format!("{b:02x}")).collect())
    }
}
