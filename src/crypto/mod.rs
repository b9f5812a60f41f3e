//! Cryptographic components: capability negotiation, envelope encryption
//! and signature verification.

mod capability;
mod envelope;
pub mod pqc;
mod signature;

pub use capability::{CapabilityProfile, CryptoConfig};
pub use envelope::EnvelopeManager;
pub use signature::{SignatureVerifier, VerificationPolicy};

use crate::domain::EncryptionMode;

/// Error type for sealing operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),
}

/// Reasons an envelope cannot be opened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecryptionError {
    #[error("Envelope mode {found} does not match manager mode {expected}")]
    ModeMismatch {
        expected: EncryptionMode,
        found: EncryptionMode,
    },

    #[error("Envelope was sealed under a different key")]
    KeyMismatch,

    #[error("Decryption failed: authentication tag mismatch")]
    Authentication,

    #[error("Malformed envelope: {0}")]
    Malformed(String),
}
