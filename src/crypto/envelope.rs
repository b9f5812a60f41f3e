//! Encryption Envelope Manager.
//!
//! The mode is fixed when the manager is built from a [`CapabilityProfile`]
//! and never changes afterwards. The symmetric key is generated once per
//! manager and shared by every message it seals, so key rotation happens by
//! constructing a new manager.
//!
//! # Security
//!
//! - AES-256-GCM with a fresh random nonce per message (`nonce || ct+tag`)
//! - Mode and key reference are bound as associated data, so relabelling an
//!   envelope breaks authentication
//! - Key bytes are zeroized on drop and never leave this module

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{pqc, CapabilityProfile, CryptoError, DecryptionError};
use crate::domain::{
    EncryptionEnvelope, EncryptionMode, KemMetadata, KeyEstablishmentScope, ENVELOPE_VERSION,
};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEM_KDF_TAG: &[u8] = b"quantumhealth/envelope-key/v1\0";

struct SymmetricKey {
    bytes: Zeroizing<[u8; 32]>,
    key_ref: String,
}

impl SymmetricKey {
    fn new(bytes: Zeroizing<[u8; 32]>) -> Self {
        let key_ref = compute_key_ref(bytes.as_ref());
        Self { bytes, key_ref }
    }

    fn random() -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(bytes.as_mut());
        Self::new(bytes)
    }

    /// Derive the AES key from a KEM shared secret.
    fn from_shared_secret(shared_secret: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEM_KDF_TAG);
        hasher.update(shared_secret);
        let mut bytes = Zeroizing::new([0u8; 32]);
        bytes.copy_from_slice(&hasher.finalize());
        Self::new(bytes)
    }

    fn cipher(&self) -> Result<Aes256Gcm, String> {
        Aes256Gcm::new_from_slice(self.bytes.as_ref()).map_err(|e| e.to_string())
    }
}

/// Seals and opens [`EncryptionEnvelope`]s.
pub struct EnvelopeManager {
    mode: EncryptionMode,
    key: Option<SymmetricKey>,
    kem_mechanism: Option<&'static str>,
}

impl EnvelopeManager {
    /// Pick the mode from the profile and set up key material.
    ///
    /// No cipher means `Passthrough`. A working KEM means `HybridPqc`;
    /// if key establishment fails anyway the manager settles on
    /// `ClassicalFallback` for its whole lifetime.
    #[must_use]
    pub fn new(profile: &CapabilityProfile) -> Self {
        let manager = if !profile.cipher_available() {
            warn!("No cipher available, envelopes will carry plaintext in passthrough mode");
            Self {
                mode: EncryptionMode::Passthrough,
                key: None,
                kem_mechanism: None,
            }
        } else if profile.kem_available() {
            match pqc::establish_shared_secret() {
                Some(shared_secret) => Self {
                    mode: EncryptionMode::HybridPqc,
                    key: Some(SymmetricKey::from_shared_secret(&shared_secret)),
                    kem_mechanism: Some(profile.kem_name()),
                },
                None => {
                    warn!(kem = profile.kem_name(), "Key establishment failed, using classical fallback");
                    Self::classical()
                }
            }
        } else {
            Self::classical()
        };

        info!(
            mode = %manager.mode,
            key_ref = manager.key_ref().unwrap_or("none"),
            "Envelope manager ready"
        );
        manager
    }

    fn classical() -> Self {
        Self {
            mode: EncryptionMode::ClassicalFallback,
            key: Some(SymmetricKey::random()),
            kem_mechanism: None,
        }
    }

    #[must_use]
    pub fn mode(&self) -> EncryptionMode {
        self.mode
    }

    /// Identifier of the held key, `None` in passthrough mode.
    #[must_use]
    pub fn key_ref(&self) -> Option<&str> {
        self.key.as_ref().map(|k| k.key_ref.as_str())
    }

    /// Whether `envelope` was sealed by this manager's mode and key.
    #[must_use]
    pub fn owns(&self, envelope: &EncryptionEnvelope) -> bool {
        envelope.mode == self.mode && envelope.key_ref.as_deref() == self.key_ref()
    }

    /// Seal `plaintext` under the manager's mode.
    ///
    /// # Errors
    /// Returns error if the cipher rejects the input. The manager never
    /// downgrades to passthrough on failure.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptionEnvelope, CryptoError> {
        let Some(key) = &self.key else {
            return Ok(EncryptionEnvelope {
                version: ENVELOPE_VERSION,
                mode: EncryptionMode::Passthrough,
                ciphertext: plaintext.to_vec(),
                key_ref: None,
                kem: None,
            });
        };

        let cipher = key.cipher().map_err(CryptoError::Encryption)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let aad = associated_data(self.mode, &key.key_ref);

        let sealed = cipher
            .encrypt(&nonce, Payload { msg: plaintext, aad: &aad })
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut ciphertext = Vec::with_capacity(NONCE_LEN + sealed.len());
        ciphertext.extend_from_slice(nonce.as_slice());
        ciphertext.extend_from_slice(&sealed);

        debug!(mode = %self.mode, size = plaintext.len(), "Payload sealed");

        Ok(EncryptionEnvelope {
            version: ENVELOPE_VERSION,
            mode: self.mode,
            ciphertext,
            key_ref: Some(key.key_ref.clone()),
            kem: self.kem_mechanism.map(|mechanism| KemMetadata {
                mechanism: mechanism.to_string(),
                scope: KeyEstablishmentScope::PerManager,
            }),
        })
    }

    /// Open an envelope sealed by this manager.
    ///
    /// # Errors
    /// Returns error if the envelope's mode or key reference does not match
    /// this manager, or if authentication fails. Ciphertext is never
    /// returned as plaintext.
    pub fn decrypt(&self, envelope: &EncryptionEnvelope) -> Result<Vec<u8>, DecryptionError> {
        if envelope.version != ENVELOPE_VERSION {
            return Err(DecryptionError::Malformed(format!(
                "unsupported version {}",
                envelope.version
            )));
        }
        if envelope.mode != self.mode {
            return Err(DecryptionError::ModeMismatch {
                expected: self.mode,
                found: envelope.mode,
            });
        }

        let Some(key) = &self.key else {
            if envelope.key_ref.is_some() {
                return Err(DecryptionError::Malformed(
                    "passthrough envelope carries a key reference".to_string(),
                ));
            }
            return Ok(envelope.ciphertext.clone());
        };

        if envelope.key_ref.as_deref() != Some(key.key_ref.as_str()) {
            return Err(DecryptionError::KeyMismatch);
        }
        if envelope.ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(DecryptionError::Malformed("ciphertext too short".to_string()));
        }

        let (nonce, sealed) = envelope.ciphertext.split_at(NONCE_LEN);
        let cipher = key
            .cipher()
            .map_err(DecryptionError::Malformed)?;
        let aad = associated_data(self.mode, &key.key_ref);

        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad: &aad })
            .map_err(|_| DecryptionError::Authentication)
    }
}

// Never print key bytes.
impl std::fmt::Debug for EnvelopeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeManager")
            .field("mode", &self.mode)
            .field("key_ref", &self.key_ref())
            .field("kem_mechanism", &self.kem_mechanism)
            .finish()
    }
}

fn associated_data(mode: EncryptionMode, key_ref: &str) -> Vec<u8> {
    format!("quantumhealth/envelope/v{ENVELOPE_VERSION}|{mode}|{key_ref}").into_bytes()
}

/// Key reference: SHA-256 of the key, first 8 bytes in hex.
fn compute_key_ref(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
