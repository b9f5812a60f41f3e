//! Capability negotiation.
//!
//! Resolved once at startup and handed to every component constructor.
//! Nothing downstream re-checks the primitives.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm};
use serde::Serialize;
use tracing::{info, warn};

use super::pqc;

/// Operator overrides applied on top of the self-tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CryptoConfig {
    /// Treat the KEM as unavailable even if it works
    pub disable_kem: bool,

    /// Treat the signature mechanism as unavailable even if it works
    pub disable_sig: bool,
}

/// Which cryptographic mechanisms are usable for this process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityProfile {
    kem_available: bool,
    sig_available: bool,
    cipher_available: bool,
    kem_name: &'static str,
    sig_name: &'static str,
}

impl CapabilityProfile {
    /// Check the installed primitives. Never fails: anything that errors or
    /// panics during its self-test is reported as unavailable.
    #[must_use]
    pub fn negotiate(config: &CryptoConfig) -> Self {
        let kem_available = !config.disable_kem && self_test("kem", pqc::kem_self_test);
        let sig_available = !config.disable_sig && self_test("signature", pqc::sig_self_test);
        let cipher_available = self_test("cipher", cipher_self_test);

        let profile = Self {
            kem_available,
            sig_available,
            cipher_available,
            kem_name: pqc::KEM_NAME,
            sig_name: pqc::SIG_NAME,
        };

        info!(
            kem = profile.kem_available,
            sig = profile.sig_available,
            cipher = profile.cipher_available,
            "Capability profile negotiated"
        );
        if config.disable_kem || config.disable_sig {
            info!(
                disable_kem = config.disable_kem,
                disable_sig = config.disable_sig,
                "Operator overrides applied"
            );
        }

        profile
    }

    /// Build a profile with fixed flags, skipping self-tests.
    #[must_use]
    pub fn assumed(kem_available: bool, sig_available: bool, cipher_available: bool) -> Self {
        Self {
            kem_available,
            sig_available,
            cipher_available,
            kem_name: pqc::KEM_NAME,
            sig_name: pqc::SIG_NAME,
        }
    }

    #[must_use]
    pub fn kem_available(&self) -> bool {
        self.kem_available
    }

    #[must_use]
    pub fn sig_available(&self) -> bool {
        self.sig_available
    }

    #[must_use]
    pub fn cipher_available(&self) -> bool {
        self.cipher_available
    }

    #[must_use]
    pub fn kem_name(&self) -> &'static str {
        self.kem_name
    }

    #[must_use]
    pub fn sig_name(&self) -> &'static str {
        self.sig_name
    }
}

fn self_test(mechanism: &str, test: fn() -> bool) -> bool {
    match std::panic::catch_unwind(test) {
        Ok(true) => true,
        Ok(false) => {
            warn!(mechanism, "Self-test failed, mechanism unavailable");
            false
        }
        Err(_) => {
            warn!(mechanism, "Self-test panicked, mechanism unavailable");
            false
        }
    }
}

fn cipher_self_test() -> bool {
    let key = Aes256Gcm::generate_key(&mut OsRng);
    let cipher = Aes256Gcm::new(&key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let message = b"quantumhealth cipher self-test";

    let Ok(sealed) = cipher.encrypt(&nonce, message.as_ref()) else {
        return false;
    };
    matches!(cipher.decrypt(&nonce, sealed.as_ref()), Ok(opened) if opened == message)
}
