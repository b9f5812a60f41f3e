//! Signature verification with an explicit "could not check" outcome.

use tracing::{debug, warn};

use super::{pqc, CapabilityProfile};
use crate::domain::VerificationOutcome;

/// Checks detached signatures over record payloads.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    sig_available: bool,
    mechanism: &'static str,
}

impl SignatureVerifier {
    #[must_use]
    pub fn new(profile: &CapabilityProfile) -> Self {
        Self {
            sig_available: profile.sig_available(),
            mechanism: profile.sig_name(),
        }
    }

    #[must_use]
    pub fn mechanism(&self) -> &'static str {
        self.mechanism
    }

    /// Verify `signature` over `message` under `public_key`.
    ///
    /// Empty inputs are rejected outright. If the mechanism is unavailable
    /// the result is `Unverifiable`, never `Verified`.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &[u8], public_key: &[u8]) -> VerificationOutcome {
        if signature.is_empty() || public_key.is_empty() {
            debug!("Empty signature or public key");
            return VerificationOutcome::Rejected;
        }
        if !self.sig_available {
            warn!(mechanism = self.mechanism, "Signature mechanism unavailable, record unverifiable");
            return VerificationOutcome::Unverifiable;
        }

        match pqc::verify_detached(message, signature, public_key) {
            Some(true) => VerificationOutcome::Verified,
            Some(false) => VerificationOutcome::Rejected,
            None => VerificationOutcome::Unverifiable,
        }
    }
}

/// Gate applied by callers to a [`VerificationOutcome`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerificationPolicy {
    /// Accept `Unverifiable` records. Off by default.
    pub allow_unverified_fallback: bool,
}

impl VerificationPolicy {
    /// Whether an outcome passes the gate.
    #[must_use]
    pub fn admits(&self, outcome: VerificationOutcome) -> bool {
        match outcome {
            VerificationOutcome::Verified => true,
            VerificationOutcome::Rejected => false,
            VerificationOutcome::Unverifiable => self.allow_unverified_fallback,
        }
    }
}
