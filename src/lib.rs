//! # QuantumHealth
//!
//! Multimodal medical risk prediction with capability-aware encryption.
//!
//! This crate provides:
//! - Content-fingerprinted cache-aside inference
//! - Encryption envelopes that degrade from hybrid post-quantum to classical
//!   to passthrough depending on what the runtime can actually do
//! - Signed record uploads with a three-state verification outcome
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core types (clinical input, fingerprints, predictions, envelopes, records)
//! - `crypto`: Capability negotiation, envelope manager, signature verifier
//! - `ports`: Trait definitions for inference, cache and record store
//! - `adapters`: Concrete implementations (memory/Redis cache, SQLite, linear model)
//! - `application`: Use cases orchestrating domain and ports
//! - `config`: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod ports;

pub use domain::{PredictionResult, RiskLevel, VerificationOutcome};

/// Result type for QuantumHealth operations
pub type Result<T> = std::result::Result<T, QuantumHealthError>;

/// Coarse error classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input; do not retry
    Validation,
    /// A dependency is down and the operation cannot degrade
    ServiceUnavailable,
    /// The inference collaborator failed
    Inference,
    /// Envelope does not belong to this manager or was tampered with
    Decryption,
    /// Upload refused by signature policy
    SignatureRejected,
    Internal,
}

/// Main error type for QuantumHealth
#[derive(Debug, thiserror::Error)]
pub enum QuantumHealthError {
    #[error("Invalid input: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Inference failed: {0}")]
    Inference(#[from] ports::InferenceError),

    #[error("Encryption failed: {0}")]
    Encryption(#[from] crypto::CryptoError),

    #[error("Decryption failed: {0}")]
    Decryption(#[from] crypto::DecryptionError),

    #[error("Record signature rejected")]
    SignatureRejected,

    #[error("Record signature could not be verified ({mechanism} unavailable)")]
    SignatureUnverifiable { mechanism: &'static str },

    #[error("Storage operation failed: {0}")]
    Storage(#[from] ports::StoreError),

    #[error("Cache operation failed: {0}")]
    Cache(#[from] ports::CacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuantumHealthError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::ServiceUnavailable(_)
            | Self::Storage(ports::StoreError::Unavailable)
            | Self::Cache(ports::CacheError::Unavailable) => ErrorKind::ServiceUnavailable,
            Self::Inference(_) => ErrorKind::Inference,
            Self::Decryption(_) => ErrorKind::Decryption,
            Self::SignatureRejected | Self::SignatureUnverifiable { .. } => ErrorKind::SignatureRejected,
            Self::Encryption(_)
            | Self::Storage(_)
            | Self::Cache(_)
            | Self::Config(_)
            | Self::Serialization(_)
            | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Inference(ports::InferenceError::ModelNotLoaded) => "MODEL_NOT_LOADED",
            Self::Inference(_) => "INFERENCE_ERROR",
            Self::Encryption(_) => "ENCRYPTION_ERROR",
            Self::Decryption(_) => "DECRYPTION_ERROR",
            Self::SignatureRejected => "SIGNATURE_REJECTED",
            Self::SignatureUnverifiable { .. } => "SIGNATURE_UNVERIFIABLE",
            Self::Storage(ports::StoreError::Unavailable) => "STORE_UNAVAILABLE",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Cache(ports::CacheError::Unavailable) => "CACHE_UNAVAILABLE",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// HTTP-equivalent status for front ends that speak HTTP.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::SignatureRejected => 422,
            ErrorKind::ServiceUnavailable => 503,
            ErrorKind::Inference | ErrorKind::Decryption | ErrorKind::Internal => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_mapping() {
        let validation = QuantumHealthError::Validation(vec!["age missing".into(), "bmi missing".into()]);
        assert_eq!(validation.kind(), ErrorKind::Validation);
        assert_eq!(validation.status_code(), 400);
        assert_eq!(validation.to_string(), "Invalid input: age missing; bmi missing");

        let unverifiable = QuantumHealthError::SignatureUnverifiable { mechanism: "Dilithium5" };
        assert_eq!(unverifiable.kind(), ErrorKind::SignatureRejected);
        assert_eq!(unverifiable.status_code(), 422);
        assert_eq!(unverifiable.code(), "SIGNATURE_UNVERIFIABLE");

        let store_down: QuantumHealthError = ports::StoreError::Unavailable.into();
        assert_eq!(store_down.status_code(), 503);

        let not_loaded: QuantumHealthError = ports::InferenceError::ModelNotLoaded.into();
        assert_eq!(not_loaded.code(), "MODEL_NOT_LOADED");
        assert_eq!(not_loaded.status_code(), 500);

        let mismatch: QuantumHealthError = crypto::DecryptionError::KeyMismatch.into();
        assert_eq!(mismatch.kind(), ErrorKind::Decryption);
    }
}
