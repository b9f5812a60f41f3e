//! Domain layer: Core business types and logic.
//!
//! Pure types with no I/O. Validation happens at construction.

mod clinical;
mod clock;
mod envelope;
mod fingerprint;
mod image;
mod prediction;
mod record;

pub use clinical::{ClinicalData, ClinicalFeatureVector, FEATURE_COUNT, FEATURE_NAMES};
pub use clock::{Clock, ManualClock, SystemClock};
pub use envelope::{
    EncryptionEnvelope, EncryptionMode, KemMetadata, KeyEstablishmentScope, ENVELOPE_VERSION,
};
pub use fingerprint::{Fingerprint, FingerprintGenerator, DEFAULT_IMAGE_PREFIX_BYTES};
pub use image::{ImageEncoding, ImagePayload, MAX_IMAGE_BYTES};
pub use prediction::{
    AssemblyError, PredictionResult, ResultAssembler, RiskLevel, PROBABILITY_SUM_TOLERANCE,
};
pub use record::{canonical_payload, SignedRecord, StoredRecord, VerificationOutcome};
