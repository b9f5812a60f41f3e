//! Prediction service: the external operations of the system.
//!
//! This service coordinates:
//! - Input normalization and fingerprinting
//! - Cache-aside inference with envelope encryption
//! - Signed record uploads gated by verification policy
//! - Best-effort persistence and record caching
//! - Health reporting

use std::sync::Arc;

use base64::engine::general_purpose;
use base64::Engine;
use tracing::{debug, info, warn};

use super::cache_aside::CacheOrchestrator;
use super::dto::{
    HealthResponse, PredictRequest, PredictResponse, UploadRecordRequest, UploadRecordResponse,
    UploadStatus,
};
use crate::config::AppConfig;
use crate::crypto::{CapabilityProfile, EnvelopeManager, SignatureVerifier, VerificationPolicy};
use crate::domain::{
    canonical_payload, Clock, EncryptionEnvelope, EncryptionMode, FingerprintGenerator,
    ImagePayload, PredictionResult, ResultAssembler, SignedRecord, StoredRecord,
    VerificationOutcome,
};
use crate::ports::{CacheKey, CacheStore, InferenceEngine, InferenceError, RecordStore, Ttl};
use crate::{QuantumHealthError, Result};

/// Tunables the service reads at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub prediction_ttl: Ttl,
    pub health_record_ttl: Ttl,
    /// TTL of `patient:` entries
    pub default_ttl: Ttl,
    pub fingerprint_prefix_bytes: usize,
    pub single_flight: bool,
    pub policy: VerificationPolicy,
}

impl From<&AppConfig> for ServiceSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            prediction_ttl: config.cache.prediction_ttl,
            health_record_ttl: config.cache.health_record_ttl,
            default_ttl: config.cache.default_ttl,
            fingerprint_prefix_bytes: config.fingerprint_prefix_bytes,
            single_flight: config.single_flight,
            policy: config.policy,
        }
    }
}

/// Service exposing `predict`, `upload_record` and `health`.
///
/// The capability profile is resolved once by the caller and handed in; the
/// envelope manager and signature verifier are built from it here and never
/// re-check.
pub struct PredictionService<E, C, R>
where
    E: InferenceEngine,
    C: CacheStore,
    R: RecordStore,
{
    engine: Arc<E>,
    cache: Arc<C>,
    records: Arc<R>,
    orchestrator: CacheOrchestrator<C>,
    envelopes: EnvelopeManager,
    verifier: SignatureVerifier,
    profile: CapabilityProfile,
    fingerprints: FingerprintGenerator,
    settings: ServiceSettings,
    clock: Arc<dyn Clock>,
}

impl<E, C, R> PredictionService<E, C, R>
where
    E: InferenceEngine,
    C: CacheStore,
    R: RecordStore,
{
    /// Create a new prediction service.
    pub fn new(
        engine: Arc<E>,
        cache: Arc<C>,
        records: Arc<R>,
        profile: CapabilityProfile,
        settings: ServiceSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let orchestrator =
            CacheOrchestrator::new(Arc::clone(&cache), Arc::clone(&clock), settings.single_flight);
        let envelopes = EnvelopeManager::new(&profile);
        let verifier = SignatureVerifier::new(&profile);

        info!(
            model_loaded = engine.is_loaded(),
            cache_connected = cache.is_connected(),
            database_connected = records.is_connected(),
            encryption_mode = %envelopes.mode(),
            single_flight = settings.single_flight,
            allow_unverified_fallback = settings.policy.allow_unverified_fallback,
            "Prediction service initialized"
        );

        Self {
            engine,
            cache,
            records,
            orchestrator,
            envelopes,
            verifier,
            profile,
            fingerprints: FingerprintGenerator::new(settings.fingerprint_prefix_bytes),
            settings,
            clock,
        }
    }

    /// Run (or recall) a prediction for one clinical record and image.
    ///
    /// # Errors
    /// Returns `Validation` for malformed input, `Inference` if the model is
    /// missing or fails, `Encryption` if sealing fails. Cache outages are
    /// not errors.
    pub fn predict(&self, request: &PredictRequest) -> Result<PredictResponse> {
        let features = request
            .clinical_data
            .normalize()
            .map_err(QuantumHealthError::Validation)?;
        let image = ImagePayload::from_base64(&request.image_base64)
            .map_err(|e| QuantumHealthError::Validation(vec![e]))?;

        if !self.engine.is_loaded() {
            return Err(InferenceError::ModelNotLoaded.into());
        }

        let fingerprint = self.fingerprints.fingerprint(&features, &image);
        debug!(
            encoding = ?image.encoding(),
            image_bytes = image.len(),
            "Prediction request fingerprinted"
        );

        let outcome = self
            .orchestrator
            .get_or_compute(&fingerprint, self.settings.prediction_ttl, || -> Result<_> {
                let probabilities = self.engine.infer(&image, &features)?;
                let result = ResultAssembler::new(self.engine.high_severity_class())
                    .assemble(&probabilities, self.engine.class_names())
                    .map_err(InferenceError::from)?;
                let plaintext = serde_json::to_vec(&result)?;
                let envelope = self.envelopes.encrypt(&plaintext)?;
                Ok((result, envelope))
            })?;

        info!(
            predicted_class = %outcome.result.predicted_class,
            risk_level = %outcome.result.risk_level,
            cache_hit = outcome.hit,
            "Prediction served"
        );

        Ok(PredictResponse {
            confidence: outcome.result.confidence(),
            encrypted_prediction: outcome.envelope.to_base64()?,
            prediction: outcome.result,
            cache_hit: outcome.hit,
        })
    }

    /// Open an `encrypted_prediction` produced by this service instance.
    ///
    /// # Errors
    /// Returns `Validation` if the string is not an envelope, `Decryption`
    /// if it belongs to another manager or was tampered with.
    pub fn open_prediction(&self, encrypted_prediction: &str) -> Result<PredictionResult> {
        let envelope = EncryptionEnvelope::from_base64(encrypted_prediction)
            .map_err(|e| QuantumHealthError::Validation(vec![e]))?;
        let plaintext = self.envelopes.decrypt(&envelope)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Verify and store a signed health record.
    ///
    /// Persistence is best-effort: a record the policy admits is acknowledged
    /// even if the store is down, with `database_used = false`.
    ///
    /// # Errors
    /// Returns `Validation` for malformed input, `SignatureRejected` or
    /// `SignatureUnverifiable` when the verification policy refuses the record.
    pub fn upload_record(&self, request: &UploadRecordRequest) -> Result<UploadRecordResponse> {
        let patient_id = request.patient_id.trim();
        let mut errors = Vec::new();
        if patient_id.is_empty() {
            errors.push("patient_id must not be empty".to_string());
        }
        if !request.patient_data.is_object() {
            errors.push("patient_data must be a JSON object".to_string());
        }
        let signature = decode_field("signature", &request.signature, &mut errors);
        let public_key = decode_field("public_key", &request.public_key, &mut errors);
        if !errors.is_empty() {
            return Err(QuantumHealthError::Validation(errors));
        }

        let message = canonical_payload(&request.patient_data)?;
        let verification = self.verifier.verify(&message, &signature, &public_key);

        if !self.settings.policy.admits(verification) {
            warn!(verification = %verification, "Record upload refused by verification policy");
            return Err(match verification {
                VerificationOutcome::Unverifiable => QuantumHealthError::SignatureUnverifiable {
                    mechanism: self.verifier.mechanism(),
                },
                _ => QuantumHealthError::SignatureRejected,
            });
        }
        if verification == VerificationOutcome::Unverifiable {
            warn!("Accepting unverifiable record because fallback is explicitly allowed");
        }

        let record = SignedRecord::new(
            patient_id,
            request.patient_data.clone(),
            request.signature.trim(),
            request.public_key.trim(),
            verification,
            self.clock.now(),
        );

        let database_used = match self.records.upsert(&record) {
            Ok(outcome) => {
                info!(?outcome, verification = %verification, "Record persisted");
                true
            }
            Err(e) => {
                warn!(error = %e, "Record store unavailable, acknowledging without persistence");
                false
            }
        };

        self.cache_record(&StoredRecord::from(&record));
        self.cache_patient_data(patient_id, &record.payload);

        let (status, message) = if database_used {
            (UploadStatus::Success, "Health record stored".to_string())
        } else {
            (
                UploadStatus::Accepted,
                "Health record accepted but not persisted; retry later to make it durable".to_string(),
            )
        };

        Ok(UploadRecordResponse {
            status,
            message,
            patient_id: patient_id.to_string(),
            database_used,
            verification,
        })
    }

    /// Up to `limit` stored records for a patient, newest first.
    ///
    /// # Errors
    /// Returns `Storage` if the record store is down or the read fails.
    pub fn recent_records(&self, patient_id: &str, limit: usize) -> Result<Vec<StoredRecord>> {
        Ok(self.records.list_by_patient(patient_id, limit)?)
    }

    /// The patient's latest record, from cache when possible.
    ///
    /// # Errors
    /// Returns `Storage` if the record is not cached and the store fails.
    pub fn latest_record(&self, patient_id: &str) -> Result<Option<StoredRecord>> {
        let key = CacheKey::HealthRecord.key(patient_id);
        match self.cache.get(&key) {
            Ok(Some(raw)) => match serde_json::from_str::<StoredRecord>(&raw) {
                Ok(record) => {
                    debug!("Latest record served from cache");
                    return Ok(Some(record));
                }
                Err(e) => {
                    warn!(error = %e, "Discarding corrupt cached record");
                    self.forget(&key);
                }
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Cache read failed, falling back to record store"),
        }

        let latest = self.records.list_by_patient(patient_id, 1)?.into_iter().next();
        if let Some(record) = &latest {
            self.cache_record(record);
        }
        Ok(latest)
    }

    /// The patient's current `patient_data`, from cache when possible.
    ///
    /// A miss reads through [`Self::latest_record`] and caches the payload
    /// under `patient:<id>` for the default TTL.
    ///
    /// # Errors
    /// Returns `Storage` if neither cache holds the data and the store fails.
    pub fn patient_data(&self, patient_id: &str) -> Result<Option<serde_json::Value>> {
        let key = CacheKey::Patient.key(patient_id);
        match self.cache.get(&key) {
            Ok(Some(raw)) => match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(data) => {
                    debug!("Patient data served from cache");
                    return Ok(Some(data));
                }
                Err(e) => {
                    warn!(error = %e, "Discarding corrupt cached patient data");
                    self.forget(&key);
                }
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Cache read failed, falling back to record store"),
        }

        let data = self.latest_record(patient_id)?.map(|record| record.payload);
        if let Some(data) = &data {
            self.cache_patient_data(patient_id, data);
        }
        Ok(data)
    }

    /// Drop every cached entry for a patient. Returns how many were removed.
    pub fn invalidate_patient(&self, patient_id: &str) -> usize {
        [CacheKey::HealthRecord, CacheKey::Patient]
            .iter()
            .filter(|ns| self.forget(&ns.key(patient_id)))
            .count()
    }

    /// Dependency status. `ok` requires model, store and cache.
    pub fn health(&self) -> HealthResponse {
        HealthResponse::new(
            self.engine.is_loaded(),
            self.records.is_connected(),
            self.cache.is_connected(),
            self.envelopes.mode(),
        )
    }

    #[must_use]
    pub fn capabilities(&self) -> &CapabilityProfile {
        &self.profile
    }

    #[must_use]
    pub fn encryption_mode(&self) -> EncryptionMode {
        self.envelopes.mode()
    }

    /// Close cache and store handles.
    pub fn shutdown(&self) {
        self.cache.close();
        self.records.close();
        info!("Prediction service shut down");
    }

    fn cache_record(&self, record: &StoredRecord) {
        let key = CacheKey::HealthRecord.key(&record.patient_id);
        match serde_json::to_string(record) {
            Ok(raw) => {
                if let Err(e) = self.cache.set(&key, &raw, self.settings.health_record_ttl) {
                    warn!(error = %e, "Record cache write failed");
                }
            }
            Err(e) => warn!(error = %e, "Record cache serialization failed"),
        }
    }

    fn cache_patient_data(&self, patient_id: &str, data: &serde_json::Value) {
        let key = CacheKey::Patient.key(patient_id);
        match serde_json::to_string(data) {
            Ok(raw) => {
                if let Err(e) = self.cache.set(&key, &raw, self.settings.default_ttl) {
                    warn!(error = %e, "Patient data cache write failed");
                }
            }
            Err(e) => warn!(error = %e, "Patient data cache serialization failed"),
        }
    }

    fn forget(&self, key: &str) -> bool {
        match self.cache.delete(key) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Cache delete failed");
                false
            }
        }
    }
}

fn decode_field(name: &str, value: &str, errors: &mut Vec<String>) -> Vec<u8> {
    match general_purpose::STANDARD.decode(value.trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            errors.push(format!("{name} is not valid base64: {e}"));
            Vec::new()
        }
    }
}
