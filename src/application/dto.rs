//! Request and response shapes of the external interface.

use serde::{Deserialize, Serialize};

use crate::domain::{ClinicalData, EncryptionMode, PredictionResult, VerificationOutcome};

/// `predict` input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictRequest {
    pub clinical_data: ClinicalData,
    pub image_base64: String,
}

/// `predict` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: PredictionResult,
    /// Probability of the predicted class
    pub confidence: f64,
    /// Base64 of the JSON [`crate::domain::EncryptionEnvelope`]
    pub encrypted_prediction: String,
    pub cache_hit: bool,
}

/// `upload_record` input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecordRequest {
    pub patient_id: String,
    pub patient_data: serde_json::Value,
    /// Detached signature over the canonical JSON of `patient_data`, base64
    pub signature: String,
    /// Signer public key, base64
    pub public_key: String,
}

/// Acknowledgement status of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Verified (or admitted) and persisted
    Success,
    /// Admitted but not persisted; see `database_used`
    Accepted,
}

/// `upload_record` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecordResponse {
    pub status: UploadStatus,
    pub message: String,
    pub patient_id: String,
    pub database_used: bool,
    pub verification: VerificationOutcome,
}

/// Overall service status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

/// `health` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub model_loaded: bool,
    pub database_connected: bool,
    pub cache_connected: bool,
    pub encryption_mode: EncryptionMode,
}

impl HealthResponse {
    /// `Ok` only when every dependency is up.
    #[must_use]
    pub fn new(
        model_loaded: bool,
        database_connected: bool,
        cache_connected: bool,
        encryption_mode: EncryptionMode,
    ) -> Self {
        let status = if model_loaded && database_connected && cache_connected {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };
        Self {
            status,
            model_loaded,
            database_connected,
            cache_connected,
            encryption_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_requires_all_three() {
        let mode = EncryptionMode::ClassicalFallback;
        assert_eq!(HealthResponse::new(true, true, true, mode).status, HealthStatus::Ok);
        assert_eq!(HealthResponse::new(false, true, true, mode).status, HealthStatus::Degraded);
        assert_eq!(HealthResponse::new(true, false, true, mode).status, HealthStatus::Degraded);
        assert_eq!(HealthResponse::new(true, true, false, mode).status, HealthStatus::Degraded);
    }

    #[test]
    fn test_wire_names() {
        let health = serde_json::to_value(HealthResponse::new(true, true, true, EncryptionMode::HybridPqc)).unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["encryption_mode"], "hybrid_pqc");

        let request: PredictRequest = serde_json::from_str(
            r#"{"clinical_data": {"age": 35, "gender": 1, "bmi": 20, "blood_pressure_systolic": 120,
                "blood_pressure_diastolic": 60, "cholesterol": 150, "glucose": 80, "smoking": 0,
                "family_history": 0, "symptoms_severity": 2}, "image_base64": "AAAA"}"#,
        )
        .unwrap();
        assert_eq!(request.clinical_data.age, 35.0);
    }
}
