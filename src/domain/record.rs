//! Signed health-record uploads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of checking a record signature.
///
/// `Unverifiable` means no check ran. It is never folded into either of the
/// other two outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Verified,
    Rejected,
    Unverifiable,
}

impl VerificationOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Rejected => "rejected",
            Self::Unverifiable => "unverifiable",
        }
    }

    /// Parse the stored representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "verified" => Some(Self::Verified),
            "rejected" => Some(Self::Rejected),
            "unverifiable" => Some(Self::Unverifiable),
            _ => None,
        }
    }

    /// Ordering by assurance: `Verified` > `Unverifiable` > `Rejected`.
    #[must_use]
    pub fn is_stronger_than(self, other: Self) -> bool {
        self.rank() > other.rank()
    }

    fn rank(self) -> u8 {
        match self {
            Self::Rejected => 0,
            Self::Unverifiable => 1,
            Self::Verified => 2,
        }
    }
}

impl std::fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record upload after its signature has been checked.
///
/// Construct via [`SignedRecord::new`] so `verification` always comes from an
/// actual verifier call.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedRecord {
    /// Unique record ID
    pub record_id: String,

    /// Patient the record belongs to
    pub patient_id: String,

    /// Signed payload
    pub payload: serde_json::Value,

    /// Detached signature, base64
    pub signature: String,

    /// Signer public key, base64
    pub public_key: String,

    /// Outcome of the signature check
    pub verification: VerificationOutcome,

    /// When the upload was received
    pub received_at: DateTime<Utc>,
}

impl SignedRecord {
    #[must_use]
    pub fn new(
        patient_id: impl Into<String>,
        payload: serde_json::Value,
        signature: impl Into<String>,
        public_key: impl Into<String>,
        verification: VerificationOutcome,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id: uuid_v4(),
            patient_id: patient_id.into(),
            payload,
            signature: signature.into(),
            public_key: public_key.into(),
            verification,
            received_at,
        }
    }
}

impl std::fmt::Debug for SignedRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedRecord")
            .field("record_id", &self.record_id)
            .field("patient_id", &"[REDACTED]")
            .field("payload", &"[REDACTED]")
            .field("verification", &self.verification)
            .field("received_at", &self.received_at)
            .finish_non_exhaustive()
    }
}

/// A persisted record as returned by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record_id: String,
    pub patient_id: String,
    pub payload: serde_json::Value,
    pub verification: VerificationOutcome,
    pub created_at: DateTime<Utc>,
}

impl From<&SignedRecord> for StoredRecord {
    fn from(record: &SignedRecord) -> Self {
        Self {
            record_id: record.record_id.clone(),
            patient_id: record.patient_id.clone(),
            payload: record.payload.clone(),
            verification: record.verification,
            created_at: record.received_at,
        }
    }
}

/// Canonical bytes a record signature covers: compact JSON with object keys
/// in lexicographic order.
///
/// # Errors
/// Returns error if the value cannot be serialized.
pub fn canonical_payload(payload: &serde_json::Value) -> Result<Vec<u8>, serde_json::Error> {
    // serde_json::Map is a BTreeMap without the preserve_order feature, so
    // serialization emits sorted keys at every level.
    serde_json::to_vec(payload)
}

/// Generate a random UUID v4 from a CSPRNG.
fn uuid_v4() -> String {
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let mut rng = ChaCha20Rng::from_entropy();
    let mut bytes: [u8; 16] = rng.gen();
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_payload_sorts_keys() {
        let payload: serde_json::Value =
            serde_json::from_str(r#"{"b": 1, "a": {"z": true, "y": [2, 1]}}"#).unwrap();
        let bytes = canonical_payload(&payload).expect("Should serialize");
        assert_eq!(bytes, br#"{"a":{"y":[2,1],"z":true},"b":1}"#);
    }

    #[test]
    fn test_uuid_shape() {
        let id = uuid_v4();
        assert_eq!(id.len(), 36);
        assert_eq!(id.chars().nth(14), Some('4'));
        assert_ne!(id, uuid_v4());
    }

    #[test]
    fn test_outcome_strings_parse_back() {
        for outcome in [
            VerificationOutcome::Verified,
            VerificationOutcome::Rejected,
            VerificationOutcome::Unverifiable,
        ] {
            assert_eq!(VerificationOutcome::parse(outcome.as_str()), Some(outcome));
        }
        assert_eq!(VerificationOutcome::parse("true"), None);
    }

    #[test]
    fn test_outcome_strength_order() {
        use VerificationOutcome::{Rejected, Unverifiable, Verified};
        assert!(Verified.is_stronger_than(Unverifiable));
        assert!(Unverifiable.is_stronger_than(Rejected));
        assert!(!Unverifiable.is_stronger_than(Verified));
        assert!(!Verified.is_stronger_than(Verified));
    }

    #[test]
    fn test_debug_redacts_patient_data() {
        let record = SignedRecord::new(
            "patient-77",
            serde_json::json!({"diagnosis": "secret"}),
            "c2ln",
            "cGs=",
            VerificationOutcome::Verified,
            Utc::now(),
        );
        let debug = format!("{record:?}");
        assert!(!debug.contains("patient-77"));
        assert!(!debug.contains("secret"));
    }
}
