//! Self-describing encryption envelope.
//!
//! The envelope always states how its ciphertext was produced, so a
//! consumer never needs out-of-band knowledge to interpret it. In
//! particular a `Passthrough` envelope (no cipher available) is tagged as
//! such and carries no key reference.

use base64::engine::general_purpose;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Current wire format version.
pub const ENVELOPE_VERSION: u32 = 1;

/// How an envelope's ciphertext was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMode {
    /// AES-256-GCM under a key established through the post-quantum KEM
    HybridPqc,
    /// AES-256-GCM under a locally generated key
    ClassicalFallback,
    /// No cipher: the ciphertext field is the plaintext itself
    Passthrough,
}

impl EncryptionMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HybridPqc => "hybrid_pqc",
            Self::ClassicalFallback => "classical_fallback",
            Self::Passthrough => "passthrough",
        }
    }

    /// Whether the ciphertext is actually encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, Self::Passthrough)
    }
}

impl std::fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often the symmetric key is (re-)established through the KEM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEstablishmentScope {
    /// One encapsulation when the envelope manager is constructed; every
    /// message from that manager reuses the derived key.
    PerManager,
}

/// Post-quantum key-establishment metadata carried by `HybridPqc` envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KemMetadata {
    /// KEM mechanism name, e.g. `Kyber512`
    pub mechanism: String,

    /// Re-encapsulation granularity
    pub scope: KeyEstablishmentScope,
}

/// Tagged ciphertext container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionEnvelope {
    /// Wire format version
    pub version: u32,

    /// How `ciphertext` was produced
    pub mode: EncryptionMode,

    /// Nonce-prefixed AEAD output, or the plaintext for `Passthrough`.
    /// Base64 on the wire.
    #[serde(serialize_with = "serialize_b64", deserialize_with = "deserialize_b64")]
    pub ciphertext: Vec<u8>,

    /// Identifier of the key that sealed the payload (not secret).
    /// `None` for `Passthrough`.
    pub key_ref: Option<String>,

    /// Present only for `HybridPqc`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kem: Option<KemMetadata>,
}

impl EncryptionEnvelope {
    /// Serialize to JSON and base64-encode, as exposed in API responses.
    ///
    /// # Errors
    /// Returns error if JSON serialization fails.
    pub fn to_base64(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(general_purpose::STANDARD.encode(json))
    }

    /// Parse the base64 form produced by [`EncryptionEnvelope::to_base64`].
    ///
    /// # Errors
    /// Returns error if the input is not base64 or not an envelope.
    pub fn from_base64(encoded: &str) -> Result<Self, String> {
        let json = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| format!("Invalid envelope base64: {e}"))?;
        serde_json::from_slice(&json).map_err(|e| format!("Invalid envelope JSON: {e}"))
    }
}

fn serialize_b64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
}

fn deserialize_b64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    general_purpose::STANDARD
        .decode(s.as_bytes())
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_wire_form_is_explicit() {
        let envelope = EncryptionEnvelope {
            version: ENVELOPE_VERSION,
            mode: EncryptionMode::Passthrough,
            ciphertext: b"{\"a\":1}".to_vec(),
            key_ref: None,
            kem: None,
        };

        let json: serde_json::Value = serde_json::to_value(&envelope).expect("Should serialize");
        assert_eq!(json["mode"], "passthrough");
        assert_eq!(json["key_ref"], serde_json::Value::Null);
        assert!(json.get("kem").is_none());

        let ciphertext = json["ciphertext"].as_str().expect("String field");
        let decoded = general_purpose::STANDARD.decode(ciphertext).expect("Plain base64");
        assert_eq!(decoded, b"{\"a\":1}");
    }

    #[test]
    fn test_base64_form_parses_back() {
        let envelope = EncryptionEnvelope {
            version: ENVELOPE_VERSION,
            mode: EncryptionMode::HybridPqc,
            ciphertext: vec![1, 2, 3],
            key_ref: Some("00ff00ff00ff00ff".to_string()),
            kem: Some(KemMetadata {
                mechanism: "Kyber512".to_string(),
                scope: KeyEstablishmentScope::PerManager,
            }),
        };

        let encoded = envelope.to_base64().expect("Should encode");
        assert_eq!(EncryptionEnvelope::from_base64(&encoded), Ok(envelope));
        assert!(EncryptionEnvelope::from_base64("%%%").is_err());
    }

    #[test]
    fn test_mode_strings() {
        assert_eq!(EncryptionMode::HybridPqc.to_string(), "hybrid_pqc");
        assert!(!EncryptionMode::Passthrough.is_encrypted());
        assert!(EncryptionMode::ClassicalFallback.is_encrypted());
    }
}
