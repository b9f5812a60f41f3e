//! Record signing utility for QuantumHealth uploads.
//!
//! Signs the canonical JSON of a `patient_data` document with a fresh
//! Dilithium5 keypair and prints a ready `upload_record` request.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin sign_record -- <patient_data.json> --patient-id <id> [--out <request.json>]
//! ```
//!
//! # Security
//!
//! - The keypair is ephemeral; only the public key leaves this process
//! - Secret key material is zeroized on drop

use std::env;
use std::fs;
use std::path::PathBuf;

use base64::engine::general_purpose;
use base64::Engine;

use quantumhealth::application::UploadRecordRequest;
use quantumhealth::crypto::pqc;
use quantumhealth::domain::canonical_payload;

fn usage() -> String {
    "Usage: sign_record <patient_data.json> --patient-id <id> [--out <request.json>]".to_string()
}

fn parse_args() -> Result<(PathBuf, String, Option<PathBuf>), String> {
    let mut args = env::args().skip(1);
    let mut data_path: Option<PathBuf> = None;
    let mut patient_id: Option<String> = None;
    let mut out: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--patient-id" => {
                let v = args.next().ok_or_else(usage)?;
                if v.trim().is_empty() {
                    return Err("--patient-id must not be empty".to_string());
                }
                patient_id = Some(v.trim().to_string());
            }
            "--out" => {
                let v = args.next().ok_or_else(usage)?;
                out = Some(PathBuf::from(v));
            }
            "-h" | "--help" => return Err(usage()),
            _ => {
                if data_path.is_none() {
                    data_path = Some(PathBuf::from(arg));
                } else {
                    return Err(usage());
                }
            }
        }
    }

    let data_path = data_path.ok_or_else(usage)?;
    let patient_id = patient_id.ok_or_else(usage)?;
    Ok((data_path, patient_id, out))
}

fn main() -> Result<(), String> {
    let (data_path, patient_id, out) = parse_args()?;

    let raw = fs::read_to_string(&data_path).map_err(|e| format!("Failed to read {data_path:?}: {e}"))?;
    let patient_data: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON in {data_path:?}: {e}"))?;
    if !patient_data.is_object() {
        return Err("patient_data must be a JSON object".to_string());
    }

    let message = canonical_payload(&patient_data).map_err(|e| format!("Failed to canonicalize payload: {e}"))?;

    let (public_key, secret_key) = pqc::sig_keypair();
    let signature = pqc::sign_detached(&message, &secret_key)
        .ok_or_else(|| format!("{} signing failed", pqc::SIG_NAME))?;
    drop(secret_key);

    let request = UploadRecordRequest {
        patient_id,
        patient_data,
        signature: general_purpose::STANDARD.encode(signature),
        public_key: general_purpose::STANDARD.encode(public_key),
    };
    let json = serde_json::to_string_pretty(&request).map_err(|e| format!("Failed to serialize request: {e}"))?;

    match out {
        Some(path) => {
            fs::write(&path, json.as_bytes()).map_err(|e| format!("Failed to write {path:?}: {e}"))?;
            eprintln!("Wrote signed upload request: {path:?}");
        }
        None => println!("{json}"),
    }

    Ok(())
}
