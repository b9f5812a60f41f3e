//! QuantumHealth: cached multimodal risk prediction.
//!
//! Command-line front end over the prediction service.
//!
//! ```bash
//! quantumhealth health
//! quantumhealth capabilities
//! quantumhealth predict request.json [--repeat 3]
//! quantumhealth upload upload.json
//! quantumhealth records <patient_id> [--limit 10]
//! quantumhealth patient <patient_id>
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use quantumhealth::adapters::linear::LinearModelEngine;
use quantumhealth::adapters::memory::MemoryCache;
use quantumhealth::adapters::sanitize::SanitizingMakeWriter;
use quantumhealth::adapters::sqlite::SqliteConnector;
use quantumhealth::adapters::{CacheProvider, ManagedConnection};
use quantumhealth::application::{PredictRequest, PredictionService, ServiceSettings, UploadRecordRequest};
use quantumhealth::config::{AppConfig, CacheBackend};
use quantumhealth::crypto::CapabilityProfile;
use quantumhealth::domain::SystemClock;

type Service = PredictionService<LinearModelEngine, CacheProvider, ManagedConnection<SqliteConnector>>;

enum Command {
    Health,
    Capabilities,
    Predict { path: String, repeat: usize },
    Upload { path: String },
    Records { patient_id: String, limit: usize },
    Patient { patient_id: String },
}

fn usage() -> String {
    "Usage: quantumhealth <health | capabilities | predict <request.json> [--repeat N] | upload <request.json> | records <patient_id> [--limit N] | patient <patient_id>>".to_string()
}

fn parse_count(flag: &str, value: Option<String>) -> Result<usize> {
    let value = value.with_context(usage)?;
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => bail!("{flag} must be a positive integer"),
    }
}

fn parse_args() -> Result<Command> {
    let mut args = std::env::args().skip(1);
    let command = args.next().with_context(usage)?;

    let mut positional: Option<String> = None;
    let mut repeat = 1;
    let mut limit = 10;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--repeat" => repeat = parse_count("--repeat", args.next())?,
            "--limit" => limit = parse_count("--limit", args.next())?,
            "-h" | "--help" => bail!(usage()),
            _ if positional.is_none() => positional = Some(arg),
            _ => bail!(usage()),
        }
    }

    Ok(match command.as_str() {
        "health" => Command::Health,
        "capabilities" => Command::Capabilities,
        "predict" => Command::Predict {
            path: positional.with_context(usage)?,
            repeat,
        },
        "upload" => Command::Upload {
            path: positional.with_context(usage)?,
        },
        "records" => Command::Records {
            patient_id: positional.with_context(usage)?,
            limit,
        },
        "patient" => Command::Patient {
            patient_id: positional.with_context(usage)?,
        },
        _ => bail!(usage()),
    })
}

fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    // stdout carries command output, so console logs go to stderr.
    let log_mode = std::env::var("QUANTUMHEALTH_LOG_MODE").unwrap_or_else(|_| "auto".to_string());

    let (writer, guard) = if log_mode == "file" {
        let log_file = std::env::var("QUANTUMHEALTH_LOG_FILE")
            .unwrap_or_else(|_| "./data/quantumhealth.log".to_string());

        if let Some(parent) = Path::new(&log_file).parent() {
            // Best-effort: don't fail startup just because the directory is missing.
            let _ = std::fs::create_dir_all(parent);
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .with_context(|| format!("Failed to open log file {log_file}"))?;
        tracing_appender::non_blocking(file)
    } else {
        tracing_appender::non_blocking(std::io::stderr())
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();

    Ok(guard)
}

fn build_cache(config: &AppConfig) -> CacheProvider {
    match config.cache.backend {
        CacheBackend::Memory => CacheProvider::memory(Arc::new(MemoryCache::default())),
        #[cfg(feature = "redis")]
        CacheBackend::Redis => {
            use quantumhealth::adapters::redis_cache::RedisConnector;
            CacheProvider::redis(RedisConnector::new(
                config.cache.host.clone(),
                config.cache.port,
                config.cache.db,
                config.cache.password.clone(),
                config.cache.connect_timeout,
                config.cache.read_timeout,
            ))
        }
        // Config refuses redis when the feature is off.
        #[cfg(not(feature = "redis"))]
        CacheBackend::Redis => CacheProvider::memory(Arc::new(MemoryCache::default())),
    }
}

fn build_service(config: &AppConfig) -> Service {
    let engine = match LinearModelEngine::load(&config.model_path) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::warn!(error = %e, path = ?config.model_path, "Model not loaded, predictions disabled");
            LinearModelEngine::unloaded()
        }
    };

    let cache = build_cache(config);
    tracing::info!(backend = cache.backend(), "Cache configured");

    let records = ManagedConnection::new(SqliteConnector::new(config.store_path.clone()));
    let profile = CapabilityProfile::negotiate(&config.crypto);

    PredictionService::new(
        Arc::new(engine),
        Arc::new(cache),
        Arc::new(records),
        profile,
        ServiceSettings::from(config),
        Arc::new(SystemClock),
    )
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {path}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(service: &Service, command: Command) -> Result<()> {
    match command {
        Command::Health => print_json(&service.health()),
        Command::Capabilities => print_json(service.capabilities()),
        Command::Predict { path, repeat } => {
            let request: PredictRequest = read_json(&path)?;
            for _ in 0..repeat {
                print_json(&service.predict(&request)?)?;
            }
            Ok(())
        }
        Command::Upload { path } => {
            let request: UploadRecordRequest = read_json(&path)?;
            print_json(&service.upload_record(&request)?)
        }
        Command::Records { patient_id, limit } => {
            print_json(&service.recent_records(&patient_id, limit)?)
        }
        Command::Patient { patient_id } => match service.patient_data(&patient_id)? {
            Some(data) => print_json(&data),
            None => bail!("No records for patient {patient_id}"),
        },
    }
}

fn main() -> Result<()> {
    let command = parse_args()?;
    let _guard = init_logging()?;

    let config = AppConfig::from_env().context("Invalid configuration")?;
    tracing::debug!(?config, "Configuration loaded");

    let service = build_service(&config);
    let outcome = run(&service, command);
    service.shutdown();

    if let Err(e) = &outcome {
        if let Some(err) = e.downcast_ref::<quantumhealth::QuantumHealthError>() {
            tracing::error!(code = err.code(), status = err.status_code(), "Request failed");
        }
    }
    outcome
}
