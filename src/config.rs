//! Runtime configuration loaded from `QUANTUMHEALTH_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::crypto::{CryptoConfig, VerificationPolicy};
use crate::domain::DEFAULT_IMAGE_PREFIX_BYTES;
use crate::ports::Ttl;

const PREFIX: &str = "QUANTUMHEALTH_";

/// Errors while reading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Unsupported cache backend: {0}")]
    UnsupportedBackend(String),
}

/// Which cache backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Redis,
}

/// Cache connection and TTL settings.
#[derive(Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub default_ttl: Ttl,
    pub prediction_ttl: Ttl,
    pub health_record_ttl: Ttl,
}

// Password stays out of logs.
impl std::fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("default_ttl", &self.default_ttl.as_secs())
            .field("prediction_ttl", &self.prediction_ttl.as_secs())
            .field("health_record_ttl", &self.health_record_ttl.as_secs())
            .finish()
    }
}

/// Snapshot of every setting the service consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub store_path: PathBuf,
    pub model_path: PathBuf,
    pub fingerprint_prefix_bytes: usize,
    pub single_flight: bool,
    pub crypto: CryptoConfig,
    pub policy: VerificationPolicy,
}

impl AppConfig {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    /// Returns error if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup` (full variable name in, value out).
    ///
    /// # Errors
    /// Returns error if a variable is set to an unparsable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let backend = match vars.string("CACHE_BACKEND", "memory").to_ascii_lowercase().as_str() {
            "memory" => CacheBackend::Memory,
            "redis" if cfg!(feature = "redis") => CacheBackend::Redis,
            "redis" => {
                return Err(ConfigError::UnsupportedBackend(
                    "redis (built without the `redis` feature)".to_string(),
                ))
            }
            other => return Err(ConfigError::UnsupportedBackend(other.to_string())),
        };

        let cache = CacheConfig {
            backend,
            host: vars.string("CACHE_HOST", "localhost"),
            port: vars.parse("CACHE_PORT", 6379)?,
            db: vars.parse("CACHE_DB", 0)?,
            password: vars.optional("CACHE_PASSWORD"),
            connect_timeout: Duration::from_secs(vars.positive("CONNECT_TIMEOUT_SECS", 5)?),
            read_timeout: Duration::from_secs(vars.positive("READ_TIMEOUT_SECS", 5)?),
            default_ttl: vars.ttl("CACHE_DEFAULT_TTL", 3600)?,
            prediction_ttl: vars.ttl("CACHE_PREDICTION_TTL", 1800)?,
            health_record_ttl: vars.ttl("CACHE_HEALTH_RECORD_TTL", 7200)?,
        };

        let prefix_bytes = vars.positive("FINGERPRINT_PREFIX_BYTES", DEFAULT_IMAGE_PREFIX_BYTES as u64)?;

        Ok(Self {
            cache,
            store_path: PathBuf::from(vars.string("STORE_PATH", "./data/quantumhealth.db")),
            model_path: PathBuf::from(vars.string("MODEL_PATH", "models/multimodal_linear.json")),
            fingerprint_prefix_bytes: usize::try_from(prefix_bytes).unwrap_or(usize::MAX),
            single_flight: vars.flag("SINGLE_FLIGHT", true)?,
            crypto: CryptoConfig {
                disable_kem: vars.flag("DISABLE_PQC_KEM", false)?,
                disable_sig: vars.flag("DISABLE_PQC_SIG", false)?,
            },
            policy: VerificationPolicy {
                allow_unverified_fallback: vars.flag("ALLOW_UNVERIFIED_FALLBACK", false)?,
            },
        })
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn key(name: &str) -> String {
        format!("{PREFIX}{name}")
    }

    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(&Self::key(name))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn invalid(name: &str, value: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::Invalid {
            key: Self::key(name),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    fn parse<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|e: T::Err| Self::invalid(name, &v, e.to_string())),
        }
    }

    fn positive(&self, name: &str, default: u64) -> Result<u64, ConfigError> {
        let value: u64 = self.parse(name, default)?;
        if value == 0 {
            return Err(Self::invalid(name, "0", "must be greater than zero"));
        }
        Ok(value)
    }

    fn ttl(&self, name: &str, default: u64) -> Result<Ttl, ConfigError> {
        let secs = self.positive(name, default)?;
        Ttl::from_secs(secs).ok_or_else(|| Self::invalid(name, "0", "must be greater than zero"))
    }

    fn flag(&self, name: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(name) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "TRUE" | "yes" | "YES" => Ok(true),
                "0" | "false" | "FALSE" | "no" | "NO" => Ok(false),
                _ => Err(Self::invalid(name, &v, "expected true or false")),
            },
        }
    }
}
