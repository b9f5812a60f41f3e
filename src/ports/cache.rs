//! Cache port: key/value store with per-entry expiry.

use std::num::NonZeroU64;
use std::sync::Arc;

use thiserror::Error;

/// Errors from a cache backend.
///
/// Callers treat every variant as "cache unavailable" and degrade.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache not connected")]
    Unavailable,

    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache entry serialization failed: {0}")]
    Serialization(String),
}

/// Positive time-to-live in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ttl(NonZeroU64);

impl Ttl {
    /// `None` for zero.
    #[must_use]
    pub fn from_secs(secs: u64) -> Option<Self> {
        NonZeroU64::new(secs).map(Self)
    }

    #[must_use]
    pub fn as_secs(&self) -> u64 {
        self.0.get()
    }
}

/// Key namespaces shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKey {
    Prediction,
    HealthRecord,
    Patient,
    Session,
}

impl CacheKey {
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Prediction => "prediction:",
            Self::HealthRecord => "health_record:",
            Self::Patient => "patient:",
            Self::Session => "session:",
        }
    }

    /// Full key for `id` in this namespace.
    #[must_use]
    pub fn key(&self, id: &str) -> String {
        format!("{}{id}", self.prefix())
    }
}

/// Trait for cache backends.
///
/// Values are opaque strings; callers own the encoding.
pub trait CacheStore: Send + Sync {
    /// Fetch a value. `Ok(None)` on miss or expiry.
    ///
    /// # Errors
    /// Returns error if the backend is unreachable or fails.
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value that expires after `ttl`.
    ///
    /// # Errors
    /// Returns error if the backend is unreachable or fails.
    fn set(&self, key: &str, value: &str, ttl: Ttl) -> Result<(), CacheError>;

    /// # Errors
    /// Returns error if the backend is unreachable or fails.
    fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove a key. Returns whether it existed.
    ///
    /// # Errors
    /// Returns error if the backend is unreachable or fails.
    fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Liveness check.
    fn is_connected(&self) -> bool {
        true
    }

    /// Release backend resources.
    fn close(&self) {}
}

impl<T: CacheStore + ?Sized> CacheStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str, ttl: Ttl) -> Result<(), CacheError> {
        (**self).set(key, value, ttl)
    }

    fn exists(&self, key: &str) -> Result<bool, CacheError> {
        (**self).exists(key)
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        (**self).delete(key)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn close(&self) {
        (**self).close();
    }
}
