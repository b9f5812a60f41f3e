//! Enum dispatch over the configured cache backend.

use std::sync::Arc;

use super::memory::{MemoryCache, MemoryCacheConnector};
use super::ManagedConnection;
#[cfg(feature = "redis")]
use super::redis_cache::RedisConnector;
use crate::ports::{CacheError, CacheStore, Ttl};

/// The cache backend selected at startup.
pub enum CacheProvider {
    Memory(ManagedConnection<MemoryCacheConnector>),
    #[cfg(feature = "redis")]
    Redis(ManagedConnection<RedisConnector>),
}

impl CacheProvider {
    /// In-process cache.
    #[must_use]
    pub fn memory(cache: Arc<MemoryCache>) -> Self {
        Self::Memory(ManagedConnection::new(MemoryCacheConnector::new(cache)))
    }

    /// Redis cache. Unreachable servers leave the provider "not connected".
    #[cfg(feature = "redis")]
    #[must_use]
    pub fn redis(connector: RedisConnector) -> Self {
        Self::Redis(ManagedConnection::new(connector))
    }

    /// Backend name for logs and health output.
    #[must_use]
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            #[cfg(feature = "redis")]
            Self::Redis(_) => "redis",
        }
    }
}

impl CacheStore for CacheProvider {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self {
            Self::Memory(c) => c.get(key),
            #[cfg(feature = "redis")]
            Self::Redis(c) => c.get(key),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Ttl) -> Result<(), CacheError> {
        match self {
            Self::Memory(c) => c.set(key, value, ttl),
            #[cfg(feature = "redis")]
            Self::Redis(c) => c.set(key, value, ttl),
        }
    }

    fn exists(&self, key: &str) -> Result<bool, CacheError> {
        match self {
            Self::Memory(c) => c.exists(key),
            #[cfg(feature = "redis")]
            Self::Redis(c) => c.exists(key),
        }
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        match self {
            Self::Memory(c) => c.delete(key),
            #[cfg(feature = "redis")]
            Self::Redis(c) => c.delete(key),
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::Memory(c) => c.is_connected(),
            #[cfg(feature = "redis")]
            Self::Redis(c) => c.is_connected(),
        }
    }

    fn close(&self) {
        match self {
            Self::Memory(c) => c.close(),
            #[cfg(feature = "redis")]
            Self::Redis(c) => c.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_provider_dispatches() {
        let cache = Arc::new(MemoryCache::default());
        let provider = CacheProvider::memory(Arc::clone(&cache));
        assert_eq!(provider.backend(), "memory");

        provider.set("session:s1", "x", Ttl::from_secs(5).unwrap()).unwrap();
        assert!(provider.exists("session:s1").unwrap());
        assert_eq!(cache.len(), 1);

        cache.set_online(false);
        assert!(!provider.is_connected());
    }
}
