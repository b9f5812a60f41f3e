//! In-process cache backend.
//!
//! Expiry is evaluated against an injected [`Clock`], so tests can move time
//! instead of sleeping. The `online` switch simulates an outage of the cache
//! service.
//!
//! Expired entries are dropped when read, and by a sweep that runs on write
//! at most once per [`SWEEP_INTERVAL_SECS`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::domain::{Clock, SystemClock};
use crate::ports::{CacheError, CacheStore, Connector, Ttl};

/// Minimum clock time between two sweeps of expired entries.
pub const SWEEP_INTERVAL_SECS: i64 = 60;

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Entries {
    map: HashMap<String, Entry>,
    next_sweep: Option<DateTime<Utc>>,
}

impl Entries {
    fn sweep_if_due(&mut self, now: DateTime<Utc>) {
        if self.next_sweep.is_some_and(|due| now < due) {
            return;
        }
        let before = self.map.len();
        self.map.retain(|_, entry| entry.expires_at > now);
        let swept = before - self.map.len();
        if swept > 0 {
            tracing::debug!(swept, remaining = self.map.len(), "Swept expired cache entries");
        }
        self.next_sweep = now.checked_add_signed(Duration::seconds(SWEEP_INTERVAL_SECS));
    }
}

/// TTL map guarded by a mutex.
pub struct MemoryCache {
    entries: Mutex<Entries>,
    clock: Arc<dyn Clock>,
    online: AtomicBool,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl MemoryCache {
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            clock,
            online: AtomicBool::new(true),
        }
    }

    /// Mark the backend reachable or unreachable.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Number of stored entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> Result<(), CacheError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(CacheError::Unavailable)
        }
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check_online()?;
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.map.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.map.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Ttl) -> Result<(), CacheError> {
        self.check_online()?;
        let now = self.clock.now();
        let secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = now
            .checked_add_signed(Duration::seconds(secs.min(i64::MAX / 1000)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.sweep_if_due(now);
        entries.map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key)?.is_some())
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.check_online()?;
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .remove(key)
            .is_some())
    }

    fn is_connected(&self) -> bool {
        self.is_online()
    }
}

/// Connector handing out a shared [`MemoryCache`].
#[derive(Clone)]
pub struct MemoryCacheConnector {
    cache: Arc<MemoryCache>,
}

impl MemoryCacheConnector {
    #[must_use]
    pub fn new(cache: Arc<MemoryCache>) -> Self {
        Self { cache }
    }

    /// The backing cache, for outage simulation.
    #[must_use]
    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }
}

impl Connector for MemoryCacheConnector {
    type Handle = Arc<MemoryCache>;
    type Error = CacheError;

    fn service(&self) -> &'static str {
        "memory-cache"
    }

    fn connect(&self) -> Result<Arc<MemoryCache>, CacheError> {
        self.cache.check_online()?;
        Ok(Arc::clone(&self.cache))
    }

    fn ping(&self, handle: &Arc<MemoryCache>) -> bool {
        handle.is_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ManagedConnection;
    use crate::domain::ManualClock;

    fn ttl(secs: u64) -> Ttl {
        Ttl::from_secs(secs).unwrap()
    }

    #[test]
    fn test_set_get_delete() {
        let cache = MemoryCache::default();
        cache.set("prediction:a", "v1", ttl(60)).unwrap();

        assert_eq!(cache.get("prediction:a").unwrap(), Some("v1".to_string()));
        assert!(cache.exists("prediction:a").unwrap());
        assert!(cache.delete("prediction:a").unwrap());
        assert!(!cache.delete("prediction:a").unwrap());
        assert_eq!(cache.get("prediction:a").unwrap(), None);
    }

    #[test]
    fn test_entries_expire_with_clock() {
        let clock = Arc::new(ManualClock::default());
        let cache = MemoryCache::with_clock(clock.clone());
        cache.set("k", "v", ttl(60)).unwrap();

        clock.advance(Duration::seconds(59));
        assert!(cache.exists("k").unwrap());

        clock.advance(Duration::seconds(1));
        assert_eq!(cache.get("k").unwrap(), None);
        assert!(cache.is_empty(), "Expired entry is evicted on read");
    }

    #[test]
    fn test_expired_entries_are_swept_on_write() {
        let clock = Arc::new(ManualClock::default());
        let cache = MemoryCache::with_clock(clock.clone());
        for i in 0..1000 {
            cache.set(&format!("prediction:{i}"), "v", ttl(1)).unwrap();
        }
        assert_eq!(cache.len(), 1000);

        clock.advance(Duration::seconds(3600));
        cache.set("prediction:fresh", "v", ttl(60)).unwrap();
        assert_eq!(cache.len(), 1, "Only the live entry remains");
    }

    #[test]
    fn test_sweep_keeps_live_entries_and_is_rate_limited() {
        let clock = Arc::new(ManualClock::default());
        let cache = MemoryCache::with_clock(clock.clone());
        cache.set("short", "v", ttl(1)).unwrap();
        cache.set("long", "v", ttl(600)).unwrap();

        // Within the interval of the first sweep: nothing is swept yet.
        clock.advance(Duration::seconds(2));
        cache.set("other", "v", ttl(600)).unwrap();
        assert_eq!(cache.len(), 3);

        clock.advance(Duration::seconds(SWEEP_INTERVAL_SECS));
        cache.set("other", "v2", ttl(600)).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.exists("long").unwrap());
    }

    #[test]
    fn test_offline_cache_reports_unavailable() {
        let cache = MemoryCache::default();
        cache.set_online(false);
        assert!(matches!(cache.get("k"), Err(CacheError::Unavailable)));
        assert!(matches!(cache.set("k", "v", ttl(1)), Err(CacheError::Unavailable)));
        assert!(!cache.is_connected());
    }

    #[test]
    fn test_managed_connection_follows_outage() {
        let cache = Arc::new(MemoryCache::default());
        let conn = ManagedConnection::new(MemoryCacheConnector::new(Arc::clone(&cache)));
        conn.set("k", "v", ttl(60)).unwrap();

        cache.set_online(false);
        assert!(matches!(conn.get("k"), Err(CacheError::Unavailable)));
        assert!(!CacheStore::is_connected(&conn));

        cache.set_online(true);
        assert_eq!(conn.get("k").unwrap(), Some("v".to_string()));
    }
}
