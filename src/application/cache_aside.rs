//! Cache-aside orchestration for prediction results.
//!
//! Lookup `prediction:<fingerprint>`; on a hit return the stored result and
//! envelope, on a miss run `compute`, store the pair, and return it.
//!
//! The cache is never essential: read failures count as misses and the write
//! is skipped, write failures are logged and dropped. Corrupt entries are
//! misses too.
//!
//! With single-flight enabled, concurrent misses on one fingerprint run
//! `compute` once; the waiters re-read the cache after the leader finishes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{Clock, EncryptionEnvelope, Fingerprint, PredictionResult};
use crate::ports::{CacheError, CacheKey, CacheStore, Ttl};

/// What `get_or_compute` returns.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOutcome {
    pub result: PredictionResult,
    pub envelope: EncryptionEnvelope,
    /// `true` if served from cache without running `compute`
    pub hit: bool,
}

/// Stored form of a cached prediction.
#[derive(Debug, Serialize, Deserialize)]
struct CachedEntry {
    result: PredictionResult,
    envelope: EncryptionEnvelope,
    inserted_at: DateTime<Utc>,
    ttl_secs: u64,
}

impl CachedEntry {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let ttl = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX).min(i64::MAX / 1000);
        self.inserted_at
            .checked_add_signed(Duration::seconds(ttl))
            .map_or(true, |expires_at| now < expires_at)
    }
}

enum Lookup {
    Hit(CacheOutcome),
    Miss,
    /// Backend unreachable; do not bother writing
    Unavailable,
}

/// Cache-aside orchestrator over any [`CacheStore`].
pub struct CacheOrchestrator<C: CacheStore> {
    cache: Arc<C>,
    clock: Arc<dyn Clock>,
    single_flight: bool,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<C: CacheStore> CacheOrchestrator<C> {
    pub fn new(cache: Arc<C>, clock: Arc<dyn Clock>, single_flight: bool) -> Self {
        Self {
            cache,
            clock,
            single_flight,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn single_flight(&self) -> bool {
        self.single_flight
    }

    /// Return the cached prediction for `fingerprint`, or compute and cache it.
    ///
    /// # Errors
    /// Only errors from `compute` are returned.
    pub fn get_or_compute<E, F>(
        &self,
        fingerprint: &Fingerprint,
        ttl: Ttl,
        compute: F,
    ) -> Result<CacheOutcome, E>
    where
        F: FnOnce() -> Result<(PredictionResult, EncryptionEnvelope), E>,
    {
        let key = CacheKey::Prediction.key(fingerprint.as_str());

        let cache_up = match self.lookup(&key) {
            Lookup::Hit(outcome) => return Ok(outcome),
            Lookup::Miss => true,
            Lookup::Unavailable => false,
        };

        if !(self.single_flight && cache_up) {
            return self.compute_and_store(&key, ttl, compute, cache_up);
        }

        let slot = self.slot(&key);
        let outcome = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            match self.lookup(&key) {
                Lookup::Hit(outcome) => {
                    debug!("Served by concurrent computation");
                    Ok(outcome)
                }
                Lookup::Miss => self.compute_and_store(&key, ttl, compute, true),
                Lookup::Unavailable => self.compute_and_store(&key, ttl, compute, false),
            }
        };
        self.release(&key, slot);
        outcome
    }

    fn lookup(&self, key: &str) -> Lookup {
        let raw = match self.cache.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Lookup::Miss,
            Err(CacheError::Unavailable) => {
                warn!("Cache unavailable, computing directly");
                return Lookup::Unavailable;
            }
            Err(e) => {
                warn!(error = %e, "Cache read failed, computing directly");
                return Lookup::Unavailable;
            }
        };

        let entry: CachedEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Discarding corrupt cache entry");
                self.evict(key);
                return Lookup::Miss;
            }
        };

        if !entry.is_fresh(self.clock.now()) {
            debug!("Cache entry expired");
            self.evict(key);
            return Lookup::Miss;
        }

        debug!("Cache hit");
        Lookup::Hit(CacheOutcome {
            result: entry.result,
            envelope: entry.envelope,
            hit: true,
        })
    }

    /// A failed delete leaves the entry to be overwritten by the next store.
    fn evict(&self, key: &str) {
        if let Err(e) = self.cache.delete(key) {
            debug!(error = %e, "Cache eviction failed");
        }
    }

    fn compute_and_store<E, F>(
        &self,
        key: &str,
        ttl: Ttl,
        compute: F,
        write: bool,
    ) -> Result<CacheOutcome, E>
    where
        F: FnOnce() -> Result<(PredictionResult, EncryptionEnvelope), E>,
    {
        let (result, envelope) = compute()?;

        if write {
            let entry = CachedEntry {
                result,
                envelope,
                inserted_at: self.clock.now(),
                ttl_secs: ttl.as_secs(),
            };
            match serde_json::to_string(&entry) {
                Ok(raw) => {
                    if let Err(e) = self.cache.set(key, &raw, ttl) {
                        warn!(error = %e, "Cache write failed, result not cached");
                    }
                }
                Err(e) => warn!(error = %e, "Cache entry serialization failed"),
            }
            return Ok(CacheOutcome {
                result: entry.result,
                envelope: entry.envelope,
                hit: false,
            });
        }

        Ok(CacheOutcome {
            result,
            envelope,
            hit: false,
        })
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(in_flight.entry(key.to_string()).or_default())
    }

    fn release(&self, key: &str, slot: Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and this caller hold it: nobody is waiting.
        if Arc::strong_count(&slot) <= 2 {
            in_flight.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    use crate::adapters::memory::MemoryCache;
    use crate::domain::{EncryptionMode, ManualClock, RiskLevel, ENVELOPE_VERSION};

    fn fingerprint(tag: &str) -> Fingerprint {
        serde_json::from_value(serde_json::json!(tag)).unwrap()
    }

    fn sample() -> (PredictionResult, EncryptionEnvelope) {
        let mut probabilities = BTreeMap::new();
        probabilities.insert("Benign".to_string(), 0.9);
        probabilities.insert("Malignant".to_string(), 0.1);
        (
            PredictionResult {
                predicted_class: "Benign".to_string(),
                probabilities,
                risk_level: RiskLevel::Medium,
            },
            EncryptionEnvelope {
                version: ENVELOPE_VERSION,
                mode: EncryptionMode::Passthrough,
                ciphertext: b"{}".to_vec(),
                key_ref: None,
                kem: None,
            },
        )
    }

    fn ttl(secs: u64) -> Ttl {
        Ttl::from_secs(secs).unwrap()
    }

    fn setup(single_flight: bool) -> (Arc<ManualClock>, Arc<MemoryCache>, CacheOrchestrator<MemoryCache>) {
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(MemoryCache::with_clock(clock.clone()));
        let orchestrator = CacheOrchestrator::new(Arc::clone(&cache), clock.clone(), single_flight);
        (clock, cache, orchestrator)
    }

    #[test]
    fn test_miss_then_hit() {
        let (_, _, orchestrator) = setup(false);
        let calls = AtomicUsize::new(0);
        let compute = || -> Result<_, ()> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(sample())
        };

        let first = orchestrator.get_or_compute(&fingerprint("f1"), ttl(60), compute).unwrap();
        let second = orchestrator.get_or_compute(&fingerprint("f1"), ttl(60), compute).unwrap();

        assert!(!first.hit);
        assert!(second.hit);
        assert_eq!(first.result, second.result);
        assert_eq!(first.envelope, second.envelope);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let (clock, _, orchestrator) = setup(false);
        let fp = fingerprint("f1");

        orchestrator.get_or_compute(&fp, ttl(60), || Ok::<_, ()>(sample())).unwrap();
        clock.advance(Duration::seconds(59));
        assert!(orchestrator.get_or_compute(&fp, ttl(60), || Ok::<_, ()>(sample())).unwrap().hit);

        clock.advance(Duration::seconds(1));
        assert!(!orchestrator.get_or_compute(&fp, ttl(60), || Ok::<_, ()>(sample())).unwrap().hit);
    }

    #[test]
    fn test_cache_outage_degrades_to_compute() {
        let (_, cache, orchestrator) = setup(true);
        cache.set_online(false);

        let outcome = orchestrator
            .get_or_compute(&fingerprint("f1"), ttl(60), || Ok::<_, ()>(sample()))
            .unwrap();
        assert!(!outcome.hit);

        cache.set_online(true);
        assert!(cache.is_empty(), "Write skipped while the cache was down");
    }

    #[test]
    fn test_compute_error_is_returned_and_nothing_cached() {
        let (_, cache, orchestrator) = setup(true);
        let err = orchestrator
            .get_or_compute(&fingerprint("f1"), ttl(60), || Err::<(PredictionResult, EncryptionEnvelope), _>("boom"))
            .unwrap_err();
        assert_eq!(err, "boom");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_corrupt_entry_is_recomputed() {
        let (_, cache, orchestrator) = setup(false);
        cache.set("prediction:f1", "not json", ttl(60)).unwrap();

        let outcome = orchestrator
            .get_or_compute(&fingerprint("f1"), ttl(60), || Ok::<_, ()>(sample()))
            .unwrap();
        assert!(!outcome.hit);
        assert!(orchestrator
            .get_or_compute(&fingerprint("f1"), ttl(60), || Ok::<_, ()>(sample()))
            .unwrap()
            .hit);
    }

    /// Memory cache whose deletes always fail.
    struct StickyCache {
        inner: MemoryCache,
        deletes: AtomicUsize,
    }

    impl CacheStore for StickyCache {
        fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str, ttl: Ttl) -> Result<(), CacheError> {
            self.inner.set(key, value, ttl)
        }

        fn exists(&self, key: &str) -> Result<bool, CacheError> {
            self.inner.exists(key)
        }

        fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Backend("DEL refused".to_string()))
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_failed_eviction_still_recomputes() {
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(StickyCache {
            inner: MemoryCache::with_clock(clock.clone()),
            deletes: AtomicUsize::new(0),
        });
        let orchestrator = CacheOrchestrator::new(Arc::clone(&cache), clock, false);
        cache.set("prediction:f1", "not json", ttl(60)).unwrap();

        let outcome = orchestrator
            .get_or_compute(&fingerprint("f1"), ttl(60), || Ok::<_, ()>(sample()))
            .unwrap();
        assert!(!outcome.hit);
        assert_eq!(cache.deletes.load(Ordering::SeqCst), 1);

        // The recomputed entry replaced the corrupt one despite the failed delete.
        assert!(orchestrator
            .get_or_compute(&fingerprint("f1"), ttl(60), || Ok::<_, ()>(sample()))
            .unwrap()
            .hit);
    }

    #[test]
    fn test_single_flight_computes_once() {
        let (_, _, orchestrator) = setup(true);
        let orchestrator = Arc::new(orchestrator);
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let orchestrator = Arc::clone(&orchestrator);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    orchestrator
                        .get_or_compute(&fingerprint("hot"), ttl(60), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(50));
                            Ok::<_, ()>(sample())
                        })
                        .unwrap()
                        .hit
                })
            })
            .collect();

        let hits: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(hits.iter().filter(|hit| !**hit).count(), 1);
        assert!(orchestrator.in_flight.lock().unwrap().is_empty());
    }
}
