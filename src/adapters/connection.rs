//! Explicitly owned client handle with a liveness ping and one lazy
//! reconnect per call.
//!
//! A failed reconnect is swallowed into the "not connected" state; callers
//! see `Unavailable` and degrade instead of failing.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::domain::{SignedRecord, StoredRecord};
use crate::ports::{
    CacheError, CacheStore, Connector, RecordStore, StoreError, Ttl, UpsertOutcome,
};

/// Connection to one external service.
pub struct ManagedConnection<C: Connector> {
    connector: C,
    handle: Mutex<Option<Arc<C::Handle>>>,
}

impl<C: Connector> ManagedConnection<C> {
    /// Connect eagerly. A failure is logged and leaves the connection in the
    /// "not connected" state; it never fails construction.
    pub fn new(connector: C) -> Self {
        let handle = match connector.connect() {
            Ok(handle) => {
                info!(service = connector.service(), "Connected");
                Some(Arc::new(handle))
            }
            Err(e) => {
                warn!(service = connector.service(), error = %e, "Initial connection failed");
                None
            }
        };
        Self {
            connector,
            handle: Mutex::new(handle),
        }
    }

    /// Connection that only tries to connect on first use.
    pub fn lazy(connector: C) -> Self {
        Self {
            connector,
            handle: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Ping the current handle and reconnect once if the ping fails.
    ///
    /// `None` means not connected.
    pub fn acquire(&self) -> Option<Arc<C::Handle>> {
        let current = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if let Some(handle) = current {
            if self.connector.ping(&handle) {
                return Some(handle);
            }
            warn!(service = self.connector.service(), "Liveness check failed, reconnecting");
        }

        let mut slot = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        match self.connector.connect() {
            Ok(handle) => {
                let handle = Arc::new(handle);
                *slot = Some(Arc::clone(&handle));
                info!(service = self.connector.service(), "Reconnected");
                Some(handle)
            }
            Err(e) => {
                *slot = None;
                debug!(service = self.connector.service(), error = %e, "Reconnect failed");
                None
            }
        }
    }

    /// Whether the service is reachable right now.
    pub fn is_connected(&self) -> bool {
        self.acquire().is_some()
    }

    /// Drop the handle. The next call reconnects.
    pub fn close(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            self.connector.close(&handle);
            info!(service = self.connector.service(), "Connection closed");
        }
    }
}

impl<C> CacheStore for ManagedConnection<C>
where
    C: Connector,
    C::Handle: CacheStore,
{
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.acquire().ok_or(CacheError::Unavailable)?.get(key)
    }

    fn set(&self, key: &str, value: &str, ttl: Ttl) -> Result<(), CacheError> {
        self.acquire().ok_or(CacheError::Unavailable)?.set(key, value, ttl)
    }

    fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.acquire().ok_or(CacheError::Unavailable)?.exists(key)
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.acquire().ok_or(CacheError::Unavailable)?.delete(key)
    }

    fn is_connected(&self) -> bool {
        ManagedConnection::is_connected(self)
    }

    fn close(&self) {
        ManagedConnection::close(self);
    }
}

impl<C> RecordStore for ManagedConnection<C>
where
    C: Connector,
    C::Handle: RecordStore,
{
    fn upsert(&self, record: &SignedRecord) -> Result<UpsertOutcome, StoreError> {
        self.acquire().ok_or(StoreError::Unavailable)?.upsert(record)
    }

    fn list_by_patient(&self, patient_id: &str, limit: usize) -> Result<Vec<StoredRecord>, StoreError> {
        self.acquire()
            .ok_or(StoreError::Unavailable)?
            .list_by_patient(patient_id, limit)
    }

    fn is_connected(&self) -> bool {
        ManagedConnection::is_connected(self)
    }

    fn close(&self) {
        ManagedConnection::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FlakyConnector {
        up: AtomicBool,
        connects: AtomicUsize,
        closes: AtomicUsize,
    }

    impl Connector for Arc<FlakyConnector> {
        type Handle = usize;
        type Error = String;

        fn service(&self) -> &'static str {
            "flaky"
        }

        fn connect(&self) -> Result<usize, String> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst);
            if self.up.load(Ordering::SeqCst) {
                Ok(n)
            } else {
                Err("refused".to_string())
            }
        }

        fn ping(&self, _handle: &usize) -> bool {
            self.up.load(Ordering::SeqCst)
        }

        fn close(&self, _handle: &usize) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn flaky(up: bool) -> Arc<FlakyConnector> {
        let connector = Arc::new(FlakyConnector::default());
        connector.up.store(up, Ordering::SeqCst);
        connector
    }

    #[test]
    fn test_initial_failure_is_not_fatal() {
        let connector = flaky(false);
        let conn = ManagedConnection::new(Arc::clone(&connector));
        assert!(!conn.is_connected());

        connector.up.store(true, Ordering::SeqCst);
        assert!(conn.is_connected(), "Lazy reconnect once the service is back");
    }

    #[test]
    fn test_healthy_handle_is_reused() {
        let connector = flaky(true);
        let conn = ManagedConnection::new(Arc::clone(&connector));
        let a = conn.acquire().expect("Connected");
        let b = conn.acquire().expect("Connected");
        assert_eq!(*a, *b);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exactly_one_reconnect_per_call() {
        let connector = flaky(true);
        let conn = ManagedConnection::new(Arc::clone(&connector));
        connector.up.store(false, Ordering::SeqCst);

        assert!(conn.acquire().is_none());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert!(conn.acquire().is_none());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_close_tears_down_handle() {
        let connector = flaky(true);
        let conn = ManagedConnection::new(Arc::clone(&connector));
        conn.close();
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);

        let lazy = ManagedConnection::lazy(Arc::clone(&connector));
        lazy.close();
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
    }
}
