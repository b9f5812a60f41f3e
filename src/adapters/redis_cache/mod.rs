//! Redis cache backend (feature `redis`).
//!
//! Blocking client with connect and read timeouts. Values are stored with
//! `SET key value EX ttl`, so expiry is enforced by the server.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use redis::{Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};

use crate::ports::{CacheError, CacheStore, Connector, Ttl};

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
            Self::Unavailable
        } else {
            Self::Backend(e.to_string())
        }
    }
}

/// One blocking Redis connection.
pub struct RedisCache {
    conn: Mutex<redis::Connection>,
}

impl RedisCache {
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T, CacheError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut conn)?)
    }

    fn ping(&self) -> bool {
        self.with_conn(|conn| redis::cmd("PING").query::<String>(conn))
            .is_ok()
    }
}

impl CacheStore for RedisCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.with_conn(|conn| redis::cmd("GET").arg(key).query(conn))
    }

    fn set(&self, key: &str, value: &str, ttl: Ttl) -> Result<(), CacheError> {
        self.with_conn(|conn| {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl.as_secs())
                .query(conn)
        })
    }

    fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.with_conn(|conn| redis::cmd("EXISTS").arg(key).query(conn))
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let removed: i64 = self.with_conn(|conn| redis::cmd("DEL").arg(key).query(conn))?;
        Ok(removed > 0)
    }

    fn is_connected(&self) -> bool {
        self.ping()
    }
}

/// Opens [`RedisCache`] connections.
#[derive(Clone)]
pub struct RedisConnector {
    host: String,
    port: u16,
    db: i64,
    password: Option<String>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl RedisConnector {
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        db: i64,
        password: Option<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            db,
            password,
            connect_timeout,
            read_timeout,
        }
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: self.db,
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }
}

// Password stays out of logs.
impl std::fmt::Debug for RedisConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnector")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Connector for RedisConnector {
    type Handle = RedisCache;
    type Error = redis::RedisError;

    fn service(&self) -> &'static str {
        "redis-cache"
    }

    fn connect(&self) -> Result<RedisCache, redis::RedisError> {
        let client = Client::open(self.connection_info())?;
        let conn = client.get_connection_with_timeout(self.connect_timeout)?;
        conn.set_read_timeout(Some(self.read_timeout))?;
        conn.set_write_timeout(Some(self.read_timeout))?;
        Ok(RedisCache {
            conn: Mutex::new(conn),
        })
    }

    fn ping(&self, handle: &RedisCache) -> bool {
        handle.ping()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ManagedConnection;

    #[test]
    fn test_debug_redacts_password() {
        let connector = RedisConnector::new(
            "localhost",
            6379,
            0,
            Some("hunter2".to_string()),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        let debug = format!("{connector:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_unreachable_server_is_not_connected() {
        // Port 1 on localhost refuses connections.
        let connector = RedisConnector::new(
            "127.0.0.1",
            1,
            0,
            None,
            Duration::from_millis(200),
            Duration::from_millis(200),
        );
        let conn = ManagedConnection::new(connector);
        assert!(!CacheStore::is_connected(&conn));
        assert!(matches!(conn.get("k"), Err(CacheError::Unavailable)));
    }
}
