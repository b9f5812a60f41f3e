//! Adapters layer: Concrete implementations of ports.
//!
//! - `connection`: owned client handle with ping + lazy reconnect
//! - `memory` / `redis_cache`: cache backends, `cache_provider` picks one
//! - `sqlite`: SQLite record store
//! - `linear`: softmax-linear multimodal model
//! - `sanitize`: PII filtering for logs

mod cache_provider;
mod connection;
pub mod linear;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_cache;
pub mod sanitize;
pub mod sqlite;

pub use cache_provider::CacheProvider;
pub use connection::ManagedConnection;
