//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the application and external systems (model, cache, record store).

mod cache;
mod connector;
mod inference;
mod records;

pub use cache::{CacheError, CacheKey, CacheStore, Ttl};
pub use connector::Connector;
pub use inference::{InferenceEngine, InferenceError};
pub use records::{RecordStore, StoreError, UpsertOutcome};
