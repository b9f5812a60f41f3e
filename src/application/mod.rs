//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports to implement
//! the core use cases of the application.

mod cache_aside;
pub mod dto;
mod prediction;

pub use cache_aside::{CacheOrchestrator, CacheOutcome};
pub use dto::{
    HealthResponse, HealthStatus, PredictRequest, PredictResponse, UploadRecordRequest,
    UploadRecordResponse, UploadStatus,
};
pub use prediction::{PredictionService, ServiceSettings};
