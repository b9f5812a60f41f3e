//! Inference port: the external model collaborator.

use thiserror::Error;

use crate::domain::{AssemblyError, ClinicalFeatureVector, ImagePayload};

/// Errors from the inference engine. Fatal for the request.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Model not loaded")]
    ModelNotLoaded,

    #[error("Inference failed: {0}")]
    Engine(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(#[from] AssemblyError),
}

/// Trait for multimodal classifiers.
///
/// Implementations must return a probability distribution aligned with
/// [`InferenceEngine::class_names`].
pub trait InferenceEngine: Send + Sync {
    /// Check if a model is loaded and ready.
    fn is_loaded(&self) -> bool;

    /// Output class names, in probability order.
    fn class_names(&self) -> &[String];

    /// Class that escalates to `High` risk.
    fn high_severity_class(&self) -> &str;

    /// Run the model.
    ///
    /// # Errors
    /// Returns `InferenceError::ModelNotLoaded` if no model is loaded.
    fn infer(
        &self,
        image: &ImagePayload,
        features: &ClinicalFeatureVector,
    ) -> Result<Vec<f64>, InferenceError>;
}
