//! Linear multimodal classifier: Implementation of InferenceEngine.
//!
//! Per class, a logit is a weighted sum of the scaled clinical vector plus
//! two image statistics (mean and standard deviation of the byte values
//! scaled to `[0, 1]`). Softmax turns logits into a distribution.
//!
//! The model is a JSON file:
//!
//! ```json
//! {
//!   "version": 1,
//!   "class_names": ["Benign", "Malignant", "Suspicious"],
//!   "high_severity_class": "Malignant",
//!   "clinical_weights": [[...10 values...], ...],
//!   "image_weights": [[mean_w, std_w], ...],
//!   "biases": [...]
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{ClinicalFeatureVector, ImagePayload, FEATURE_COUNT};
use crate::ports::{InferenceEngine, InferenceError};

/// Number of image statistics fed to the model.
pub const IMAGE_FEATURE_COUNT: usize = 2;

const MAX_CLASSES: usize = 16;

/// Model parameters as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub version: u32,
    pub class_names: Vec<String>,
    pub high_severity_class: String,
    pub clinical_weights: Vec<Vec<f64>>,
    pub image_weights: Vec<Vec<f64>>,
    pub biases: Vec<f64>,
}

impl LinearModel {
    /// Sanity-check dimensions and values.
    ///
    /// # Errors
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.version != 1 {
            return Err(format!("Unsupported model version: {}", self.version));
        }
        let n = self.class_names.len();
        if n < 2 || n > MAX_CLASSES {
            return Err(format!("Invalid class count: got {n}, expected 2..={MAX_CLASSES}"));
        }
        if !self.class_names.contains(&self.high_severity_class) {
            return Err(format!(
                "High-severity class {} is not a model class",
                self.high_severity_class
            ));
        }
        if self.clinical_weights.len() != n || self.image_weights.len() != n || self.biases.len() != n {
            return Err("Model parameter lengths do not match class_names length".into());
        }
        if self.clinical_weights.iter().any(|row| row.len() != FEATURE_COUNT) {
            return Err(format!("Every clinical weight row needs {FEATURE_COUNT} values"));
        }
        if self.image_weights.iter().any(|row| row.len() != IMAGE_FEATURE_COUNT) {
            return Err(format!("Every image weight row needs {IMAGE_FEATURE_COUNT} values"));
        }
        let all_finite = self
            .clinical_weights
            .iter()
            .chain(self.image_weights.iter())
            .flatten()
            .chain(self.biases.iter())
            .all(|v| v.is_finite());
        if !all_finite {
            return Err("Model parameters must be finite".into());
        }
        Ok(())
    }
}

/// Inference engine backed by a [`LinearModel`].
#[derive(Debug, Default)]
pub struct LinearModelEngine {
    model: Option<LinearModel>,
}

impl LinearModelEngine {
    /// Engine with no model; every inference fails with `ModelNotLoaded`.
    #[must_use]
    pub fn unloaded() -> Self {
        Self { model: None }
    }

    /// Load and validate a model file.
    ///
    /// # Errors
    /// Returns error if the file is missing, unparsable, or inconsistent.
    pub fn load(path: &Path) -> Result<Self, InferenceError> {
        let content = fs::read_to_string(path)
            .map_err(|e| InferenceError::Engine(format!("Failed to read model {}: {e}", path.display())))?;
        let model: LinearModel = serde_json::from_str(&content)
            .map_err(|e| InferenceError::Engine(format!("Invalid model format: {e}")))?;
        let engine = Self::from_model(model)?;
        info!(path = %path.display(), classes = engine.class_names().len(), "Model loaded");
        Ok(engine)
    }

    /// # Errors
    /// Returns error if the model fails validation.
    pub fn from_model(model: LinearModel) -> Result<Self, InferenceError> {
        model.validate().map_err(InferenceError::Engine)?;
        Ok(Self { model: Some(model) })
    }
}

/// Mean and standard deviation of the image bytes, scaled to `[0, 1]`.
fn image_statistics(image: &ImagePayload) -> [f64; IMAGE_FEATURE_COUNT] {
    let bytes = image.as_bytes();
    if bytes.is_empty() {
        return [0.0, 0.0];
    }
    let n = bytes.len() as f64;
    let mean = bytes.iter().map(|b| f64::from(*b) / 255.0).sum::<f64>() / n;
    let variance = bytes
        .iter()
        .map(|b| {
            let d = f64::from(*b) / 255.0 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    [mean, variance.sqrt()]
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

impl InferenceEngine for LinearModelEngine {
    fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn class_names(&self) -> &[String] {
        match &self.model {
            Some(model) => &model.class_names,
            None => &[],
        }
    }

    fn high_severity_class(&self) -> &str {
        self.model.as_ref().map_or("", |m| m.high_severity_class.as_str())
    }

    fn infer(
        &self,
        image: &ImagePayload,
        features: &ClinicalFeatureVector,
    ) -> Result<Vec<f64>, InferenceError> {
        let model = self.model.as_ref().ok_or(InferenceError::ModelNotLoaded)?;
        let stats = image_statistics(image);

        let logits: Vec<f64> = model
            .clinical_weights
            .iter()
            .zip(&model.image_weights)
            .zip(&model.biases)
            .map(|((clinical, imaging), bias)| {
                let c: f64 = clinical.iter().zip(features.as_slice()).map(|(w, x)| w * x).sum();
                let i: f64 = imaging.iter().zip(stats.iter()).map(|(w, x)| w * x).sum();
                c + i + bias
            })
            .collect();

        let probabilities = softmax(&logits);
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(InferenceError::Engine("Non-finite model output".into()));
        }
        Ok(probabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn toy_model() -> LinearModel {
        LinearModel {
            version: 1,
            class_names: vec!["Benign".into(), "Malignant".into(), "Suspicious".into()],
            high_severity_class: "Malignant".into(),
            clinical_weights: vec![
                vec![0.0; FEATURE_COUNT],
                vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 4.0, 4.0, 0.0],
                vec![0.0; FEATURE_COUNT],
            ],
            image_weights: vec![vec![0.0, 0.0]; 3],
            biases: vec![1.0, 0.0, 0.0],
        }
    }

    fn vector(values: [f64; FEATURE_COUNT]) -> ClinicalFeatureVector {
        ClinicalFeatureVector::from_values(&values).unwrap()
    }

    fn image() -> ImagePayload {
        ImagePayload::from_bytes(vec![128; 50]).unwrap()
    }

    #[test]
    fn test_unloaded_engine_fails() {
        let engine = LinearModelEngine::unloaded();
        assert!(!engine.is_loaded());
        assert!(engine.class_names().is_empty());
        assert!(matches!(
            engine.infer(&image(), &vector([0.0; FEATURE_COUNT])),
            Err(InferenceError::ModelNotLoaded)
        ));
    }

    #[test]
    fn test_output_is_distribution() {
        let engine = LinearModelEngine::from_model(toy_model()).unwrap();
        let probs = engine.infer(&image(), &vector([0.5; FEATURE_COUNT])).unwrap();

        assert_eq!(probs.len(), 3);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_weights_move_prediction() {
        let engine = LinearModelEngine::from_model(toy_model()).unwrap();
        let calm = engine.infer(&image(), &vector([0.0; FEATURE_COUNT])).unwrap();
        let mut risky_values = [0.0; FEATURE_COUNT];
        risky_values[7] = 1.0;
        risky_values[8] = 1.0;
        let risky = engine.infer(&image(), &vector(risky_values)).unwrap();

        assert!(calm[0] > calm[1]);
        assert!(risky[1] > 0.9);
    }

    #[test]
    fn test_rejects_inconsistent_model() {
        let mut model = toy_model();
        model.biases.pop();
        assert!(LinearModelEngine::from_model(model).is_err());

        let mut model = toy_model();
        model.high_severity_class = "Unknown".into();
        assert!(LinearModelEngine::from_model(model).is_err());

        let mut model = toy_model();
        model.clinical_weights[0].push(1.0);
        assert!(LinearModelEngine::from_model(model).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, serde_json::to_vec(&toy_model()).unwrap()).unwrap();

        let engine = LinearModelEngine::load(&path).unwrap();
        assert_eq!(engine.high_severity_class(), "Malignant");
        assert!(LinearModelEngine::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_bundled_model_is_valid() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("models/multimodal_linear.json");
        let engine = LinearModelEngine::load(&path).expect("Bundled model should load");
        assert_eq!(engine.class_names(), ["Benign", "Malignant", "Suspicious"]);
    }

    #[test]
    fn test_image_statistics() {
        let flat = ImagePayload::from_bytes(vec![255; 10]).unwrap();
        assert_eq!(image_statistics(&flat), [1.0, 0.0]);

        let split = ImagePayload::from_bytes(vec![0, 255]).unwrap();
        let [mean, std] = image_statistics(&split);
        assert!((mean - 0.5).abs() < 1e-12);
        assert!((std - 0.5).abs() < 1e-12);
    }
}
