//! Prediction result types and the assembler that builds them from raw
//! class probabilities.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tolerance on the probability sum produced by the inference engine.
pub const PROBABILITY_SUM_TOLERANCE: f64 = 1e-3;

/// Winning probability above which a high-severity class is `High` risk.
const HIGH_RISK_THRESHOLD: f64 = 0.7;

/// Winning probability above which any class is at least `Medium` risk.
const MEDIUM_RISK_THRESHOLD: f64 = 0.5;

/// Risk tier attached to a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    /// Weak or uncertain signal
    Low,
    /// Confident prediction, follow-up recommended
    Medium,
    /// Confident prediction of the most severe class
    High,
}

impl RiskLevel {
    /// Get a human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Low => "Low risk - No confident indicators",
            Self::Medium => "Medium risk - Follow-up recommended",
            Self::High => "High risk - Immediate consultation advised",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
        }
    }
}

/// Structured prediction returned to callers and sealed into envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Arg-max class name
    pub predicted_class: String,

    /// Class name to probability; sums to 1 within tolerance
    pub probabilities: BTreeMap<String, f64>,

    /// Risk tier derived from the winning class and its probability
    pub risk_level: RiskLevel,
}

impl PredictionResult {
    /// Probability of the predicted class.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.probabilities
            .get(&self.predicted_class)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Reasons raw engine output cannot be assembled.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssemblyError {
    #[error("No class probabilities produced")]
    Empty,

    #[error("Got {probabilities} probabilities for {classes} classes")]
    LengthMismatch { probabilities: usize, classes: usize },

    #[error("Probability {0} is not in [0, 1]")]
    OutOfRange(f64),

    #[error("Probabilities sum to {0}, expected 1")]
    NotNormalized(f64),
}

/// Turns engine probabilities into a [`PredictionResult`].
///
/// The assembler does not re-normalize; engines are expected to emit a
/// distribution already.
#[derive(Debug, Clone)]
pub struct ResultAssembler {
    high_severity_class: String,
}

impl ResultAssembler {
    /// Create an assembler that escalates `high_severity_class` to `High` risk.
    #[must_use]
    pub fn new(high_severity_class: impl Into<String>) -> Self {
        Self {
            high_severity_class: high_severity_class.into(),
        }
    }

    #[must_use]
    pub fn high_severity_class(&self) -> &str {
        &self.high_severity_class
    }

    /// Assemble a result from probabilities aligned with `class_names`.
    ///
    /// Ties resolve to the earliest class.
    ///
    /// # Errors
    /// Returns error if the output is empty, misaligned, or not a distribution.
    pub fn assemble<S: AsRef<str>>(
        &self,
        probabilities: &[f64],
        class_names: &[S],
    ) -> Result<PredictionResult, AssemblyError> {
        if probabilities.is_empty() {
            return Err(AssemblyError::Empty);
        }
        if probabilities.len() != class_names.len() {
            return Err(AssemblyError::LengthMismatch {
                probabilities: probabilities.len(),
                classes: class_names.len(),
            });
        }
        if let Some(bad) = probabilities
            .iter()
            .find(|p| !p.is_finite() || **p < 0.0 || **p > 1.0)
        {
            return Err(AssemblyError::OutOfRange(*bad));
        }
        let sum: f64 = probabilities.iter().sum();
        if (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
            return Err(AssemblyError::NotNormalized(sum));
        }

        let mut best = 0;
        for (i, p) in probabilities.iter().enumerate() {
            if *p > probabilities[best] {
                best = i;
            }
        }
        let confidence = probabilities[best];
        let predicted_class = class_names[best].as_ref().to_string();

        let risk_level = if predicted_class == self.high_severity_class
            && confidence > HIGH_RISK_THRESHOLD
        {
            RiskLevel::High
        } else if confidence > MEDIUM_RISK_THRESHOLD {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let probabilities = class_names
            .iter()
            .map(|name| name.as_ref().to_string())
            .zip(probabilities.iter().copied())
            .collect();

        Ok(PredictionResult {
            predicted_class,
            probabilities,
            risk_level,
        })
    }
}
