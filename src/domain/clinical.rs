//! Clinical input types for multimodal risk prediction.
//!
//! Raw values arrive in clinical units and are scaled into a bounded
//! feature vector before they reach the inference engine or the cache key.

use serde::{Deserialize, Serialize};

/// Number of clinical features consumed by the model.
pub const FEATURE_COUNT: usize = 10;

/// Feature names in model order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "age",
    "gender",
    "bmi",
    "blood_pressure_systolic",
    "blood_pressure_diastolic",
    "cholesterol",
    "glucose",
    "smoking",
    "family_history",
    "symptoms_severity",
];

/// Divisors applied to each raw value, in model order.
/// Flags (gender, smoking, family history) pass through unscaled.
const SCALE_DIVISORS: [f64; FEATURE_COUNT] =
    [100.0, 1.0, 50.0, 200.0, 120.0, 300.0, 200.0, 1.0, 1.0, 10.0];

/// Raw clinical data as submitted with a prediction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalData {
    /// Age in years
    pub age: f64,

    /// 0 = female, 1 = male
    pub gender: u8,

    /// Body mass index in kg/m^2
    pub bmi: f64,

    /// Systolic blood pressure in mmHg
    pub blood_pressure_systolic: f64,

    /// Diastolic blood pressure in mmHg
    pub blood_pressure_diastolic: f64,

    /// Total cholesterol in mg/dL
    pub cholesterol: f64,

    /// Fasting glucose in mg/dL
    pub glucose: f64,

    /// 0 = no, 1 = yes
    pub smoking: u8,

    /// 0 = no, 1 = yes
    pub family_history: u8,

    /// Self-reported symptom severity on a 0-10 scale
    pub symptoms_severity: f64,
}

impl ClinicalData {
    /// Validate that all values are finite and within plausible clinical ranges.
    ///
    /// # Errors
    /// Returns every violated constraint, not just the first one.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let ranges: [(&str, f64, f64, f64); 7] = [
            ("age", self.age, 0.0, 120.0),
            ("bmi", self.bmi, 5.0, 100.0),
            ("blood_pressure_systolic", self.blood_pressure_systolic, 50.0, 260.0),
            ("blood_pressure_diastolic", self.blood_pressure_diastolic, 30.0, 160.0),
            ("cholesterol", self.cholesterol, 50.0, 600.0),
            ("glucose", self.glucose, 20.0, 600.0),
            ("symptoms_severity", self.symptoms_severity, 0.0, 10.0),
        ];
        for (name, value, lo, hi) in ranges {
            if !value.is_finite() {
                errors.push(format!("{name} must be a finite number"));
            } else if !(lo..=hi).contains(&value) {
                errors.push(format!("{name} {value} out of range [{lo}, {hi}]"));
            }
        }

        for (name, flag) in [
            ("gender", self.gender),
            ("smoking", self.smoking),
            ("family_history", self.family_history),
        ] {
            if flag > 1 {
                errors.push(format!("{name} {flag} must be 0 or 1"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Raw values in model order, before scaling.
    #[must_use]
    pub fn to_raw_vec(&self) -> [f64; FEATURE_COUNT] {
        [
            self.age,
            f64::from(self.gender),
            self.bmi,
            self.blood_pressure_systolic,
            self.blood_pressure_diastolic,
            self.cholesterol,
            self.glucose,
            f64::from(self.smoking),
            f64::from(self.family_history),
            self.symptoms_severity,
        ]
    }

    /// Validate and scale into the feature vector consumed by the model.
    ///
    /// # Errors
    /// Returns the validation messages if any value is out of range.
    pub fn normalize(&self) -> Result<ClinicalFeatureVector, Vec<String>> {
        self.validate()?;

        let raw = self.to_raw_vec();
        let mut values = [0.0; FEATURE_COUNT];
        for (i, (value, divisor)) in raw.iter().zip(SCALE_DIVISORS).enumerate() {
            values[i] = value / divisor;
        }
        Ok(ClinicalFeatureVector { values })
    }
}

/// Scaled clinical features, in model order.
///
/// Only constructed through [`ClinicalData::normalize`] or
/// [`ClinicalFeatureVector::from_values`], so every instance is finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClinicalFeatureVector {
    values: [f64; FEATURE_COUNT],
}

impl ClinicalFeatureVector {
    /// Build a vector from already-scaled values.
    ///
    /// # Errors
    /// Returns error if the length is wrong or any value is not finite.
    pub fn from_values(values: &[f64]) -> Result<Self, String> {
        if values.len() != FEATURE_COUNT {
            return Err(format!(
                "Expected {FEATURE_COUNT} features, got {}",
                values.len()
            ));
        }
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(format!("Feature {} is not finite", FEATURE_NAMES[pos]));
        }

        let mut out = [0.0; FEATURE_COUNT];
        out.copy_from_slice(values);
        Ok(Self { values: out })
    }

    /// Scaled values in model order.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ClinicalData {
        ClinicalData {
            age: 35.0,
            gender: 1,
            bmi: 20.0,
            blood_pressure_systolic: 120.0,
            blood_pressure_diastolic: 60.0,
            cholesterol: 150.0,
            glucose: 80.0,
            smoking: 0,
            family_history: 0,
            symptoms_severity: 2.0,
        }
    }

    #[test]
    fn test_normalize_reference_patient() {
        let vector = sample().normalize().expect("Should normalize");
        let expected = [0.35, 1.0, 0.4, 0.6, 0.5, 0.5, 0.4, 0.0, 0.0, 0.2];

        for (got, want) in vector.as_slice().iter().zip(expected) {
            assert!((got - want).abs() < 1e-12, "got {got}, want {want}");
        }
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let a = sample().normalize().expect("Should normalize");
        let b = sample().normalize().expect("Should normalize");
        assert_eq!(a, b);
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let invalid = ClinicalData {
            age: 150.0,
            gender: 2,
            glucose: f64::NAN,
            ..sample()
        };

        let errors = invalid.validate().expect_err("Should reject");
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.starts_with("age")));
        assert!(errors.iter().any(|e| e.starts_with("gender")));
        assert!(errors.iter().any(|e| e.contains("finite")));
    }

    #[test]
    fn test_from_values_checks_shape() {
        assert!(ClinicalFeatureVector::from_values(&[0.1; 9]).is_err());
        assert!(ClinicalFeatureVector::from_values(&[f64::INFINITY; 10]).is_err());
        assert!(ClinicalFeatureVector::from_values(&[0.1; 10]).is_ok());
    }
}
