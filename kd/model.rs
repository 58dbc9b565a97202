use crate::data::{ReferenceTable, SubjectObservation};
use polars::prelude::{DataFrame, PolarsError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the public, human-readable format of a fitted model
// when serialized to a TOML file.

/// Regression parameters for one biomarker against chronological age.
///
/// `slope`, `intercept`, and `residual_std_error` are the `(k, q, s)` triple
/// that drives estimation. The remaining fields are fit diagnostics; they are
/// `None` when the parameters come from a published reference panel rather
/// than a fit against a reference population.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiomarkerParameters {
    pub slope: f64,
    pub intercept: f64,
    pub residual_std_error: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r_squared: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_err: Option<f64>,
}

impl BiomarkerParameters {
    /// Inverse-variance weight of this biomarker's age estimate.
    pub fn weight(&self) -> f64 {
        let k = self.slope;
        let s = self.residual_std_error;
        (k * k) / (s * s)
    }
}

/// The top-level, self-contained, fitted model artifact.
///
/// A `KdModel` is fitted by construction: the only producers are
/// [`crate::estimate::fit_kd_model`] and
/// [`crate::reference::ReferencePanel::to_model`], both of which populate
/// every field. Treat a fitted model as an immutable, freely shareable value
/// (fit-then-freeze); `load` re-validates this invariant for artifacts that
/// arrive from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdModel {
    /// Column name holding chronological age in reference and subject tables.
    pub age_column: String,
    /// Fitted biomarker names. The order has no numerical effect; it fixes
    /// the row order of diagnostic output.
    pub biomarkers: Vec<String>,
    /// Per-biomarker regression parameters, keyed by biomarker name.
    pub params: HashMap<String, BiomarkerParameters>,
    /// Aggregate standard deviation of the biological-age estimate,
    /// `(sum_i k_i^2 / s_i^2)^(-1/2)`, or the published value for a
    /// reference panel.
    pub s_ba: f64,
}

/// How chronological age participates in a prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AgeMode {
    /// Combine biomarker estimates only.
    BiomarkersOnly,
    /// Fold chronological age in as one additional pseudo-biomarker with
    /// implicit slope 1 and intercept 0. Its noise term `s_ca` defaults to
    /// the model's own `s_ba` (the original method's simplifying assumption)
    /// and may be overridden with an independently fitted value.
    WithChronologicalAge { s_ca: Option<f64> },
}

/// Per-call prediction policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionSettings {
    pub age_mode: AgeMode,
    /// Optional `(low, high)` clamp applied to the final estimate. The
    /// estimator itself imposes no bounds; clamping is caller policy.
    pub clamp: Option<(f64, f64)>,
}

impl Default for PredictionSettings {
    fn default() -> PredictionSettings {
        PredictionSettings {
            age_mode: AgeMode::BiomarkersOnly,
            clamp: None,
        }
    }
}

impl PredictionSettings {
    pub fn biomarkers_only() -> PredictionSettings {
        PredictionSettings::default()
    }

    pub fn with_chronological_age() -> PredictionSettings {
        PredictionSettings {
            age_mode: AgeMode::WithChronologicalAge { s_ca: None },
            clamp: None,
        }
    }
}

/// Which estimator produced a biological-age value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Kd,
    KdWithChronologicalAge,
    PhenoAge,
}

/// A single biological-age point estimate. Pure output value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiologicalAgeEstimate {
    pub value: f64,
    pub method: Method,
}

/// Custom error type for model loading, saving, and validation.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Failed to assemble the summary table: {0}")]
    SummaryError(#[from] PolarsError),
    #[error(
        "Model is not fully fitted: biomarker(s) {missing:?} are listed but have no parameters."
    )]
    IncompleteModel { missing: Vec<String> },
    #[error("Biomarker '{biomarker}' has invalid parameters: {reason}.")]
    InvalidParameters {
        biomarker: String,
        reason: &'static str,
    },
    #[error("Aggregate uncertainty s_ba must be finite and strictly positive, got {0}.")]
    InvalidAggregateUncertainty(f64),
    #[error("No biomarker carries an age signal: every slope in the model is zero.")]
    NoAgeSignal,
}

/// Errors surfaced while estimating a subject's biological age.
#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Subject is missing required biomarker(s): {}.", .0.join(", "))]
    MissingBiomarkers(Vec<String>),
    #[error(
        "Chronological age was requested in the estimate but is absent from the observation."
    )]
    MissingChronologicalAge,
    #[error(
        "Chronological-age noise term s_ca must be finite and strictly positive, got {0}."
    )]
    InvalidChronologicalAgeNoise(f64),
    #[error("No biomarker contributed information: every usable weight is zero.")]
    NoUsableBiomarkers,
}

impl KdModel {
    /// Estimates biological age for one subject.
    ///
    /// Every biomarker the model was fitted on must be present in the
    /// observation; missing names are collected and reported together rather
    /// than one at a time. O(number of biomarkers), no caching.
    pub fn predict(
        &self,
        subject: &SubjectObservation,
        settings: &PredictionSettings,
    ) -> Result<BiologicalAgeEstimate, PredictionError> {
        let missing: Vec<String> = self
            .biomarkers
            .iter()
            .filter(|name| !subject.biomarkers.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(PredictionError::MissingBiomarkers(missing));
        }

        let values: Vec<f64> = self
            .biomarkers
            .iter()
            .map(|name| subject.biomarkers[name.as_str()])
            .collect();
        self.combine(&values, subject.chronological_age, settings)
    }

    /// Estimates biological age for every row of a table, in row order.
    ///
    /// The table must carry a column per fitted biomarker; when the settings
    /// fold chronological age in, the model's age column is required too.
    pub fn predict_table(
        &self,
        table: &ReferenceTable,
        settings: &PredictionSettings,
    ) -> Result<Vec<BiologicalAgeEstimate>, PredictionError> {
        let missing: Vec<String> = self
            .biomarkers
            .iter()
            .filter(|name| !table.has_column(name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(PredictionError::MissingBiomarkers(missing));
        }

        let columns: Vec<&ndarray::Array1<f64>> = self
            .biomarkers
            .iter()
            .map(|name| table.column(name).expect("presence checked above"))
            .collect();
        let age_column = table.column(&self.age_column);
        if matches!(settings.age_mode, AgeMode::WithChronologicalAge { .. })
            && age_column.is_none()
        {
            return Err(PredictionError::MissingChronologicalAge);
        }

        let mut estimates = Vec::with_capacity(table.n_rows());
        let mut row_values = vec![0.0; self.biomarkers.len()];
        for row in 0..table.n_rows() {
            for (slot, column) in row_values.iter_mut().zip(&columns) {
                *slot = column[row];
            }
            let ca = age_column.map(|c| c[row]);
            estimates.push(self.combine(&row_values, ca, settings)?);
        }
        Ok(estimates)
    }

    /// Inverse-variance weighted combination of per-biomarker age estimates.
    /// `values` is aligned with `self.biomarkers`.
    fn combine(
        &self,
        values: &[f64],
        chronological_age: Option<f64>,
        settings: &PredictionSettings,
    ) -> Result<BiologicalAgeEstimate, PredictionError> {
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for (name, &x) in self.biomarkers.iter().zip(values) {
            let params = &self.params[name];
            // A flat regression line carries no age information. Its weight
            // is zero, and its per-biomarker estimate is undefined (division
            // by a zero slope), so it is excluded from both sums.
            if params.slope == 0.0 {
                continue;
            }
            let weight = params.weight();
            let age_estimate = (x - params.intercept) / params.slope;
            numerator += weight * age_estimate;
            denominator += weight;
        }

        let method = match settings.age_mode {
            AgeMode::BiomarkersOnly => Method::Kd,
            AgeMode::WithChronologicalAge { s_ca } => {
                let ca = chronological_age.ok_or(PredictionError::MissingChronologicalAge)?;
                let s_ca = s_ca.unwrap_or(self.s_ba);
                if !s_ca.is_finite() || s_ca <= 0.0 {
                    return Err(PredictionError::InvalidChronologicalAgeNoise(s_ca));
                }
                let weight_ca = 1.0 / (s_ca * s_ca);
                numerator += weight_ca * ca;
                denominator += weight_ca;
                Method::KdWithChronologicalAge
            }
        };

        if denominator == 0.0 {
            return Err(PredictionError::NoUsableBiomarkers);
        }

        let mut value = numerator / denominator;
        if let Some((low, high)) = settings.clamp {
            value = value.min(high).max(low);
        }
        Ok(BiologicalAgeEstimate { value, method })
    }

    /// Per-biomarker diagnostics in fitted order: slope, intercept, residual
    /// standard error, r², correlation, and slope p-value/std error.
    /// Diagnostic columns are null for published reference panels.
    pub fn summary(&self) -> Result<DataFrame, ModelError> {
        let mut slopes = Vec::with_capacity(self.biomarkers.len());
        let mut intercepts = Vec::with_capacity(self.biomarkers.len());
        let mut residual_errors = Vec::with_capacity(self.biomarkers.len());
        let mut r_squared = Vec::with_capacity(self.biomarkers.len());
        let mut correlations = Vec::with_capacity(self.biomarkers.len());
        let mut p_values = Vec::with_capacity(self.biomarkers.len());
        let mut std_errs = Vec::with_capacity(self.biomarkers.len());
        for name in &self.biomarkers {
            let params = &self.params[name];
            slopes.push(params.slope);
            intercepts.push(params.intercept);
            residual_errors.push(params.residual_std_error);
            r_squared.push(params.r_squared);
            correlations.push(params.correlation);
            p_values.push(params.p_value);
            std_errs.push(params.std_err);
        }
        let df = polars::df!(
            "biomarker" => self.biomarkers.clone(),
            "slope" => slopes,
            "intercept" => intercepts,
            "residual_std_error" => residual_errors,
            "r_squared" => r_squared,
            "correlation" => correlations,
            "p_value" => p_values,
            "std_err" => std_errs,
        )?;
        Ok(df)
    }

    /// Checks the fitted-model invariant: every listed biomarker has
    /// parameters, every residual standard error and `s_ba` is finite and
    /// strictly positive, and at least one slope is nonzero.
    pub fn validate(&self) -> Result<(), ModelError> {
        let missing: Vec<String> = self
            .biomarkers
            .iter()
            .filter(|name| !self.params.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ModelError::IncompleteModel { missing });
        }
        for name in &self.biomarkers {
            let params = &self.params[name];
            if !params.slope.is_finite() || !params.intercept.is_finite() {
                return Err(ModelError::InvalidParameters {
                    biomarker: name.clone(),
                    reason: "slope and intercept must be finite",
                });
            }
            if !params.residual_std_error.is_finite() || params.residual_std_error <= 0.0 {
                return Err(ModelError::InvalidParameters {
                    biomarker: name.clone(),
                    reason: "residual standard error must be finite and strictly positive",
                });
            }
        }
        if !self.s_ba.is_finite() || self.s_ba <= 0.0 {
            return Err(ModelError::InvalidAggregateUncertainty(self.s_ba));
        }
        if self
            .biomarkers
            .iter()
            .all(|name| self.params[name.as_str()].slope == 0.0)
        {
            return Err(ModelError::NoAgeSignal);
        }
        Ok(())
    }

    /// Saves the fitted model to a file in a human-readable TOML format.
    /// Floats are written shortest-roundtrip, so a saved model reproduces
    /// predictions bit-for-bit after `load`.
    pub fn save(&self, path: &str) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads a fitted model from a TOML file, re-validating the fitted-model
    /// invariant (a hand-edited or truncated artifact is rejected here).
    pub fn load(path: &str) -> Result<KdModel, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model: KdModel = toml::from_str(&toml_string)?;
        model.validate()?;
        Ok(model)
    }
}
