//! # Klemera-Doubal Model Fitting
//!
//! This module fits the per-biomarker regression models that a [`KdModel`]
//! combines at prediction time. Each biomarker is regressed on chronological
//! age by ordinary least squares, `x = q + k * CA + e`, and the model-level
//! aggregate uncertainty `s_ba` is derived from the fitted slopes and
//! residual errors. Fitting is a pure function of the reference table; the
//! returned model is immutable.
//!
//! Reference: Klemera P, Doubal S. A new approach to the concept and
//! computation of biological age. Mech Ageing Dev. 2006;127(3):240-248.

use crate::data::ReferenceTable;
use crate::model::{BiomarkerParameters, KdModel};
use ndarray::Array1;
use std::collections::HashMap;
use thiserror::Error;

/// Residual degrees of freedom must be at least one, so a simple linear
/// regression needs three reference subjects.
pub const MINIMUM_REFERENCE_ROWS: usize = 3;

/// A comprehensive error type for the model fitting process.
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("Column '{0}' was not found in the reference table.")]
    ColumnNotFound(String),
    #[error(
        "Reference table has {found} rows, but at least {required} are needed for a least-squares fit."
    )]
    InsufficientData { found: usize, required: usize },
    #[error("The biomarker panel is empty; at least one biomarker is required.")]
    EmptyPanel,
    #[error(
        "Chronological age column '{0}' has zero variance; biomarkers cannot be regressed on it."
    )]
    NoAgeVariance(String),
    #[error(
        "Biomarker '{0}' is exactly collinear with chronological age: its residual standard error is zero and cannot be used as a weight."
    )]
    DegenerateResidual(String),
    #[error(
        "No biomarker in the panel carries an age signal: every fitted slope is zero, so the aggregate uncertainty is undefined."
    )]
    NoAgeSignal,
}

/// The main entry point for model fitting.
///
/// Regresses each named biomarker on the chronological-age column of the
/// reference table, records the fit diagnostics, and derives the aggregate
/// uncertainty `s_ba`. Biomarker order is preserved for stable diagnostic
/// output; it has no numerical effect.
pub fn fit_kd_model(
    table: &ReferenceTable,
    biomarkers: &[String],
    age_column: &str,
) -> Result<KdModel, EstimationError> {
    if biomarkers.is_empty() {
        return Err(EstimationError::EmptyPanel);
    }
    let age = table
        .column(age_column)
        .ok_or_else(|| EstimationError::ColumnNotFound(age_column.to_string()))?;
    if table.n_rows() < MINIMUM_REFERENCE_ROWS {
        return Err(EstimationError::InsufficientData {
            found: table.n_rows(),
            required: MINIMUM_REFERENCE_ROWS,
        });
    }

    log::info!(
        "Fitting Klemera-Doubal model: {} biomarker(s) against '{}' over {} reference subjects.",
        biomarkers.len(),
        age_column,
        table.n_rows()
    );

    let mut params = HashMap::with_capacity(biomarkers.len());
    for name in biomarkers {
        let values = table
            .column(name)
            .ok_or_else(|| EstimationError::ColumnNotFound(name.clone()))?;
        let fitted = fit_biomarker(age, values, name)?;
        log::debug!(
            "  {name}: k={:.6} q={:.6} s={:.6} r2={:.4}",
            fitted.slope,
            fitted.intercept,
            fitted.residual_std_error,
            fitted.r_squared.unwrap_or(f64::NAN)
        );
        params.insert(name.clone(), fitted);
    }

    let weight_sum: f64 = params.values().map(BiomarkerParameters::weight).sum();
    if weight_sum == 0.0 {
        return Err(EstimationError::NoAgeSignal);
    }
    let s_ba = 1.0 / weight_sum.sqrt();
    log::info!("Aggregate biological-age uncertainty s_ba = {s_ba:.4}");

    Ok(KdModel {
        age_column: age_column.to_string(),
        biomarkers: biomarkers.to_vec(),
        params,
        s_ba,
    })
}

/// Ordinary least-squares fit of one biomarker on chronological age.
///
/// Returns the `(k, q, s)` triple plus diagnostics: coefficient of
/// determination, correlation, the two-sided p-value of the slope (Student's
/// t, `n - 2` degrees of freedom), and the slope's standard error.
pub fn fit_biomarker(
    age: &Array1<f64>,
    values: &Array1<f64>,
    name: &str,
) -> Result<BiomarkerParameters, EstimationError> {
    let n = age.len().min(values.len());
    if n < MINIMUM_REFERENCE_ROWS {
        return Err(EstimationError::InsufficientData {
            found: n,
            required: MINIMUM_REFERENCE_ROWS,
        });
    }

    let age_mean = age.iter().take(n).sum::<f64>() / n as f64;
    let value_mean = values.iter().take(n).sum::<f64>() / n as f64;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for i in 0..n {
        let dx = age[i] - age_mean;
        let dy = values[i] - value_mean;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    if sxx == 0.0 {
        return Err(EstimationError::NoAgeVariance(name.to_string()));
    }

    let slope = sxy / sxx;
    let intercept = value_mean - slope * age_mean;

    let mut residual_sum_squares = 0.0;
    for i in 0..n {
        let residual = values[i] - (intercept + slope * age[i]);
        residual_sum_squares += residual * residual;
    }
    let df = (n - 2) as f64;
    let residual_std_error = (residual_sum_squares / df).sqrt();
    // The residual standard error divides the weight; an exactly collinear
    // biomarker would give this biomarker infinite weight and poison the sums.
    if residual_std_error <= 0.0 {
        return Err(EstimationError::DegenerateResidual(name.to_string()));
    }

    // syy >= residual_sum_squares > 0 at this point, so the correlation is
    // well defined.
    let correlation = sxy / (sxx * syy).sqrt();
    let std_err = residual_std_error / sxx.sqrt();
    let t_statistic = slope / std_err;
    let p_value = internal::two_sided_p_value(t_statistic, df);

    Ok(BiomarkerParameters {
        slope,
        intercept,
        residual_std_error,
        r_squared: Some(correlation * correlation),
        correlation: Some(correlation),
        p_value: Some(p_value),
        std_err: Some(std_err),
    })
}

mod internal {
    use statrs::distribution::{ContinuousCDF, StudentsT};

    /// Two-sided p-value of a t statistic with `df` degrees of freedom.
    pub(super) fn two_sided_p_value(t_statistic: f64, df: f64) -> f64 {
        let dist = StudentsT::new(0.0, 1.0, df)
            .expect("degrees of freedom are positive by the minimum-rows guard");
        (2.0 * (1.0 - dist.cdf(t_statistic.abs()))).clamp(0.0, 1.0)
    }
}
