//! # PhenoAge Estimation
//!
//! A stateless transform from nine blood biomarkers plus chronological age to
//! a biological-age value, via a published Gompertz proportional-hazards
//! model. There is no fitting step: the coefficients are compile-time
//! constants sourced from the published study, and the transform is a pure
//! function of one subject's values.
//!
//! Reference: Levine ME, et al. An epigenetic biomarker of aging for lifespan
//! and healthspan. Aging (Albany NY). 2018.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Offset of the mortality-risk-to-age transform.
const AGE_OFFSET: f64 = 141.50225;
/// Scale of the mortality-risk-to-age transform.
const AGE_SCALE: f64 = 0.090165;
/// Multiplier applied to the log mortality-risk complement.
const RISK_LOG_SCALE: f64 = -0.00553;

/// Errors surfaced while evaluating the PhenoAge transform.
#[derive(Debug, Error)]
pub enum PhenoAgeError {
    #[error(
        "Ten-year mortality risk saturated at 1 (linear predictor {linear_predictor:.4}); the age transform is undefined for this input combination."
    )]
    MortalityRiskOutOfDomain { linear_predictor: f64 },
    #[error(
        "Ten-year mortality risk underflowed to 0 (linear predictor {linear_predictor:.4}); the age transform is undefined for this input combination."
    )]
    MortalityRiskVanished { linear_predictor: f64 },
}

/// Weights of the Gompertz proportional-hazards linear predictor.
///
/// Global, immutable, versioned by publication source; never fitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhenoAgeCoefficients {
    /// Albumin, g/dL.
    pub albumin: f64,
    /// Creatinine, mg/dL.
    pub creatinine: f64,
    /// Glucose, mg/dL.
    pub glucose: f64,
    /// Natural log of C-reactive protein, log(mg/L).
    pub log_crp: f64,
    /// Lymphocyte percent.
    pub lymphocyte_percent: f64,
    /// Mean cell volume, fL.
    pub mean_cell_volume: f64,
    /// Red cell distribution width, percent.
    pub red_cell_distribution_width: f64,
    /// Alkaline phosphatase, U/L.
    pub alkaline_phosphatase: f64,
    /// White blood cell count, 1000 cells/uL.
    pub white_blood_cell_count: f64,
    /// Chronological age, years.
    pub chronological_age: f64,
    pub intercept: f64,
}

/// Coefficients from Levine et al. 2018.
pub const LEVINE_2018: PhenoAgeCoefficients = PhenoAgeCoefficients {
    albumin: -0.0336,
    creatinine: 0.0095,
    glucose: 0.1953,
    log_crp: 0.0954,
    lymphocyte_percent: -0.0120,
    mean_cell_volume: 0.0268,
    red_cell_distribution_width: 0.3306,
    alkaline_phosphatase: 0.00188,
    white_blood_cell_count: 0.0554,
    chronological_age: 0.0804,
    intercept: -19.9067,
};

/// One subject's PhenoAge panel. Every field is required; the type makes a
/// partial panel unrepresentable rather than a runtime lookup failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhenoAgeInputs {
    /// Albumin, g/dL.
    pub albumin: f64,
    /// Creatinine, mg/dL.
    pub creatinine: f64,
    /// Glucose, mg/dL.
    pub glucose: f64,
    /// Natural log of C-reactive protein, log(mg/L).
    pub log_crp: f64,
    /// Lymphocyte percent.
    pub lymphocyte_percent: f64,
    /// Mean cell volume, fL.
    pub mean_cell_volume: f64,
    /// Red cell distribution width, percent.
    pub red_cell_distribution_width: f64,
    /// Alkaline phosphatase, U/L.
    pub alkaline_phosphatase: f64,
    /// White blood cell count, 1000 cells/uL.
    pub white_blood_cell_count: f64,
    /// Chronological age, years.
    pub chronological_age: f64,
}

impl PhenoAgeCoefficients {
    pub fn linear_predictor(&self, inputs: &PhenoAgeInputs) -> f64 {
        self.albumin * inputs.albumin
            + self.creatinine * inputs.creatinine
            + self.glucose * inputs.glucose
            + self.log_crp * inputs.log_crp
            + self.lymphocyte_percent * inputs.lymphocyte_percent
            + self.mean_cell_volume * inputs.mean_cell_volume
            + self.red_cell_distribution_width * inputs.red_cell_distribution_width
            + self.alkaline_phosphatase * inputs.alkaline_phosphatase
            + self.white_blood_cell_count * inputs.white_blood_cell_count
            + self.chronological_age * inputs.chronological_age
            + self.intercept
    }
}

/// Ten-year mortality risk under the published coefficients: the Gompertz
/// (double-exponential) link `1 - exp(-exp(xb))` of the linear predictor.
pub fn ten_year_mortality_risk(inputs: &PhenoAgeInputs) -> f64 {
    let xb = LEVINE_2018.linear_predictor(inputs);
    1.0 - (-xb.exp()).exp()
}

/// Calculates PhenoAge in years using the published coefficients.
pub fn calculate_phenoage(inputs: &PhenoAgeInputs) -> Result<f64, PhenoAgeError> {
    calculate_phenoage_with(&LEVINE_2018, inputs)
}

/// Calculates PhenoAge in years under an explicit coefficient table.
///
/// The mortality risk is gated before the age transform: a risk at 1 (or 0)
/// makes `ln(1 - risk)` (or `ln` of the scaled risk term) undefined and is
/// surfaced as an error rather than a non-finite value. The transform itself
/// runs in log space, using the identity `ln(1 - risk) = -exp(xb)`, so no
/// precision is lost as the risk approaches 1.
pub fn calculate_phenoage_with(
    coefficients: &PhenoAgeCoefficients,
    inputs: &PhenoAgeInputs,
) -> Result<f64, PhenoAgeError> {
    let xb = coefficients.linear_predictor(inputs);
    let cumulative_hazard = xb.exp();
    let mortality_risk = 1.0 - (-cumulative_hazard).exp();

    if mortality_risk >= 1.0 {
        return Err(PhenoAgeError::MortalityRiskOutOfDomain {
            linear_predictor: xb,
        });
    }
    if cumulative_hazard == 0.0 {
        return Err(PhenoAgeError::MortalityRiskVanished {
            linear_predictor: xb,
        });
    }

    // ln(1 - mortality_risk) is exactly -cumulative_hazard.
    Ok(AGE_OFFSET + (RISK_LOG_SCALE * -cumulative_hazard).ln() / AGE_SCALE)
}
