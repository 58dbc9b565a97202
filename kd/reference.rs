//! # Published Reference Panels
//!
//! Regression parameters from studies that applied the Klemera-Doubal method
//! to large reference populations. A panel can be turned into a ready-to-use
//! [`KdModel`] without fitting, for callers whose biomarkers match the
//! published ones. Panels are immutable configuration data keyed by sex;
//! adding a new panel never touches estimator logic.
//!
//! Source: Levine ME. Modeling the rate of senescence: can estimated
//! biological age predict mortality more accurately than chronological age?
//! J Gerontol A Biol Sci Med Sci. 2013 (NHANES III, "KDM2" weights).

use crate::model::{BiomarkerParameters, KdModel};
use std::collections::HashMap;

/// Sex of the reference population a panel was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
}

/// One biomarker's published `(k, q, s)` triple.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceWeight {
    pub biomarker: &'static str,
    pub slope: f64,
    pub intercept: f64,
    pub residual_std_error: f64,
}

/// A published set of per-biomarker weights plus the study's aggregate
/// biological-age uncertainty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferencePanel {
    pub name: &'static str,
    pub sex: Sex,
    pub weights: &'static [ReferenceWeight],
    /// Published aggregate uncertainty for this population; used verbatim
    /// instead of the value the triples would imply.
    pub s_ba: f64,
}

const fn weight(
    biomarker: &'static str,
    slope: f64,
    intercept: f64,
    residual_std_error: f64,
) -> ReferenceWeight {
    ReferenceWeight {
        biomarker,
        slope,
        intercept,
        residual_std_error,
    }
}

pub static NHANES_III_MALE: ReferencePanel = ReferencePanel {
    name: "nhanes_iii_male",
    sex: Sex::Male,
    weights: &[
        // C-reactive protein, mg/dL
        weight("c_reactive_protein", 0.0939, 0.1333, 0.9431),
        // Glycated hemoglobin, %
        weight("glycated_hemoglobin", 0.0106, 5.2771, 0.5674),
        // Serum albumin, g/dL
        weight("serum_albumin", -0.0076, 4.3103, 0.3023),
        // Serum alkaline phosphatase, U/L
        weight("alkaline_phosphatase", 0.4152, 65.3099, 19.8032),
        // Forced expiratory volume, mL
        weight("forced_expiratory_volume", -41.7970, 4029.7070, 780.4862),
        // Systolic blood pressure, mmHg
        weight("systolic_blood_pressure", 0.5336, 101.7092, 14.4056),
        // Serum urea nitrogen, mg/dL
        weight("serum_urea_nitrogen", 0.0714, 12.1833, 3.9244),
    ],
    s_ba: 8.91,
};

pub static NHANES_III_FEMALE: ReferencePanel = ReferencePanel {
    name: "nhanes_iii_female",
    sex: Sex::Female,
    weights: &[
        weight("c_reactive_protein", 0.0929, 0.2022, 0.9802),
        weight("glycated_hemoglobin", 0.0058, 5.2997, 0.5284),
        weight("serum_albumin", -0.0058, 4.2031, 0.2793),
        weight("alkaline_phosphatase", 0.3716, 65.1039, 19.4999),
        weight("forced_expiratory_volume", -25.0337, 2731.7228, 546.7556),
        weight("systolic_blood_pressure", 0.6808, 97.3992, 17.1402),
        weight("serum_urea_nitrogen", 0.0786, 10.9897, 3.7234),
    ],
    s_ba: 7.21,
};

/// The NHANES III panel for the given sex.
pub fn nhanes_iii(sex: Sex) -> &'static ReferencePanel {
    match sex {
        Sex::Male => &NHANES_III_MALE,
        Sex::Female => &NHANES_III_FEMALE,
    }
}

impl ReferencePanel {
    /// Builds a ready-to-use model from the published triples. Diagnostic
    /// fields are unavailable for published constants and stay `None`; the
    /// published `s_ba` is carried verbatim.
    pub fn to_model(&self) -> KdModel {
        let mut params = HashMap::with_capacity(self.weights.len());
        let mut biomarkers = Vec::with_capacity(self.weights.len());
        for w in self.weights {
            biomarkers.push(w.biomarker.to_string());
            params.insert(
                w.biomarker.to_string(),
                BiomarkerParameters {
                    slope: w.slope,
                    intercept: w.intercept,
                    residual_std_error: w.residual_std_error,
                    r_squared: None,
                    correlation: None,
                    p_value: None,
                    std_err: None,
                },
            );
        }
        KdModel {
            age_column: "age".to_string(),
            biomarkers,
            params,
            s_ba: self.s_ba,
        }
    }
}
