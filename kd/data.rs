//! # Data Loading and Validation Module
//!
//! This module is the exclusive entry point for user-provided tabular data.
//! It reads reference-population and subject tables (TSV), validates the
//! requested columns against a strict numeric contract, and transforms them
//! into the clean `ndarray` structures consumed by the estimation core.
//!
//! - Caller-Chosen Schema: unlike a fixed-schema loader, the biomarker panel
//!   and the chronological-age column are configurable, so the required
//!   column list is supplied by the caller.
//! - User-Centric Errors: failures are assumed to be user-input errors.
//!   The `DataError` enum is designed to provide clear, actionable feedback.
//! - Complete Data Only: missing values and non-finite values in a requested
//!   column are rejected outright; the estimator never imputes.

use ndarray::Array1;
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. It contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. This tool requires complete data with no missing values."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the required column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("Column '{column}' has {found} rows, but the table has {expected}.")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
}

/// A validated, in-memory numeric table.
///
/// Columns are stored in insertion order so that diagnostic output is stable,
/// and every column is guaranteed to be finite, complete, and of equal length.
#[derive(Debug, Clone)]
pub struct ReferenceTable {
    columns: Vec<(String, Array1<f64>)>,
    n_rows: usize,
}

impl ReferenceTable {
    /// Builds a table from in-memory columns, applying the same validation as
    /// the file loader (equal lengths, finite values).
    pub fn from_columns(
        columns: Vec<(String, Vec<f64>)>,
    ) -> Result<ReferenceTable, DataError> {
        let n_rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut validated = Vec::with_capacity(columns.len());
        for (name, values) in columns {
            if values.len() != n_rows {
                return Err(DataError::LengthMismatch {
                    column: name,
                    expected: n_rows,
                    found: values.len(),
                });
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(DataError::NonFiniteValuesFound(name));
            }
            validated.push((name, Array1::from_vec(values)));
        }
        Ok(ReferenceTable {
            columns: validated,
            n_rows,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn column(&self, name: &str) -> Option<&Array1<f64>> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }
}

/// One subject's measurements, supplied per prediction call.
///
/// The engine never mutates an observation; chronological age is optional and
/// only consulted when the caller asks for it to be folded into the estimate.
#[derive(Debug, Clone, Default)]
pub struct SubjectObservation {
    pub chronological_age: Option<f64>,
    pub biomarkers: HashMap<String, f64>,
}

impl SubjectObservation {
    pub fn new() -> SubjectObservation {
        SubjectObservation::default()
    }

    pub fn with_chronological_age(mut self, age: f64) -> SubjectObservation {
        self.chronological_age = Some(age);
        self
    }

    pub fn with_biomarker(mut self, name: impl Into<String>, value: f64) -> SubjectObservation {
        self.biomarkers.insert(name.into(), value);
        self
    }
}

/// Loads a TSV table, validating that every `required` column is present,
/// numeric, complete, and finite. Columns in `optional` are loaded under the
/// same contract when present and silently skipped otherwise.
pub fn load_table(
    path: &str,
    required: &[String],
    optional: &[String],
) -> Result<ReferenceTable, DataError> {
    log::info!("Loading data from '{path}'");

    let df = CsvReader::new(File::open(Path::new(path))?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
        )
        .finish()?;

    let df_columns = df.get_column_names();
    let columns_set: HashSet<String> = df_columns.into_iter().map(|s| s.to_string()).collect();

    for col_name in required {
        if !columns_set.contains(col_name) {
            return Err(DataError::ColumnNotFound(col_name.clone()));
        }
    }

    let mut columns = Vec::with_capacity(required.len() + optional.len());
    let mut seen: HashSet<&str> = HashSet::new();
    for col_name in required {
        if seen.insert(col_name.as_str()) {
            let values = internal::extract_numeric_column(&df, col_name)?;
            columns.push((col_name.clone(), Array1::from_vec(values)));
        }
    }
    for col_name in optional {
        if columns_set.contains(col_name) && seen.insert(col_name.as_str()) {
            let values = internal::extract_numeric_column(&df, col_name)?;
            columns.push((col_name.clone(), Array1::from_vec(values)));
        }
    }

    log::info!(
        "Data validation successful: {} column(s), {} row(s), all numeric with no missing values.",
        columns.len(),
        df.height()
    );

    Ok(ReferenceTable {
        columns,
        n_rows: df.height(),
    })
}

/// Internal module for shared column extraction logic.
mod internal {
    use super::*;

    pub(super) fn extract_numeric_column(
        df: &DataFrame,
        column_name: &str,
    ) -> Result<Vec<f64>, DataError> {
        let series = df.column(column_name)?;
        if series.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name.to_string()));
        }

        let casted = match series.cast(&DataType::Float64) {
            Ok(casted) => casted,
            Err(_) => {
                return Err(DataError::ColumnWrongType {
                    column_name: column_name.to_string(),
                    expected_type: "f64 (numeric)",
                    found_type: format!("{:?}", series.dtype()),
                });
            }
        };

        if casted.null_count() > 0 {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", series.dtype()),
            });
        }

        let chunked = casted.f64()?.rechunk();
        let values: Vec<f64> = chunked.into_no_null_iter().collect();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
        }
        Ok(values)
    }
}
