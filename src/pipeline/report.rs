//! Batch outcome and its structured report.

use serde::Serialize;

use crate::analysis::WindowDiagnostic;
use crate::error::ValidationError;
use crate::model::PredictionResult;

/// A row that failed validation and was left out of windowing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowFailure {
    pub line: usize,
    pub location: String,
    pub error: ValidationError,
}

/// Accounting for one batch run. Every input row is either counted in
/// `valid_rows` or listed in `invalid_rows`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub locations: usize,
    pub windows: usize,
    pub predictions: usize,
    pub invalid_rows: Vec<RowFailure>,
    pub window_diagnostics: Vec<WindowDiagnostic>,
    pub cancelled: bool,
}

impl BatchReport {
    /// True when every input row is accounted for. Always true for a run
    /// that was not cancelled.
    pub fn rows_accounted(&self) -> bool {
        self.valid_rows + self.invalid_rows.len() == self.total_rows
    }

    pub fn is_clean(&self) -> bool {
        self.invalid_rows.is_empty() && self.window_diagnostics.is_empty() && !self.cancelled
    }
}

/// Predictions plus the report describing how they were obtained.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub predictions: Vec<PredictionResult>,
    pub report: BatchReport,
}
