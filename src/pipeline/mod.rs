//! Batch orchestration: raw rows in, predictions and diagnostics out.
//!
//! [`Predictor`] drives validation, windowing, scaling, inference and
//! categorization for either one explicit manual window or an arbitrary
//! multi-location table. Per-row and per-window problems in batch mode are
//! isolated into the [`BatchReport`]; structural mismatches between the
//! data and the loaded artifacts abort the request.

pub mod report;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::analysis::{WindowEvent, build_windows};
use crate::artifacts::ArtifactSet;
use crate::error::PipelineError;
use crate::logging::{self, Stage};
use crate::model::{
    DEFAULT_LOCATION, FeatureRecord, FeatureWindow, PredictionResult, RawRow, WINDOW_LEN,
    WindowShapeError,
};
use crate::severity::{categorize, confidence_score};
use crate::validate::validate_row;

pub use report::{BatchOutcome, BatchReport, RowFailure};

/// Windows per vectorized inference call. Bounds the stacked tensor for
/// long single-location histories.
const INFERENCE_CHUNK: usize = 256;

impl From<WindowShapeError> for PipelineError {
    fn from(err: WindowShapeError) -> Self {
        match err {
            WindowShapeError::WrongLength(actual) => PipelineError::InvalidWindowSize {
                expected: WINDOW_LEN,
                actual,
            },
            WindowShapeError::MixedLocations { first, other } => {
                PipelineError::MixedLocations { first, other }
            }
            WindowShapeError::NotContiguous { after, found } => {
                PipelineError::NonContiguousWindow { after, found }
            }
        }
    }
}

/// Request handler over a shared, read-only [`ArtifactSet`]. Cheap to clone;
/// one per request or one shared by many threads both work.
#[derive(Debug, Clone)]
pub struct Predictor {
    artifacts: Arc<ArtifactSet>,
    default_location: String,
}

impl Predictor {
    pub fn new(artifacts: Arc<ArtifactSet>) -> Self {
        Self {
            artifacts,
            default_location: DEFAULT_LOCATION.to_string(),
        }
    }

    /// Location assigned to rows that carry none.
    pub fn with_default_location(mut self, location: &str) -> Self {
        self.default_location = location.to_string();
        self
    }

    pub fn artifacts(&self) -> &ArtifactSet {
        &self.artifacts
    }

    fn localize(&self, row: RawRow, fallback: &str) -> RawRow {
        let blank = row.location.as_deref().is_none_or(|l| l.trim().is_empty());
        if blank { row.with_location(fallback) } else { row }
    }

    fn to_result(
        &self,
        window: &FeatureWindow,
        raw_score: f64,
        generated_at: DateTime<Utc>,
    ) -> PredictionResult {
        let regcdi = self.artifacts.scalers().inverse(raw_score);
        let category = categorize(regcdi);
        PredictionResult {
            location: window.location().to_string(),
            window_start_date: window.start_month(),
            window_end_date: window.end_month(),
            regcdi_score: regcdi,
            category,
            severity_level: category.level().to_string(),
            confidence_score: confidence_score(regcdi),
            model_version: self.artifacts.model_version().to_string(),
            generated_at,
        }
    }

    /// Runs the full pipeline on one window.
    pub fn predict_window(&self, window: &FeatureWindow) -> Result<PredictionResult, PipelineError> {
        let scaled = self.artifacts.scalers().forward(window)?;
        let raw = self.artifacts.engine().infer(&scaled)?;
        Ok(self.to_result(window, raw, Utc::now()))
    }

    /// Runs many windows through a single vectorized inference call. Results
    /// are in input order.
    pub fn predict_windows(
        &self,
        windows: &[FeatureWindow],
    ) -> Result<Vec<PredictionResult>, PipelineError> {
        let scaled = windows
            .iter()
            .map(|w| self.artifacts.scalers().forward(w))
            .collect::<Result<Vec<_>, _>>()?;
        let raw = self.artifacts.engine().infer_batch(&scaled)?;
        let generated_at = Utc::now();
        Ok(windows
            .iter()
            .zip(raw)
            .map(|(w, r)| self.to_result(w, r, generated_at))
            .collect())
    }

    /// Manual mode: exactly one window of twelve explicit records.
    ///
    /// `location` applies to records without their own. Records may arrive
    /// in any order but must cover twelve consecutive months of a single
    /// location, and every one of them must validate.
    pub fn predict_manual(
        &self,
        location: Option<&str>,
        rows: Vec<RawRow>,
    ) -> Result<PredictionResult, PipelineError> {
        if rows.len() != WINDOW_LEN {
            return Err(PipelineError::InvalidWindowSize {
                expected: WINDOW_LEN,
                actual: rows.len(),
            });
        }
        let fallback = location.unwrap_or(self.default_location.as_str());
        let mut records = Vec::with_capacity(WINDOW_LEN);
        for row in rows {
            let row = self.localize(row, fallback);
            let record = validate_row(&row).map_err(|source| PipelineError::InvalidRecord {
                line: row.line,
                source,
            })?;
            records.push(record);
        }
        records.sort_by_key(|r| r.month);

        let window = FeatureWindow::new(records)?;
        debug!(
            stage = %Stage::Window,
            location = %window.location(),
            end = %window.end_month(),
            "manual.window_built"
        );
        self.predict_window(&window)
    }

    /// Batch mode over an arbitrary table of rows.
    pub fn predict_batch(&self, rows: Vec<RawRow>) -> Result<BatchOutcome, PipelineError> {
        self.predict_batch_cancellable(rows, &AtomicBool::new(false))
    }

    /// Batch mode that stops at the next row or inference-chunk boundary once
    /// `cancel` is set. Predictions completed before that point are returned
    /// and the report is marked `cancelled`.
    pub fn predict_batch_cancellable(
        &self,
        rows: Vec<RawRow>,
        cancel: &AtomicBool,
    ) -> Result<BatchOutcome, PipelineError> {
        self.run_batch(rows, &|| cancel.load(Ordering::Relaxed))
    }

    fn run_batch(
        &self,
        rows: Vec<RawRow>,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<BatchOutcome, PipelineError> {
        let mut report = BatchReport {
            total_rows: rows.len(),
            ..BatchReport::default()
        };
        let mut predictions = Vec::new();

        let mut by_location: BTreeMap<String, Vec<FeatureRecord>> = BTreeMap::new();
        for row in rows {
            if is_cancelled() {
                report.cancelled = true;
                break;
            }
            let row = self.localize(row, &self.default_location);
            match validate_row(&row) {
                Ok(record) => {
                    report.valid_rows += 1;
                    by_location.entry(record.location.clone()).or_default().push(record);
                }
                Err(error) => report.invalid_rows.push(RowFailure {
                    line: row.line,
                    location: row.location_or_default().to_string(),
                    error,
                }),
            }
        }
        report.locations = by_location.len();

        if !report.cancelled {
            'locations: for (location, mut records) in by_location {
                // Stable: rows sharing a month keep input order and are then
                // reported as duplicates by the window builder.
                records.sort_by_key(|r| r.month);

                let before = predictions.len();
                let mut chunk = Vec::with_capacity(INFERENCE_CHUNK);
                for event in build_windows(&location, records) {
                    match event {
                        WindowEvent::Diagnostic(diag) => report.window_diagnostics.push(diag),
                        WindowEvent::Window(window) => {
                            report.windows += 1;
                            chunk.push(window);
                            if chunk.len() == INFERENCE_CHUNK {
                                predictions.extend(self.predict_windows(&chunk)?);
                                chunk.clear();
                                if is_cancelled() {
                                    report.cancelled = true;
                                    break 'locations;
                                }
                            }
                        }
                    }
                }
                predictions.extend(self.predict_windows(&chunk)?);
                debug!(
                    stage = %Stage::Infer,
                    location = %location,
                    predictions = predictions.len() - before,
                    "location.predicted"
                );
                if is_cancelled() {
                    report.cancelled = true;
                    break;
                }
            }
        }

        report.predictions = predictions.len();
        logging::log_batch_report(&report);
        Ok(BatchOutcome {
            predictions,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{GapReason, WindowDiagnostic};
    use crate::artifacts::test_support::{constant_artifacts, responsive_artifacts};
    use crate::error::ValidationErrorKind;
    use crate::severity::DroughtCategory;
    use chrono::{Datelike, NaiveDate};

    fn row(line: usize, location: &str, year: i32, month: u32, rainfall: f64) -> RawRow {
        RawRow::new(line)
            .with_location(location)
            .with_date(&format!("{year}-{month:02}"))
            .with_field("rainfall_mm", rainfall)
            .with_field("tmax_c", 33.0 + month as f64 * 0.1)
            .with_field("tmin_c", 20.0)
            .with_field("spei", -0.4)
            .with_field("spi", -0.3)
            .with_field("ndvi", 0.45)
            .with_field("soil_moisture", 38.0)
    }

    /// `count` consecutive monthly rows starting at `year-month`, skipping
    /// the offsets in `skip`.
    fn series(location: &str, year: i32, month: u32, count: usize, skip: &[usize]) -> Vec<RawRow> {
        let start = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
        (0..count)
            .filter(|i| !skip.contains(i))
            .map(|i| {
                let d = start + chrono::Months::new(i as u32);
                row(i + 1, location, d.year(), d.month(), 40.0 + (i % 7) as f64 * 12.0)
            })
            .collect()
    }

    fn month(year: i32, month: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, 1).unwrap()
    }

    #[test]
    fn test_manual_window_yields_one_moderate_prediction() {
        let predictor = Predictor::new(constant_artifacts(-0.3));
        let result = predictor.predict_manual(None, series("Latur", 2023, 1, 12, &[])).unwrap();

        assert!((result.regcdi_score + 0.3).abs() < 1e-9);
        assert_eq!(result.category, DroughtCategory::Moderate);
        assert_eq!(result.severity_level, "moderate");
        assert!((result.confidence_score - 0.55).abs() < 1e-9);
        assert_eq!(result.location, "Latur");
        assert_eq!(result.window_start_date, month(2023, 1));
        assert_eq!(result.window_end_date, month(2023, 12));
        assert_eq!(result.model_version, "stat-LSTM-test");
    }

    #[test]
    fn test_manual_rejects_eleven_and_thirteen_records() {
        let predictor = Predictor::new(constant_artifacts(0.0));
        for n in [11, 13] {
            let err = predictor.predict_manual(None, series("Latur", 2023, 1, n, &[])).unwrap_err();
            assert_eq!(
                err,
                PipelineError::InvalidWindowSize {
                    expected: WINDOW_LEN,
                    actual: n
                }
            );
        }
    }

    #[test]
    fn test_manual_rejects_gap() {
        let predictor = Predictor::new(constant_artifacts(0.0));
        let mut rows = series("Latur", 2023, 1, 12, &[]);
        rows[11] = row(12, "Latur", 2024, 2, 50.0);
        let err = predictor.predict_manual(None, rows).unwrap_err();
        assert_eq!(
            err,
            PipelineError::NonContiguousWindow {
                after: month(2023, 11),
                found: month(2024, 2)
            }
        );
    }

    #[test]
    fn test_manual_rejects_invalid_record_with_its_line() {
        let predictor = Predictor::new(constant_artifacts(0.0));
        let mut rows = series("Latur", 2023, 1, 12, &[]);
        rows[4] = rows[4].clone().with_field("ndvi", 1.7);
        match predictor.predict_manual(None, rows).unwrap_err() {
            PipelineError::InvalidRecord { line, source } => {
                assert_eq!(line, 5);
                assert_eq!(source.field, "ndvi");
                assert!(matches!(source.kind, ValidationErrorKind::OutOfRange { .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_manual_accepts_unordered_records_and_fills_location() {
        let predictor = Predictor::new(constant_artifacts(0.7));
        let mut rows: Vec<RawRow> = series("x", 2022, 7, 12, &[])
            .into_iter()
            .map(|mut r| {
                r.location = None;
                r
            })
            .collect();
        rows.reverse();
        let result = predictor.predict_manual(Some("Beed"), rows).unwrap();
        assert_eq!(result.location, "Beed");
        assert_eq!(result.window_end_date, month(2023, 6));
        assert_eq!(result.category, DroughtCategory::NoDrought);
    }

    #[test]
    fn test_manual_rejects_mixed_locations() {
        let predictor = Predictor::new(constant_artifacts(0.0));
        let mut rows = series("Latur", 2023, 1, 12, &[]);
        rows[3].location = Some("Beed".into());
        assert!(matches!(
            predictor.predict_manual(None, rows),
            Err(PipelineError::MixedLocations { .. })
        ));
    }

    #[test]
    fn test_batch_of_twenty_four_months_yields_thirteen_ordered_predictions() {
        let predictor = Predictor::new(constant_artifacts(-0.8));
        let outcome = predictor.predict_batch(series("Osmanabad", 2021, 1, 24, &[])).unwrap();

        assert_eq!(outcome.predictions.len(), 13);
        assert_eq!(outcome.report.predictions, 13);
        assert_eq!(outcome.report.windows, 13);
        assert!(outcome.report.is_clean());
        assert!(outcome.report.rows_accounted());
        assert_eq!(outcome.predictions[0].window_end_date, month(2021, 12));
        assert_eq!(outcome.predictions[12].window_end_date, month(2022, 12));
        assert!(outcome
            .predictions
            .windows(2)
            .all(|p| p[0].window_end_date < p[1].window_end_date));
        assert!(outcome.predictions.iter().all(|p| p.category == DroughtCategory::Severe));
    }

    #[test]
    fn test_gap_restarts_history_and_is_reported() {
        let predictor = Predictor::new(constant_artifacts(0.1));
        // 30 months with offset 14 missing: segments of 14 and 15 months.
        let outcome = predictor.predict_batch(series("Jalna", 2020, 1, 30, &[14])).unwrap();

        assert_eq!(outcome.predictions.len(), 3 + 4);
        assert_eq!(outcome.report.window_diagnostics.len(), 1);
        match &outcome.report.window_diagnostics[0] {
            WindowDiagnostic::GapSkipped { reason, resumed_at, .. } => {
                assert_eq!(*reason, GapReason::MissingMonths { missing: 1 });
                assert_eq!(*resumed_at, month(2021, 4));
            }
            other => panic!("unexpected diagnostic {other:?}"),
        }
        assert!(outcome
            .predictions
            .iter()
            .all(|p| p.window_start_date > month(2021, 3) || p.window_end_date < month(2021, 3)));
    }

    #[test]
    fn test_invalid_row_is_isolated_not_fatal() {
        let predictor = Predictor::new(constant_artifacts(0.1));
        let mut rows = series("Hingoli", 2020, 1, 30, &[]);
        rows[14] = rows[14].clone().with_field("rainfall_mm", -5.0);
        let outcome = predictor.predict_batch(rows).unwrap();

        assert_eq!(outcome.report.total_rows, 30);
        assert_eq!(outcome.report.valid_rows, 29);
        assert_eq!(outcome.report.invalid_rows.len(), 1);
        assert_eq!(outcome.report.invalid_rows[0].line, 15);
        assert_eq!(outcome.report.invalid_rows[0].error.field, "rainfall_mm");
        assert!(outcome.report.rows_accounted());
        // The rejected row becomes a one-month gap.
        assert_eq!(outcome.predictions.len(), 7);
    }

    #[test]
    fn test_locations_are_grouped_and_sorted_independently() {
        let predictor = Predictor::new(constant_artifacts(0.2));
        let mut rows = series("Parbhani", 2021, 1, 13, &[]);
        rows.extend(series("Nanded", 2021, 6, 12, &[]));
        rows.reverse();
        let outcome = predictor.predict_batch(rows).unwrap();

        assert_eq!(outcome.report.locations, 2);
        let nanded: Vec<_> = outcome.predictions.iter().filter(|p| p.location == "Nanded").collect();
        let parbhani: Vec<_> = outcome.predictions.iter().filter(|p| p.location == "Parbhani").collect();
        assert_eq!(nanded.len(), 1);
        assert_eq!(parbhani.len(), 2);
        assert!(parbhani[0].window_end_date < parbhani[1].window_end_date);
    }

    #[test]
    fn test_short_location_reports_insufficient_history() {
        let predictor = Predictor::new(constant_artifacts(0.2));
        let mut rows = series("Washim", 2022, 1, 5, &[]);
        rows.extend(series("Akola", 2021, 1, 12, &[]));
        let outcome = predictor.predict_batch(rows).unwrap();

        assert_eq!(outcome.predictions.len(), 1);
        assert_eq!(outcome.predictions[0].location, "Akola");
        assert_eq!(
            outcome.report.window_diagnostics,
            vec![WindowDiagnostic::InsufficientHistory {
                location: "Washim".into(),
                records: 5,
                required: WINDOW_LEN
            }]
        );
    }

    #[test]
    fn test_rows_without_location_use_configured_default() {
        let predictor = Predictor::new(constant_artifacts(0.2)).with_default_location("Marathwada");
        let rows = series("x", 2021, 1, 12, &[])
            .into_iter()
            .map(|mut r| {
                r.location = None;
                r
            })
            .collect();
        let outcome = predictor.predict_batch(rows).unwrap();
        assert_eq!(outcome.predictions[0].location, "Marathwada");
    }

    #[test]
    fn test_batch_scores_match_single_window_scores() {
        let predictor = Predictor::new(responsive_artifacts());
        let rows = series("Solapur", 2019, 3, 20, &[]);
        let outcome = predictor.predict_batch(rows.clone()).unwrap();
        assert_eq!(outcome.predictions.len(), 9);

        for (k, batched) in outcome.predictions.iter().enumerate() {
            let single = predictor.predict_manual(None, rows[k..k + WINDOW_LEN].to_vec()).unwrap();
            assert_eq!(single.window_end_date, batched.window_end_date);
            assert!((single.regcdi_score - batched.regcdi_score).abs() < 1e-12);
            assert_eq!(single.category, batched.category);
        }
    }

    #[test]
    fn test_cancelled_batch_returns_partial_report() {
        let predictor = Predictor::new(constant_artifacts(0.2));
        let cancel = AtomicBool::new(true);
        let outcome = predictor
            .predict_batch_cancellable(series("Satara", 2021, 1, 24, &[]), &cancel)
            .unwrap();
        assert!(outcome.report.cancelled);
        assert!(outcome.predictions.is_empty());
        assert_eq!(outcome.report.total_rows, 24);
        assert!(!outcome.report.rows_accounted());
    }

    #[test]
    fn test_cancel_between_locations_keeps_finished_predictions() {
        let predictor = Predictor::new(constant_artifacts(0.2));
        let mut rows = series("Ahmednagar", 2021, 1, 14, &[]);
        rows.extend(series("Satara", 2021, 1, 14, &[]));
        let total = rows.len();

        // One check per row, then one after each location: trips right
        // after the first location (Ahmednagar) has been predicted.
        let checks = std::cell::Cell::new(0);
        let is_cancelled = || {
            checks.set(checks.get() + 1);
            checks.get() > total
        };
        let outcome = predictor.run_batch(rows, &is_cancelled).unwrap();

        assert!(outcome.report.cancelled);
        assert_eq!(outcome.report.valid_rows, total);
        assert_eq!(outcome.report.locations, 2);
        assert_eq!(outcome.predictions.len(), 3);
        assert!(outcome.predictions.iter().all(|p| p.location == "Ahmednagar"));
        assert_eq!(outcome.report.predictions, 3);
    }

    #[test]
    fn test_empty_batch_is_not_an_error() {
        let predictor = Predictor::new(constant_artifacts(0.2));
        let outcome = predictor.predict_batch(Vec::new()).unwrap();
        assert!(outcome.predictions.is_empty());
        assert_eq!(outcome.report, BatchReport::default());
    }
}
