//! Core data types for the drought-index inference service.
//!
//! This module defines the shared domain model imported by all other modules.
//! It contains no pipeline logic and no I/O, only types and a few
//! constructors that enforce their shape invariants.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::severity::DroughtCategory;

// ---------------------------------------------------------------------------
// Shape constants
// ---------------------------------------------------------------------------

/// Number of consecutive monthly records in one inference window.
pub const WINDOW_LEN: usize = 12;

/// Number of model features per monthly record.
pub const FEATURE_COUNT: usize = 7;

/// Location assigned to rows that carry no location identifier.
pub const DEFAULT_LOCATION: &str = "unspecified";

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// One unvalidated cell value, as it arrives from CSV text or a JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    Null,
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Number(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

/// Cell count of a source line that disagrees with its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellMismatch {
    pub expected: usize,
    pub found: usize,
}

/// A single unvalidated monthly row: location, date and named feature values.
///
/// `line` is the 1-based source position (CSV line or JSON array index) and
/// is carried through so diagnostics can point back at the input. A ragged
/// CSV line keeps its slot as a row with `cell_mismatch` set and no fields,
/// so it fails validation like any other bad row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRow {
    pub line: usize,
    pub location: Option<String>,
    pub date: Option<String>,
    pub fields: BTreeMap<String, RawValue>,
    pub cell_mismatch: Option<CellMismatch>,
}

impl RawRow {
    pub fn new(line: usize) -> Self {
        Self {
            line,
            ..Self::default()
        }
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn with_date(mut self, date: &str) -> Self {
        self.date = Some(date.to_string());
        self
    }

    pub fn with_field(mut self, name: &str, value: impl Into<RawValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Location identifier, falling back to [`DEFAULT_LOCATION`] when absent
    /// or blank.
    pub fn location_or_default(&self) -> &str {
        match self.location.as_deref().map(str::trim) {
            Some(loc) if !loc.is_empty() => loc,
            _ => DEFAULT_LOCATION,
        }
    }
}

// ---------------------------------------------------------------------------
// Validated records
// ---------------------------------------------------------------------------

/// Seven physical feature values of one month, in model order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonthlyFeatures {
    pub rainfall_mm: f64,
    pub tmax_c: f64,
    pub tmin_c: f64,
    pub spei: f64,
    pub spi: f64,
    pub ndvi: f64,
    pub soil_moisture: f64,
}

impl MonthlyFeatures {
    /// Values in the fixed column order the model expects
    /// (see `features::FEATURE_REGISTRY`).
    pub fn as_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.rainfall_mm,
            self.tmax_c,
            self.tmin_c,
            self.spei,
            self.spi,
            self.ndvi,
            self.soil_moisture,
        ]
    }
}

/// One validated monthly observation for one location.
///
/// `month` is always normalized to the first day of its calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub location: String,
    pub month: NaiveDate,
    pub features: MonthlyFeatures,
}

/// Normalizes any date to the first day of its month.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Signed number of calendar months from `from` to `to`.
pub fn months_between(from: NaiveDate, to: NaiveDate) -> i32 {
    (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32
}

// ---------------------------------------------------------------------------
// Windows and matrices
// ---------------------------------------------------------------------------

/// Exactly [`WINDOW_LEN`] chronologically contiguous records for one
/// location. Fields are private: the only way to obtain one is through
/// [`FeatureWindow::new`], which enforces the invariants.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureWindow {
    location: String,
    records: Vec<FeatureRecord>,
}

/// Why a candidate record list cannot form a window.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowShapeError {
    WrongLength(usize),
    MixedLocations { first: String, other: String },
    NotContiguous { after: NaiveDate, found: NaiveDate },
}

impl FeatureWindow {
    pub fn new(records: Vec<FeatureRecord>) -> Result<Self, WindowShapeError> {
        if records.len() != WINDOW_LEN {
            return Err(WindowShapeError::WrongLength(records.len()));
        }
        let location = records[0].location.clone();
        if let Some(other) = records.iter().find(|r| r.location != location) {
            return Err(WindowShapeError::MixedLocations {
                other: other.location.clone(),
                first: location,
            });
        }
        for pair in records.windows(2) {
            if months_between(pair[0].month, pair[1].month) != 1 {
                return Err(WindowShapeError::NotContiguous {
                    after: pair[0].month,
                    found: pair[1].month,
                });
            }
        }
        Ok(Self { location, records })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn records(&self) -> &[FeatureRecord] {
        &self.records
    }

    pub fn start_month(&self) -> NaiveDate {
        self.records[0].month
    }

    pub fn end_month(&self) -> NaiveDate {
        self.records[WINDOW_LEN - 1].month
    }

    /// Raw (unscaled) feature matrix, one row per month.
    pub fn feature_matrix(&self) -> Array2<f64> {
        let mut m = Array2::zeros((WINDOW_LEN, FEATURE_COUNT));
        for (i, rec) in self.records.iter().enumerate() {
            for (j, v) in rec.features.as_array().into_iter().enumerate() {
                m[[i, j]] = v;
            }
        }
        m
    }
}

/// A (12 × 7) matrix of normalized values, produced by the input scaler and
/// consumed by one inference call.
pub type ScaledMatrix = Array2<f64>;

// ---------------------------------------------------------------------------
// Prediction output
// ---------------------------------------------------------------------------

/// Result of one successful inference over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub location: String,
    pub window_start_date: NaiveDate,
    pub window_end_date: NaiveDate,
    pub regcdi_score: f64,
    pub category: DroughtCategory,
    pub severity_level: String,
    pub confidence_score: f64,
    pub model_version: String,
    pub generated_at: DateTime<Utc>,
}

/// How a prediction was requested; stored alongside it by the persistence
/// layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionKind {
    Manual,
    Batch,
}

impl PredictionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionKind::Manual => "manual",
            PredictionKind::Batch => "batch",
        }
    }
}
