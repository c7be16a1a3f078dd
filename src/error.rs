//! Error taxonomy for the inference pipeline.
//!
//! Per-row problems (`ValidationError`) are collected and reported; shape and
//! artifact mismatches (`PipelineError`, `ArtifactError`) always escalate to
//! the caller because they indicate an integration defect, not bad data.

use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Record validation
// ---------------------------------------------------------------------------

/// The constraint a single raw field violated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationErrorKind {
    Missing,
    NotNumeric { value: String },
    NonFinite,
    OutOfRange { value: f64, min: f64, max: f64 },
    TemperatureInverted { tmin_c: f64, tmax_c: f64 },
    BadDate { value: String },
    Malformed { expected: usize, found: usize },
}

/// A raw row failed validation on `field`.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("invalid field '{field}': {}", describe(.kind))]
pub struct ValidationError {
    pub field: String,
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    pub fn new(field: &str, kind: ValidationErrorKind) -> Self {
        Self {
            field: field.to_string(),
            kind,
        }
    }
}

fn describe(kind: &ValidationErrorKind) -> String {
    match kind {
        ValidationErrorKind::Missing => "value is missing".to_string(),
        ValidationErrorKind::NotNumeric { value } => format!("'{value}' is not numeric"),
        ValidationErrorKind::NonFinite => "value is not finite".to_string(),
        ValidationErrorKind::OutOfRange { value, min, max } => {
            format!("{value} outside physical range [{min}, {max}]")
        }
        ValidationErrorKind::TemperatureInverted { tmin_c, tmax_c } => {
            format!("tmin_c {tmin_c} exceeds tmax_c {tmax_c}")
        }
        ValidationErrorKind::BadDate { value } => format!("'{value}' is not a YYYY-MM date"),
        ValidationErrorKind::Malformed { expected, found } => {
            format!("expected {expected} cells, found {found}")
        }
    }
}

// ---------------------------------------------------------------------------
// Request-fatal pipeline errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    /// Manual mode was given a record count other than the window length.
    #[error("expected exactly {expected} monthly records, got {actual}")]
    InvalidWindowSize { expected: usize, actual: usize },

    /// Manual mode records are not consecutive calendar months.
    #[error("manual window is not contiguous: {found} does not follow {after}")]
    NonContiguousWindow { after: NaiveDate, found: NaiveDate },

    /// Manual mode records name more than one location.
    #[error("manual window mixes locations '{first}' and '{other}'")]
    MixedLocations { first: String, other: String },

    /// A manual-mode record failed validation; the whole request is rejected.
    #[error("record {line} rejected: {source}")]
    InvalidRecord {
        line: usize,
        #[source]
        source: ValidationError,
    },

    /// Window feature count disagrees with the fitted scaler.
    #[error("scaler expects {expected} features, window has {actual}")]
    ScalerMismatch { expected: usize, actual: usize },

    /// Matrix handed to the inference engine has the wrong shape.
    #[error("model expects input shape {expected:?}, got {actual:?}")]
    Shape {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

// ---------------------------------------------------------------------------
// Startup-fatal artifact errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("failed to read artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse artifact {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Model weights are structurally unusable.
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// Scaler parameters are structurally unusable.
    #[error("scaler load error: {0}")]
    ScalerLoad(String),

    /// Feature-configuration descriptor disagrees with the window column order.
    #[error("feature configuration mismatch: {0}")]
    FeatureConfig(String),
}

// ---------------------------------------------------------------------------
// Ingest, configuration, persistence
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("input is empty")]
    Empty,

    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("no 'date' column and no start month supplied")]
    MissingDates,

    #[error("invalid month '{0}', expected YYYY-MM")]
    BadMonth(String),

    #[error("failed to parse request body: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no database URL configured (set DATABASE_URL or [database] url)")]
    NoDatabase,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Postgres(#[from] postgres::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be mapped back to a prediction.
    #[error("corrupt stored prediction: {0}")]
    Corrupt(String),
}
