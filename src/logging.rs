//! Structured logging for the drought inference service.
//!
//! Wraps `tracing-subscriber` initialisation and provides helpers that log
//! pipeline diagnostics with location and stage context, at a level chosen
//! by how alarming the diagnostic is. Output goes to stderr so JSON results
//! on stdout stay pipeable.

use std::fmt;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::analysis::WindowDiagnostic;
use crate::config::LoggingConfig;
use crate::pipeline::report::{BatchReport, RowFailure};

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Startup,
    Ingest,
    Validate,
    Window,
    Scale,
    Infer,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Startup => write!(f, "startup"),
            Stage::Ingest => write!(f, "ingest"),
            Stage::Validate => write!(f, "validate"),
            Stage::Window => write!(f, "window"),
            Stage::Scale => write!(f, "scale"),
            Stage::Infer => write!(f, "infer"),
            Stage::Persist => write!(f, "persist"),
        }
    }
}

// ---------------------------------------------------------------------------
// Diagnostic classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticClass {
    /// Routine for real-world tables, e.g. a location with too little history.
    Expected,
    /// Input data problem the caller should look at.
    DataQuality,
}

impl fmt::Display for DiagnosticClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticClass::Expected => write!(f, "EXPECTED"),
            DiagnosticClass::DataQuality => write!(f, "DATA_QUALITY"),
        }
    }
}

pub fn classify_window_diagnostic(diag: &WindowDiagnostic) -> DiagnosticClass {
    match diag {
        WindowDiagnostic::InsufficientHistory { .. } => DiagnosticClass::Expected,
        WindowDiagnostic::GapSkipped { .. } => DiagnosticClass::DataQuality,
    }
}

// ---------------------------------------------------------------------------
// Initialisation
// ---------------------------------------------------------------------------

/// Installs the global subscriber. Calling it twice is harmless; the second
/// call keeps the first subscriber.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        debug!("logging.already_initialised");
    }
}

// ---------------------------------------------------------------------------
// Structured helpers
// ---------------------------------------------------------------------------

pub fn log_row_failure(failure: &RowFailure) {
    warn!(
        stage = %Stage::Validate,
        location = %failure.location,
        row = failure.line,
        field = %failure.error.field,
        "row rejected: {}",
        failure.error
    );
}

pub fn log_window_diagnostic(diag: &WindowDiagnostic) {
    let class = classify_window_diagnostic(diag);
    match diag {
        WindowDiagnostic::GapSkipped {
            location,
            discarded_from,
            discarded_to,
            discarded_records,
            resumed_at,
            reason,
        } => info!(
            stage = %Stage::Window,
            class = %class,
            location = %location,
            from = %discarded_from,
            to = %discarded_to,
            discarded = discarded_records,
            resumed_at = %resumed_at,
            ?reason,
            "window.gap_skipped"
        ),
        WindowDiagnostic::InsufficientHistory {
            location,
            records,
            required,
        } => debug!(
            stage = %Stage::Window,
            class = %class,
            location = %location,
            records,
            required,
            "window.insufficient_history"
        ),
    }
}

/// Logs every diagnostic in a report followed by its summary line.
pub fn log_batch_report(report: &BatchReport) {
    for failure in &report.invalid_rows {
        log_row_failure(failure);
    }
    for diag in &report.window_diagnostics {
        log_window_diagnostic(diag);
    }
    log_batch_summary(report);
}

/// Summary at info when every row produced usable history, warn on partial
/// success, error when nothing could be predicted.
pub fn log_batch_summary(report: &BatchReport) {
    let message = format!(
        "Batch complete: {} predictions from {}/{} valid rows across {} locations, {} rows rejected",
        report.predictions,
        report.valid_rows,
        report.total_rows,
        report.locations,
        report.invalid_rows.len()
    );

    if report.cancelled {
        warn!(stage = %Stage::Infer, cancelled = true, "{message}");
    } else if report.predictions == 0 {
        error!(stage = %Stage::Infer, "{message}");
    } else if report.invalid_rows.is_empty() && report.window_diagnostics.is_empty() {
        info!(stage = %Stage::Infer, "{message}");
    } else {
        warn!(stage = %Stage::Infer, "{message}");
    }
}
