//! Time-series organization for the inference pipeline.
//!
//! Submodules:
//! - `windows`: turns one location's monthly records into rolling
//!   12-month feature windows, with gap diagnostics.

pub mod windows;

pub use windows::{
    GapReason, RollingWindowBuilder, WindowDiagnostic, WindowEvent, build_windows,
    collect_windows,
};
