//! Drought inference service: turns monthly climate and vegetation
//! observations into REGCDI drought scores and categories.
//!
//! Rows are validated (`validate`), grouped into rolling 12-month windows
//! (`analysis`), normalized (`scaler`), run through a stacked LSTM
//! (`inference`), descaled and categorized (`severity`). `pipeline` drives
//! the whole flow for manual and batch requests.

pub mod analysis;
pub mod artifacts;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod inference;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod scaler;
pub mod severity;
pub mod store;
pub mod validate;
pub mod verify;
