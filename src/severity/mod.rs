//! Drought severity classification.
//!
//! Submodules:
//! - `thresholds`: REGCDI score to category mapping.
//! - `confidence`: boundary-distance confidence score.

pub mod confidence;
pub mod thresholds;

pub use confidence::confidence_score;
pub use thresholds::{CATEGORY_BOUNDARIES, DroughtCategory, categorize};
