//! REGCDI drought category thresholds.
//!
//! Categories are half-open intervals closed at their upper (less severe)
//! side's lower bound, so a boundary score always belongs to the milder
//! category:
//!
//!   score >= 0.5          no drought
//!   0.0  <= score < 0.5   mild
//!   -0.5 <= score < 0.0   moderate
//!   -1.0 <= score < -0.5  severe
//!   score < -1.0          extreme

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lower bounds of the four non-extreme categories, from least to most
/// severe.
pub const CATEGORY_BOUNDARIES: [f64; 4] = [0.5, 0.0, -0.5, -1.0];

/// Drought categories, in ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DroughtCategory {
    NoDrought,
    Mild,
    Moderate,
    Severe,
    Extreme,
}

impl DroughtCategory {
    pub const ALL: [DroughtCategory; 5] = [
        DroughtCategory::NoDrought,
        DroughtCategory::Mild,
        DroughtCategory::Moderate,
        DroughtCategory::Severe,
        DroughtCategory::Extreme,
    ];

    /// Display label.
    pub fn label(&self) -> &'static str {
        match self {
            DroughtCategory::NoDrought => "No Drought",
            DroughtCategory::Mild => "Mild",
            DroughtCategory::Moderate => "Moderate",
            DroughtCategory::Severe => "Severe",
            DroughtCategory::Extreme => "Extreme",
        }
    }

    /// Machine key, stable across releases; used in storage.
    pub fn level(&self) -> &'static str {
        match self {
            DroughtCategory::NoDrought => "no_drought",
            DroughtCategory::Mild => "mild",
            DroughtCategory::Moderate => "moderate",
            DroughtCategory::Severe => "severe",
            DroughtCategory::Extreme => "extreme",
        }
    }

    pub fn from_level(level: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.level() == level)
    }

    pub fn description(&self) -> &'static str {
        match self {
            DroughtCategory::NoDrought => "Normal conditions with adequate water availability",
            DroughtCategory::Mild => "Slight water deficit, minimal impact on agriculture",
            DroughtCategory::Moderate => "Noticeable water shortage, crop stress beginning",
            DroughtCategory::Severe => "Significant water scarcity, major agricultural impact",
            DroughtCategory::Extreme => "Critical water shortage, widespread agricultural failure",
        }
    }
}

impl fmt::Display for DroughtCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Maps a descaled REGCDI score to its drought category.
///
/// Total over `f64`: NaN compares false against every bound and falls
/// through to `Extreme`, the fail-safe reading.
pub fn categorize(score: f64) -> DroughtCategory {
    if score >= 0.5 {
        DroughtCategory::NoDrought
    } else if score >= 0.0 {
        DroughtCategory::Mild
    } else if score >= -0.5 {
        DroughtCategory::Moderate
    } else if score >= -1.0 {
        DroughtCategory::Severe
    } else {
        DroughtCategory::Extreme
    }
}
