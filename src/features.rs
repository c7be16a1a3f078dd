//! Feature registry for the drought inference model.
//!
//! Defines the seven monthly features the sequence model consumes, in the
//! exact column order it was trained on, together with their units and
//! inclusive physical ranges. This is the single source of truth for column
//! order: the validator, the window matrix and the startup check against the
//! feature-configuration descriptor all read from here.

use crate::model::FEATURE_COUNT;

// ---------------------------------------------------------------------------
// Feature metadata
// ---------------------------------------------------------------------------

/// Metadata for a single model feature.
#[derive(Debug)]
pub struct Feature {
    /// Column name as it appears in CSV headers and JSON bodies.
    pub name: &'static str,
    /// Unit of the raw value.
    pub unit: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Inclusive lower physical bound, if any.
    pub min: Option<f64>,
    /// Inclusive upper physical bound, if any.
    pub max: Option<f64>,
}

impl Feature {
    /// True when `value` lies inside the inclusive physical range.
    pub fn in_range(&self, value: f64) -> bool {
        self.min.is_none_or(|lo| value >= lo) && self.max.is_none_or(|hi| value <= hi)
    }
}

/// The model features in training column order.
///
/// Temperatures carry no fixed bounds of their own; the validator enforces
/// `tmin_c <= tmax_c` across the pair instead.
pub static FEATURE_REGISTRY: [Feature; FEATURE_COUNT] = [
    Feature {
        name: "rainfall_mm",
        unit: "mm",
        description: "Monthly cumulative rainfall",
        min: Some(0.0),
        max: None,
    },
    Feature {
        name: "tmax_c",
        unit: "°C",
        description: "Monthly maximum temperature",
        min: None,
        max: None,
    },
    Feature {
        name: "tmin_c",
        unit: "°C",
        description: "Monthly minimum temperature",
        min: None,
        max: None,
    },
    Feature {
        name: "spei",
        unit: "index",
        description: "Standardized Precipitation Evapotranspiration Index",
        min: Some(-3.0),
        max: Some(3.0),
    },
    Feature {
        name: "spi",
        unit: "index",
        description: "Standardized Precipitation Index",
        min: Some(-3.0),
        max: Some(3.0),
    },
    Feature {
        name: "ndvi",
        unit: "ratio",
        description: "Normalized Difference Vegetation Index",
        min: Some(0.0),
        max: Some(1.0),
    },
    Feature {
        name: "soil_moisture",
        unit: "%",
        description: "Surface soil moisture",
        min: Some(0.0),
        max: Some(100.0),
    },
];

/// Feature names in model order.
pub fn feature_names() -> Vec<&'static str> {
    FEATURE_REGISTRY.iter().map(|f| f.name).collect()
}

/// Looks up a feature by column name. Returns `None` if not found.
pub fn find_feature(name: &str) -> Option<&'static Feature> {
    FEATURE_REGISTRY.iter().find(|f| f.name == name)
}

/// Column index of a feature in the model input matrix.
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_REGISTRY.iter().position(|f| f.name == name)
}

/// Compares a declared feature order against the registry.
///
/// Returns a description of the first disagreement, or `None` when the
/// declared order matches exactly.
pub fn order_mismatch(declared: &[String]) -> Option<String> {
    if declared.len() != FEATURE_COUNT {
        return Some(format!(
            "descriptor declares {} features, model uses {}",
            declared.len(),
            FEATURE_COUNT
        ));
    }
    declared
        .iter()
        .zip(FEATURE_REGISTRY.iter())
        .enumerate()
        .find(|(_, (d, f))| d.as_str() != f.name)
        .map(|(i, (d, f))| match feature_index(d) {
            Some(j) => format!(
                "column {i}: descriptor has '{d}' (model column {j}), expected '{}'",
                f.name
            ),
            None => format!("column {i}: descriptor has unknown feature '{d}', expected '{}'", f.name),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
