//! Fitted feature and score scalers.
//!
//! The input scaler maps raw window values into the normalized space the
//! model was trained in; the output scaler's inverse maps the model's raw
//! score back to a REGCDI value. Parameters follow the scikit-learn
//! conventions the artifacts were exported from:
//!
//!   standard: x' = (x - mean) / scale        inverse: x = x' * scale + mean
//!   minmax:   x' = x * scale + min           inverse: x = (x' - min) / scale
//!
//! A scaler is either fitted per feature (one parameter per column) or on
//! the flattened matrix (a single parameter applied to every value).

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{ArtifactError, PipelineError};
use crate::model::{FeatureWindow, ScaledMatrix};

// ---------------------------------------------------------------------------
// Serialized parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScalerTransform {
    Standard { mean: Vec<f64>, scale: Vec<f64> },
    #[serde(rename = "minmax")]
    MinMax { min: Vec<f64>, scale: Vec<f64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerLayout {
    #[default]
    PerFeature,
    Flattened,
}

/// On-disk scaler document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerSpec {
    #[serde(flatten)]
    pub transform: ScalerTransform,
    #[serde(default)]
    pub layout: ScalerLayout,
}

// ---------------------------------------------------------------------------
// Fitted scaler
// ---------------------------------------------------------------------------

/// A validated scaler bound to a fixed input dimensionality.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedScaler {
    transform: ScalerTransform,
    layout: ScalerLayout,
    dims: usize,
}

impl FittedScaler {
    /// Validates `spec` for data with `dims` columns.
    pub fn from_spec(spec: ScalerSpec, dims: usize) -> Result<Self, ArtifactError> {
        let (offsets, scales) = match &spec.transform {
            ScalerTransform::Standard { mean, scale } => (mean, scale),
            ScalerTransform::MinMax { min, scale } => (min, scale),
        };
        if offsets.len() != scales.len() {
            return Err(ArtifactError::ScalerLoad(format!(
                "offset and scale lengths differ ({} vs {})",
                offsets.len(),
                scales.len()
            )));
        }
        let required = match spec.layout {
            ScalerLayout::PerFeature => dims,
            ScalerLayout::Flattened => 1,
        };
        if scales.len() != required {
            return Err(ArtifactError::ScalerLoad(format!(
                "{:?} scaler for {dims} features needs {required} parameters, found {}",
                spec.layout,
                scales.len()
            )));
        }
        if offsets.iter().chain(scales).any(|v| !v.is_finite()) {
            return Err(ArtifactError::ScalerLoad("non-finite parameter".into()));
        }
        if scales.iter().any(|s| *s == 0.0) {
            return Err(ArtifactError::ScalerLoad("zero scale parameter".into()));
        }
        Ok(Self {
            transform: spec.transform,
            layout: spec.layout,
            dims,
        })
    }

    /// Number of columns this scaler accepts.
    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn layout(&self) -> ScalerLayout {
        self.layout
    }

    fn param(&self, col: usize) -> usize {
        match self.layout {
            ScalerLayout::PerFeature => col,
            ScalerLayout::Flattened => 0,
        }
    }

    pub fn transform_value(&self, col: usize, x: f64) -> f64 {
        let p = self.param(col);
        match &self.transform {
            ScalerTransform::Standard { mean, scale } => (x - mean[p]) / scale[p],
            ScalerTransform::MinMax { min, scale } => x * scale[p] + min[p],
        }
    }

    pub fn inverse_value(&self, col: usize, x: f64) -> f64 {
        let p = self.param(col);
        match &self.transform {
            ScalerTransform::Standard { mean, scale } => x * scale[p] + mean[p],
            ScalerTransform::MinMax { min, scale } => (x - min[p]) / scale[p],
        }
    }

    /// Column-wise forward transform of a matrix with `dims` columns.
    pub fn transform_matrix(&self, m: &Array2<f64>) -> Result<Array2<f64>, PipelineError> {
        if m.ncols() != self.dims {
            return Err(PipelineError::ScalerMismatch {
                expected: self.dims,
                actual: m.ncols(),
            });
        }
        let mut out = m.clone();
        for (col, mut column) in out.columns_mut().into_iter().enumerate() {
            column.mapv_inplace(|x| self.transform_value(col, x));
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Input and output scalers as loaded at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalerAdapter {
    input: FittedScaler,
    output: FittedScaler,
}

impl ScalerAdapter {
    pub fn new(input: FittedScaler, output: FittedScaler) -> Result<Self, ArtifactError> {
        if output.dims() != 1 {
            return Err(ArtifactError::ScalerLoad(format!(
                "output scaler must be one-dimensional, found {} dimensions",
                output.dims()
            )));
        }
        Ok(Self { input, output })
    }

    pub fn input(&self) -> &FittedScaler {
        &self.input
    }

    pub fn output(&self) -> &FittedScaler {
        &self.output
    }

    /// Scales a window's feature matrix into model space.
    pub fn forward(&self, window: &FeatureWindow) -> Result<ScaledMatrix, PipelineError> {
        self.input.transform_matrix(&window.feature_matrix())
    }

    /// Scales an arbitrary raw feature matrix into model space.
    pub fn forward_matrix(&self, m: &Array2<f64>) -> Result<ScaledMatrix, PipelineError> {
        self.input.transform_matrix(m)
    }

    /// Maps a raw model score back to a REGCDI value.
    pub fn inverse(&self, raw_score: f64) -> f64 {
        self.output.inverse_value(0, raw_score)
    }

    /// Maps a REGCDI value into the model's output space.
    #[cfg(test)]
    pub(crate) fn forward_score(&self, regcdi: f64) -> f64 {
        self.output.transform_value(0, regcdi)
    }
}
