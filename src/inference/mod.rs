//! Sequence-model inference.
//!
//! [`InferenceEngine`] owns no business logic: it checks the input shape,
//! runs one deterministic forward pass and returns the raw (still scaled)
//! score. Batches are evaluated as a single stacked tensor so the model can
//! vectorize across windows.
//!
//! Submodules:
//! - `lstm`: the stacked LSTM regressor and its on-disk document format.

pub mod lstm;

use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, Array3, Axis};

use crate::error::PipelineError;
use crate::model::ScaledMatrix;

/// A trained, read-only sequence regressor.
///
/// `predict_batch` receives a `(batch, timesteps, features)` tensor whose
/// trailing dimensions already equal [`SequenceModel::input_shape`] and
/// returns one raw score per batch entry.
pub trait SequenceModel: Send + Sync + fmt::Debug {
    fn input_shape(&self) -> (usize, usize);
    fn version(&self) -> &str;
    fn predict_batch(&self, batch: &Array3<f64>) -> Array1<f64>;
}

/// Shape-checked front end to a shared [`SequenceModel`].
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    model: Arc<dyn SequenceModel>,
}

impl InferenceEngine {
    pub fn new(model: impl SequenceModel + 'static) -> Self {
        Self {
            model: Arc::new(model),
        }
    }

    pub fn from_shared(model: Arc<dyn SequenceModel>) -> Self {
        Self { model }
    }

    pub fn input_shape(&self) -> (usize, usize) {
        self.model.input_shape()
    }

    pub fn model_version(&self) -> &str {
        self.model.version()
    }

    fn check_shape(&self, m: &ScaledMatrix) -> Result<(), PipelineError> {
        let expected = self.model.input_shape();
        if m.dim() != expected {
            return Err(PipelineError::Shape {
                expected,
                actual: m.dim(),
            });
        }
        Ok(())
    }

    /// Runs one window through the model.
    pub fn infer(&self, m: &ScaledMatrix) -> Result<f64, PipelineError> {
        self.check_shape(m)?;
        let batch = m.view().insert_axis(Axis(0)).to_owned();
        Ok(self.model.predict_batch(&batch)[0])
    }

    /// Runs many windows in one vectorized pass. Fails without evaluating
    /// anything if any matrix has the wrong shape.
    pub fn infer_batch(&self, matrices: &[ScaledMatrix]) -> Result<Vec<f64>, PipelineError> {
        if matrices.is_empty() {
            return Ok(Vec::new());
        }
        for m in matrices {
            self.check_shape(m)?;
        }
        let (steps, features) = self.model.input_shape();
        let mut batch = Array3::zeros((matrices.len(), steps, features));
        for (i, m) in matrices.iter().enumerate() {
            batch.index_axis_mut(Axis(0), i).assign(m);
        }
        Ok(self.model.predict_batch(&batch).to_vec())
    }
}
