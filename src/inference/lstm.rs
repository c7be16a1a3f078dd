//! Stacked LSTM regressor evaluated with `ndarray`.
//!
//! Weights are exported from the trained Keras model into a JSON document
//! (see [`ModelDocument`]). Gate layout follows Keras: the kernel columns are
//! `[input | forget | cell | output]`, each `units` wide, with a sigmoid
//! recurrent activation and tanh cell activation. Dropout layers are kept in
//! the document for fidelity but are the identity at inference time.

use ndarray::{Array1, Array2, Array3, Axis, s};
use serde::{Deserialize, Serialize};

use crate::error::ArtifactError;
use crate::inference::SequenceModel;

pub const DEFAULT_MODEL_VERSION: &str = "stat-LSTM-v1.0";

fn default_model_version() -> String {
    DEFAULT_MODEL_VERSION.to_string()
}

// ---------------------------------------------------------------------------
// Serialized model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Linear => x,
            Activation::Relu => x.max(0.0),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => sigmoid(x),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Lstm {
        units: usize,
        #[serde(default)]
        return_sequences: bool,
        kernel: Vec<Vec<f64>>,
        recurrent_kernel: Vec<Vec<f64>>,
        bias: Vec<f64>,
    },
    Dropout {
        #[serde(default)]
        rate: f64,
    },
    Dense {
        units: usize,
        kernel: Vec<Vec<f64>>,
        bias: Vec<f64>,
        #[serde(default)]
        activation: Activation,
    },
}

/// On-disk model document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDocument {
    #[serde(default = "default_model_version")]
    pub model_version: String,
    /// `[timesteps, features]`
    pub input_shape: [usize; 2],
    pub layers: Vec<LayerSpec>,
}

// ---------------------------------------------------------------------------
// Built layers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct LstmLayer {
    units: usize,
    return_sequences: bool,
    kernel: Array2<f64>,
    recurrent: Array2<f64>,
    bias: Array1<f64>,
}

#[derive(Debug, Clone)]
struct DenseLayer {
    kernel: Array2<f64>,
    bias: Array1<f64>,
    activation: Activation,
}

#[derive(Debug, Clone)]
enum Layer {
    Lstm(LstmLayer),
    Dense(DenseLayer),
}

/// Activations flowing between layers.
enum Tensor {
    Sequence(Array3<f64>),
    Flat(Array2<f64>),
}

/// Shape bookkeeping used while validating the layer stack.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
    Sequence(usize),
    Flat(usize),
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn to_matrix(name: &str, rows: Vec<Vec<f64>>, shape: (usize, usize)) -> Result<Array2<f64>, ArtifactError> {
    if rows.len() != shape.0 || rows.iter().any(|r| r.len() != shape.1) {
        return Err(ArtifactError::ModelLoad(format!(
            "{name} must be {}x{}, found {} rows",
            shape.0,
            shape.1,
            rows.len()
        )));
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    if flat.iter().any(|v| !v.is_finite()) {
        return Err(ArtifactError::ModelLoad(format!("{name} contains non-finite weights")));
    }
    Array2::from_shape_vec(shape, flat).map_err(|e| ArtifactError::ModelLoad(format!("{name}: {e}")))
}

fn to_vector(name: &str, values: Vec<f64>, len: usize) -> Result<Array1<f64>, ArtifactError> {
    if values.len() != len {
        return Err(ArtifactError::ModelLoad(format!(
            "{name} must have {len} entries, found {}",
            values.len()
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ArtifactError::ModelLoad(format!("{name} contains non-finite weights")));
    }
    Ok(Array1::from_vec(values))
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Read-only stacked LSTM. Holds no mutable state, so one instance can be
/// shared by any number of concurrent callers.
#[derive(Debug, Clone)]
pub struct LstmModel {
    version: String,
    timesteps: usize,
    features: usize,
    layers: Vec<Layer>,
}

impl LstmModel {
    /// Builds the model, checking every weight shape against the running
    /// activation shape. The network must end in a single flat output.
    pub fn from_document(doc: ModelDocument) -> Result<Self, ArtifactError> {
        let [timesteps, features] = doc.input_shape;
        if timesteps == 0 || features == 0 {
            return Err(ArtifactError::ModelLoad("input_shape must be non-zero".into()));
        }

        let mut shape = Shape::Sequence(features);
        let mut layers = Vec::with_capacity(doc.layers.len());
        for (idx, spec) in doc.layers.into_iter().enumerate() {
            match spec {
                LayerSpec::Lstm {
                    units,
                    return_sequences,
                    kernel,
                    recurrent_kernel,
                    bias,
                } => {
                    let Shape::Sequence(input) = shape else {
                        return Err(ArtifactError::ModelLoad(format!(
                            "layer {idx}: lstm needs a sequence input; previous lstm must return sequences"
                        )));
                    };
                    if units == 0 {
                        return Err(ArtifactError::ModelLoad(format!("layer {idx}: lstm has zero units")));
                    }
                    let gates = 4 * units;
                    layers.push(Layer::Lstm(LstmLayer {
                        units,
                        return_sequences,
                        kernel: to_matrix(&format!("layer {idx} kernel"), kernel, (input, gates))?,
                        recurrent: to_matrix(
                            &format!("layer {idx} recurrent_kernel"),
                            recurrent_kernel,
                            (units, gates),
                        )?,
                        bias: to_vector(&format!("layer {idx} bias"), bias, gates)?,
                    }));
                    shape = if return_sequences {
                        Shape::Sequence(units)
                    } else {
                        Shape::Flat(units)
                    };
                }
                LayerSpec::Dropout { .. } => {}
                LayerSpec::Dense {
                    units,
                    kernel,
                    bias,
                    activation,
                } => {
                    let Shape::Flat(input) = shape else {
                        return Err(ArtifactError::ModelLoad(format!(
                            "layer {idx}: dense needs a flat input; last lstm must not return sequences"
                        )));
                    };
                    layers.push(Layer::Dense(DenseLayer {
                        kernel: to_matrix(&format!("layer {idx} kernel"), kernel, (input, units))?,
                        bias: to_vector(&format!("layer {idx} bias"), bias, units)?,
                        activation,
                    }));
                    shape = Shape::Flat(units);
                }
            }
        }

        if shape != Shape::Flat(1) {
            return Err(ArtifactError::ModelLoad(format!(
                "network must end in a single output unit, ends in {shape:?}"
            )));
        }

        Ok(Self {
            version: doc.model_version,
            timesteps,
            features,
            layers,
        })
    }

    fn forward_lstm(layer: &LstmLayer, x: &Array3<f64>) -> Tensor {
        let (batch, steps, _) = x.dim();
        let u = layer.units;
        let mut h = Array2::<f64>::zeros((batch, u));
        let mut c = Array2::<f64>::zeros((batch, u));
        let mut sequence = layer
            .return_sequences
            .then(|| Array3::<f64>::zeros((batch, steps, u)));

        for t in 0..steps {
            let xt = x.index_axis(Axis(1), t);
            let z = xt.dot(&layer.kernel) + h.dot(&layer.recurrent) + &layer.bias;
            let i = z.slice(s![.., 0..u]).mapv(sigmoid);
            let f = z.slice(s![.., u..2 * u]).mapv(sigmoid);
            let g = z.slice(s![.., 2 * u..3 * u]).mapv(f64::tanh);
            let o = z.slice(s![.., 3 * u..4 * u]).mapv(sigmoid);
            c = &f * &c + &i * &g;
            h = &o * &c.mapv(f64::tanh);
            if let Some(seq) = sequence.as_mut() {
                seq.index_axis_mut(Axis(1), t).assign(&h);
            }
        }

        match sequence {
            Some(seq) => Tensor::Sequence(seq),
            None => Tensor::Flat(h),
        }
    }

    fn forward_dense(layer: &DenseLayer, x: &Array2<f64>) -> Array2<f64> {
        let mut y = x.dot(&layer.kernel) + &layer.bias;
        y.mapv_inplace(|v| layer.activation.apply(v));
        y
    }
}

impl SequenceModel for LstmModel {
    fn input_shape(&self) -> (usize, usize) {
        (self.timesteps, self.features)
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn predict_batch(&self, batch: &Array3<f64>) -> Array1<f64> {
        let mut tensor = Tensor::Sequence(batch.clone());
        for layer in &self.layers {
            tensor = match (layer, tensor) {
                (Layer::Lstm(l), Tensor::Sequence(x)) => Self::forward_lstm(l, &x),
                (Layer::Dense(d), Tensor::Flat(x)) => Tensor::Flat(Self::forward_dense(d, &x)),
                // shapes were validated in from_document
                (_, t) => t,
            };
        }
        match tensor {
            Tensor::Flat(out) => out.column(0).to_owned(),
            Tensor::Sequence(out) => Array1::from_elem(out.dim().0, f64::NAN),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lstm(input: usize, units: usize, fill: f64, return_sequences: bool) -> LayerSpec {
        LayerSpec::Lstm {
            units,
            return_sequences,
            kernel: vec![vec![fill; 4 * units]; input],
            recurrent_kernel: vec![vec![fill; 4 * units]; units],
            bias: vec![0.0; 4 * units],
        }
    }

    fn dense(input: usize, units: usize, weight: f64, bias: f64) -> LayerSpec {
        LayerSpec::Dense {
            units,
            kernel: vec![vec![weight; units]; input],
            bias: vec![bias; units],
            activation: Activation::Linear,
        }
    }

    fn doc(layers: Vec<LayerSpec>) -> ModelDocument {
        ModelDocument {
            model_version: "test".into(),
            input_shape: [12, 7],
            layers,
        }
    }

    #[test]
    fn test_zero_lstm_outputs_dense_bias() {
        let model = LstmModel::from_document(doc(vec![lstm(7, 3, 0.0, false), dense(3, 1, 1.0, -0.3)]))
            .unwrap();
        let out = model.predict_batch(&Array3::from_elem((2, 12, 7), 0.8));
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|v| *v == -0.3), "zero lstm must yield the dense bias: {out:?}");
    }

    #[test]
    fn test_single_step_matches_hand_computation() {
        // one unit, one feature, one timestep: all weights 1, input 1
        let model = LstmModel::from_document(ModelDocument {
            model_version: "test".into(),
            input_shape: [1, 1],
            layers: vec![lstm(1, 1, 1.0, false), dense(1, 1, 1.0, 0.0)],
        })
        .unwrap();
        let out = model.predict_batch(&Array3::from_elem((1, 1, 1), 1.0));
        let gate = sigmoid(1.0);
        let c = gate * 1.0f64.tanh();
        let h = gate * c.tanh();
        assert!((out[0] - h).abs() < 1e-12, "{} vs {h}", out[0]);
    }

    #[test]
    fn test_stacked_lstm_with_dropout_builds() {
        let model = LstmModel::from_document(doc(vec![
            lstm(7, 4, 0.1, true),
            LayerSpec::Dropout { rate: 0.2 },
            lstm(4, 2, 0.1, false),
            dense(2, 3, 0.5, 0.0),
            dense(3, 1, 0.5, 0.1),
        ]))
        .unwrap();
        let out = model.predict_batch(&Array3::from_elem((3, 12, 7), 0.5));
        assert!(out.iter().all(|v| v.is_finite()));
        assert_eq!(out[0].to_bits(), out[2].to_bits(), "identical rows give identical scores");
    }

    #[test]
    fn test_wrong_kernel_shape_is_a_load_error() {
        let err = LstmModel::from_document(doc(vec![lstm(6, 3, 0.0, false), dense(3, 1, 1.0, 0.0)]))
            .unwrap_err();
        assert!(matches!(err, ArtifactError::ModelLoad(_)));
    }

    #[test]
    fn test_dense_after_sequence_output_is_rejected() {
        let err = LstmModel::from_document(doc(vec![lstm(7, 3, 0.0, true), dense(3, 1, 1.0, 0.0)]))
            .unwrap_err();
        assert!(matches!(err, ArtifactError::ModelLoad(msg) if msg.contains("flat input")));
    }

    #[test]
    fn test_multi_unit_output_is_rejected() {
        let err = LstmModel::from_document(doc(vec![lstm(7, 3, 0.0, false), dense(3, 2, 1.0, 0.0)]))
            .unwrap_err();
        assert!(matches!(err, ArtifactError::ModelLoad(_)));
    }

    #[test]
    fn test_document_round_trips_through_json() {
        let json = r#"{
            "input_shape": [12, 7],
            "layers": [
                {"type": "lstm", "units": 1,
                 "kernel": [[0,0,0,0],[0,0,0,0],[0,0,0,0],[0,0,0,0],[0,0,0,0],[0,0,0,0],[0,0,0,0]],
                 "recurrent_kernel": [[0,0,0,0]], "bias": [0,0,0,0]},
                {"type": "dropout", "rate": 0.3},
                {"type": "dense", "units": 1, "kernel": [[1.0]], "bias": [0.25]}
            ]
        }"#;
        let doc: ModelDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.model_version, DEFAULT_MODEL_VERSION);
        let model = LstmModel::from_document(doc).unwrap();
        assert_eq!(model.input_shape(), (12, 7));
        let out = model.predict_batch(&Array3::zeros((1, 12, 7)));
        assert_eq!(out[0], 0.25);
    }
}
