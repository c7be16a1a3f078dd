//! Load-once model and scaler artifacts.
//!
//! [`ArtifactSet`] is built exactly once at process start and shared behind
//! an `Arc` by every request. Nothing in it is mutable after load, so
//! concurrent predictions need no locking. Every structural disagreement
//! between the artifacts (feature order, window length, model input shape,
//! scaler dimensionality) is detected here and is startup-fatal.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ArtifactPaths;
use crate::error::ArtifactError;
use crate::features;
use crate::inference::InferenceEngine;
use crate::inference::lstm::{LstmModel, ModelDocument};
use crate::logging::Stage;
use crate::model::{FEATURE_COUNT, WINDOW_LEN};
use crate::scaler::{FittedScaler, ScalerAdapter, ScalerSpec};

// ---------------------------------------------------------------------------
// Feature-configuration descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_sequence_length() -> usize {
    WINDOW_LEN
}

/// Descriptor naming the model features in the order the model expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default = "default_sequence_length")]
    pub sequence_length: usize,
    pub features: Vec<FeatureDescriptor>,
}

impl FeatureConfig {
    /// Descriptor matching the built-in feature registry.
    pub fn from_registry() -> Self {
        Self {
            model_version: None,
            sequence_length: WINDOW_LEN,
            features: features::FEATURE_REGISTRY
                .iter()
                .map(|f| FeatureDescriptor {
                    name: f.name.to_string(),
                    unit: Some(f.unit.to_string()),
                    description: Some(f.description.to_string()),
                })
                .collect(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    /// Checks the descriptor against the window builder's column order and
    /// window length.
    pub fn check(&self) -> Result<(), ArtifactError> {
        if self.sequence_length != WINDOW_LEN {
            return Err(ArtifactError::FeatureConfig(format!(
                "sequence_length is {}, windows are {WINDOW_LEN} months",
                self.sequence_length
            )));
        }
        match features::order_mismatch(&self.names()) {
            Some(msg) => Err(ArtifactError::FeatureConfig(msg)),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Artifact set
// ---------------------------------------------------------------------------

/// Model, scalers and descriptor, validated against each other.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    engine: InferenceEngine,
    scalers: ScalerAdapter,
    feature_config: FeatureConfig,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let text = fs::read_to_string(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ArtifactError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl ArtifactSet {
    /// Assembles and cross-checks already-deserialized artifacts.
    pub fn from_parts(
        feature_config: FeatureConfig,
        model: ModelDocument,
        input_scaler: ScalerSpec,
        output_scaler: ScalerSpec,
    ) -> Result<Self, ArtifactError> {
        feature_config.check()?;

        let model = LstmModel::from_document(model)?;
        let engine = InferenceEngine::new(model);
        if engine.input_shape() != (WINDOW_LEN, FEATURE_COUNT) {
            return Err(ArtifactError::ModelLoad(format!(
                "model input shape {:?} does not match ({WINDOW_LEN}, {FEATURE_COUNT}) windows",
                engine.input_shape()
            )));
        }

        let scalers = ScalerAdapter::new(
            FittedScaler::from_spec(input_scaler, FEATURE_COUNT)?,
            FittedScaler::from_spec(output_scaler, 1)?,
        )?;

        Ok(Self {
            engine,
            scalers,
            feature_config,
        })
    }

    /// Reads every artifact from disk. Intended to be called once at
    /// startup; the returned `Arc` is what requests share.
    pub fn load(paths: &ArtifactPaths) -> Result<Arc<Self>, ArtifactError> {
        let feature_config: FeatureConfig = read_json(&paths.feature_config)?;
        let model: ModelDocument = read_json(&paths.model)?;
        let input_scaler: ScalerSpec = read_json(&paths.input_scaler)?;
        let output_scaler: ScalerSpec = read_json(&paths.output_scaler)?;

        let set = Self::from_parts(feature_config, model, input_scaler, output_scaler)?;
        info!(
            stage = %Stage::Startup,
            model = %paths.model.display(),
            model_version = %set.model_version(),
            input_layout = ?set.scalers.input().layout(),
            "artifacts.loaded"
        );
        Ok(Arc::new(set))
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    pub fn scalers(&self) -> &ScalerAdapter {
        &self.scalers
    }

    pub fn feature_config(&self) -> &FeatureConfig {
        &self.feature_config
    }

    /// Version reported with every prediction: the descriptor's version when
    /// it declares one, else the model document's.
    pub fn model_version(&self) -> &str {
        self.feature_config
            .model_version
            .as_deref()
            .unwrap_or_else(|| self.engine.model_version())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Small in-memory artifact sets for unit tests.

    use super::*;
    use crate::inference::lstm::{Activation, LayerSpec};
    use crate::scaler::{ScalerLayout, ScalerTransform};

    /// A model whose LSTM weights are zero, so every window scores exactly
    /// `raw_output` before descaling.
    pub fn constant_model(raw_output: f64) -> ModelDocument {
        let units = 2;
        ModelDocument {
            model_version: "stat-LSTM-test".into(),
            input_shape: [WINDOW_LEN, FEATURE_COUNT],
            layers: vec![
                LayerSpec::Lstm {
                    units,
                    return_sequences: false,
                    kernel: vec![vec![0.0; 4 * units]; FEATURE_COUNT],
                    recurrent_kernel: vec![vec![0.0; 4 * units]; units],
                    bias: vec![0.0; 4 * units],
                },
                LayerSpec::Dense {
                    units: 1,
                    kernel: vec![vec![0.0]; units],
                    bias: vec![raw_output],
                    activation: Activation::Linear,
                },
            ],
        }
    }

    /// A model that responds to its input: rainfall and SPEI push the score
    /// up, temperature pushes it down.
    pub fn responsive_model() -> ModelDocument {
        let units = 3;
        let kernel = (0..FEATURE_COUNT)
            .map(|f| {
                (0..4 * units)
                    .map(|g| match f {
                        0 | 3 | 4 => 0.3 + 0.01 * g as f64,
                        1 | 2 => -0.2,
                        _ => 0.05,
                    })
                    .collect()
            })
            .collect();
        ModelDocument {
            model_version: "stat-LSTM-test".into(),
            input_shape: [WINDOW_LEN, FEATURE_COUNT],
            layers: vec![
                LayerSpec::Lstm {
                    units,
                    return_sequences: false,
                    kernel,
                    recurrent_kernel: vec![vec![0.1; 4 * units]; units],
                    bias: vec![0.0; 4 * units],
                },
                LayerSpec::Dense {
                    units: 1,
                    kernel: vec![vec![1.5]; units],
                    bias: vec![-0.2],
                    activation: Activation::Linear,
                },
            ],
        }
    }

    pub fn identity_input_scaler() -> ScalerSpec {
        ScalerSpec {
            transform: ScalerTransform::Standard {
                mean: vec![0.0],
                scale: vec![1.0],
            },
            layout: ScalerLayout::Flattened,
        }
    }

    pub fn fitted_input_scaler() -> ScalerSpec {
        ScalerSpec {
            transform: ScalerTransform::Standard {
                mean: vec![80.0, 33.0, 19.0, 0.0, 0.0, 0.5, 45.0],
                scale: vec![40.0, 3.0, 3.0, 1.0, 1.0, 0.2, 15.0],
            },
            layout: ScalerLayout::PerFeature,
        }
    }

    /// Output scaler with `regcdi = raw * 1.0 + mean`.
    pub fn output_scaler(mean: f64) -> ScalerSpec {
        ScalerSpec {
            transform: ScalerTransform::Standard {
                mean: vec![mean],
                scale: vec![1.0],
            },
            layout: ScalerLayout::PerFeature,
        }
    }

    /// Artifacts whose every prediction descales to `regcdi`.
    pub fn constant_artifacts(regcdi: f64) -> Arc<ArtifactSet> {
        Arc::new(
            ArtifactSet::from_parts(
                FeatureConfig::from_registry(),
                constant_model(0.0),
                identity_input_scaler(),
                output_scaler(regcdi),
            )
            .expect("constant artifacts are consistent"),
        )
    }

    pub fn responsive_artifacts() -> Arc<ArtifactSet> {
        Arc::new(
            ArtifactSet::from_parts(
                FeatureConfig::from_registry(),
                responsive_model(),
                fitted_input_scaler(),
                output_scaler(0.0),
            )
            .expect("responsive artifacts are consistent"),
        )
    }
}
