//! Service configuration.
//!
//! Settings come from a TOML file (default `./drought_service.toml`, or the
//! path in `DROUGHT_CONFIG`), with `.env`/environment overrides for the
//! values that differ between deployments. A missing file is not an error:
//! every section has defaults pointing at the conventional `ml_models/`
//! artifact layout.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::DEFAULT_LOCATION;

pub const CONFIG_ENV: &str = "DROUGHT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "./drought_service.toml";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const LOG_LEVEL_ENV: &str = "DROUGHT_LOG";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Locations of the serialized model, scalers and feature descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactPaths {
    pub model: PathBuf,
    pub input_scaler: PathBuf,
    pub output_scaler: PathBuf,
    pub feature_config: PathBuf,
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            model: PathBuf::from("ml_models/stat_lstm_model.json"),
            input_scaler: PathBuf::from("ml_models/scaler_X.json"),
            output_scaler: PathBuf::from("ml_models/scaler_y.json"),
            feature_config: PathBuf::from("ml_models/feature_config.json"),
        }
    }
}

impl ArtifactPaths {
    /// Resolves relative paths against `base`.
    pub fn relative_to(&self, base: &Path) -> Self {
        let join = |p: &PathBuf| if p.is_absolute() { p.clone() } else { base.join(p) };
        Self {
            model: join(&self.model),
            input_scaler: join(&self.input_scaler),
            output_scaler: join(&self.output_scaler),
            feature_config: join(&self.feature_config),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Location assigned to rows without one.
    pub default_location: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_location: DEFAULT_LOCATION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `drought_service=debug`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub artifacts: ArtifactPaths,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl ServiceConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Applies environment overrides through `lookup` (injected so tests do
    /// not have to mutate the process environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(DATABASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.database.url = Some(url);
        }
        if let Some(level) = lookup(LOG_LEVEL_ENV).filter(|v| !v.trim().is_empty()) {
            self.logging.level = level;
        }
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database.url.as_deref().ok_or(ConfigError::NoDatabase)
    }
}

/// Reads and parses a configuration file. Relative artifact paths in it are
/// resolved against the file's own directory.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = ServiceConfig::from_toml_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(dir) = path.parent() {
        config.artifacts = config.artifacts.relative_to(dir);
    }
    Ok(config)
}

/// Loads `.env`, then the config file named by `DROUGHT_CONFIG` (or the
/// default path), then applies environment overrides.
pub fn load_from_env() -> Result<ServiceConfig, ConfigError> {
    dotenv::dotenv().ok();
    let path = env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = if path.exists() {
        load_config(&path)?
    } else {
        ServiceConfig::default()
    };
    config.apply_overrides(|key| env::var(key).ok());
    Ok(config)
}
