// ⚙️ Configuration - training and server settings loaded from YAML

use crate::error::{PipelineError, Result};
use crate::loader::SourcePaths;
use crate::models::ModelKind;
use crate::preprocess::PreprocessorKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const HOST_ENV: &str = "PROPENSITY_HOST";
pub const PORT_ENV: &str = "PROPENSITY_PORT";

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_validation_fraction() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn read_config_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        PipelineError::configuration(format!("cannot read config {}: {}", path.display(), e))
    })
}

fn parse_yaml<T: serde::de::DeserializeOwned>(yaml: &str, what: &str) -> Result<T> {
    serde_yaml::from_str(yaml)
        .map_err(|e| PipelineError::configuration(format!("invalid {} config: {}", what, e)))
}

// ============================================================================
// TRAINING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Registry key, e.g. `tensorflow` or `logistic_regression`
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessorConfig {
    /// Registry key; defaults from the model name when absent
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub preprocessor: PreprocessorConfig,
    #[serde(default)]
    pub data: SourcePaths,
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    /// Share of entities held out for evaluation
    #[serde(default = "default_validation_fraction")]
    pub validation_fraction: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl TrainingConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: TrainingConfig = parse_yaml(yaml, "training")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_yaml_str(&read_config_file(path)?)
    }

    /// Registry keys must resolve and the split must leave rows on both sides
    pub fn validate(&self) -> Result<()> {
        ModelKind::from_name(&self.model.name)?;
        if let Some(name) = &self.preprocessor.name {
            PreprocessorKind::from_name(name)?;
        }
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(PipelineError::configuration(format!(
                "validation_fraction must be in (0, 1), got {}",
                self.validation_fraction
            )));
        }
        Ok(())
    }

    pub fn preprocessor_kind(&self) -> Result<PreprocessorKind> {
        match &self.preprocessor.name {
            Some(name) => PreprocessorKind::from_name(name),
            None => PreprocessorKind::default_for_model(&self.model.name),
        }
    }
}

// ============================================================================
// SERVER
// ============================================================================

/// Where the serving process gets its merged table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSource {
    /// Run the pipeline over the CSV sources at startup
    Csv(SourcePaths),
    /// Load the table materialized by `build --sqlite`
    Sqlite(PathBuf),
}

impl Default for FeatureSource {
    fn default() -> Self {
        FeatureSource::Csv(SourcePaths::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory holding the training manifest and artifacts
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    /// `csv: {..}` or `sqlite: path`
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub features: FeatureSource,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_host(),
            port: default_port(),
            artifacts_dir: default_artifacts_dir(),
            features: FeatureSource::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        parse_yaml(yaml, "server")
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_yaml_str(&read_config_file(path)?)
    }

    /// Apply PROPENSITY_HOST / PROPENSITY_PORT from the environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(std::env::var(HOST_ENV).ok(), std::env::var(PORT_ENV).ok())
    }

    pub fn with_overrides(mut self, host: Option<String>, port: Option<String>) -> Result<Self> {
        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port.trim().parse().map_err(|_| {
                PipelineError::configuration(format!("{} is not a valid port: '{}'", PORT_ENV, port))
            })?;
        }
        Ok(self)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
