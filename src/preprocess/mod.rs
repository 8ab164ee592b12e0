// 🔧 Preprocessor Framework
// Turns a Frame into the f32 matrix a model consumes. Fitted state is created
// during training, persisted next to the model and applied unchanged at
// serving time.

pub mod numeric;
pub mod text;

pub use numeric::{NumericParams, NumericPreprocessor, NumericState, MISSING_SENTINEL};
pub use text::{TextParams, TextPreprocessor, TextState, TEXT_COLUMN};

use crate::artifact::read_json;
use crate::error::{PipelineError, Result};
use crate::frame::Frame;
use crate::models::ModelKind;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

// ============================================================================
// CORE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessorKind {
    Numeric,
    Text,
}

impl PreprocessorKind {
    pub const ALL: [PreprocessorKind; 2] = [PreprocessorKind::Numeric, PreprocessorKind::Text];

    /// Registry key
    pub fn name(&self) -> &'static str {
        match self {
            PreprocessorKind::Numeric => "numeric",
            PreprocessorKind::Text => "text",
        }
    }

    /// Look up a registry key; unknown keys are a configuration error
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|k| k.name()).collect();
                PipelineError::configuration(format!(
                    "unknown preprocessor '{}' (known: {})",
                    name,
                    known.join(", ")
                ))
            })
    }

    /// Preprocessor used when the configuration names only a model
    pub fn default_for_model(model_name: &str) -> Result<Self> {
        Ok(ModelKind::from_name(model_name)?.default_preprocessor())
    }
}

/// Persisted preprocessor state, tagged with its variant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum PreprocessorArtifact {
    Numeric(NumericState),
    Text(TextState),
}

impl PreprocessorArtifact {
    pub fn kind(&self) -> PreprocessorKind {
        match self {
            PreprocessorArtifact::Numeric(_) => PreprocessorKind::Numeric,
            PreprocessorArtifact::Text(_) => PreprocessorKind::Text,
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

// ============================================================================
// TRAIT
// ============================================================================

/// Preprocessor - fit/apply contract shared by every variant
pub trait Preprocessor: Send + Sync {
    fn kind(&self) -> PreprocessorKind;

    /// Learn state from `frame` and record its schema
    fn fit(&mut self, frame: &Frame) -> Result<()>;

    /// Apply fitted state only; a frame lacking a fitted column is rejected
    fn transform(&self, frame: &Frame) -> Result<Array2<f32>>;

    /// Fit then transform the same frame
    fn preprocess(&mut self, frame: &Frame) -> Result<Array2<f32>> {
        self.fit(frame)?;
        self.transform(frame)
    }

    /// Columns the fitted state expects; empty before `fit`
    fn required_features(&self) -> Vec<String>;

    /// Width of the matrix `transform` produces, once fitted
    fn output_dim(&self) -> Option<usize>;

    fn is_fitted(&self) -> bool {
        !self.required_features().is_empty()
    }

    fn save(&self, path: &Path) -> Result<()>;

    /// Replace this instance's state with the artifact at `path`
    fn load(&mut self, path: &Path) -> Result<()>;
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Factory: one concrete type per registry key
pub fn build_preprocessor(kind: PreprocessorKind, params: &Value) -> Result<Box<dyn Preprocessor>> {
    Ok(match kind {
        PreprocessorKind::Numeric => Box::new(NumericPreprocessor::from_params(params)?),
        PreprocessorKind::Text => Box::new(TextPreprocessor::from_params(params)?),
    })
}

/// Build the preprocessor named in a configuration, or the model's default
pub fn preprocessor_for(
    name: Option<&str>,
    model_name: &str,
    params: &Value,
) -> Result<Box<dyn Preprocessor>> {
    let kind = match name {
        Some(name) => PreprocessorKind::from_name(name)?,
        None => PreprocessorKind::default_for_model(model_name)?,
    };
    build_preprocessor(kind, params)
}

/// Reconstitute whichever variant the artifact holds
pub fn load_preprocessor(path: &Path) -> Result<Box<dyn Preprocessor>> {
    let kind = PreprocessorArtifact::read(path)?.kind();
    let mut preprocessor = build_preprocessor(kind, &Value::Null)?;
    preprocessor.load(path)?;
    Ok(preprocessor)
}

/// Error for an artifact holding a different variant than the loader
pub(crate) fn variant_mismatch(path: &Path, found: PreprocessorKind, expected: PreprocessorKind) -> PipelineError {
    PipelineError::configuration(format!(
        "preprocessor artifact {} holds '{}', expected '{}'",
        path.display(),
        found.name(),
        expected.name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_registry_lookup() {
        assert_eq!(PreprocessorKind::from_name("numeric").unwrap(), PreprocessorKind::Numeric);
        assert_eq!(PreprocessorKind::from_name("text").unwrap(), PreprocessorKind::Text);

        let err = PreprocessorKind::from_name("huggingface").unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(err.to_string().contains("'huggingface'"));
    }

    #[test]
    fn test_default_preprocessor_follows_model() {
        for model in ["logistic_regression", "neural_network", "tensorflow"] {
            assert_eq!(
                PreprocessorKind::default_for_model(model).unwrap(),
                PreprocessorKind::Numeric
            );
        }
        assert!(PreprocessorKind::default_for_model("xgboost").is_err());

        let explicit = preprocessor_for(Some("text"), "tensorflow", &json!({"max_length": 4})).unwrap();
        assert_eq!(explicit.kind(), PreprocessorKind::Text);
    }

    #[test]
    fn test_load_dispatches_on_variant() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("preprocessor.json");

        let frame = Frame::new()
            .with_numeric("a", vec![Some(1.0), Some(3.0)])
            .unwrap();
        let mut numeric = build_preprocessor(PreprocessorKind::Numeric, &Value::Null).unwrap();
        numeric.fit(&frame).unwrap();
        numeric.save(&path).unwrap();

        let loaded = load_preprocessor(&path).unwrap();
        assert_eq!(loaded.kind(), PreprocessorKind::Numeric);
        assert_eq!(loaded.required_features(), vec!["a".to_string()]);

        let mut text = build_preprocessor(PreprocessorKind::Text, &Value::Null).unwrap();
        let err = text.load(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
