// 🧠 Model Framework
// Interchangeable binary classifiers behind one trait, constructed through a
// name-keyed registry. Inputs are f32 matrices produced by a preprocessor.

pub mod logistic;
pub mod metrics;
pub mod neural;

pub use logistic::{LogisticParams, LogisticRegression, LogisticState};
pub use metrics::Metrics;
pub use neural::{NeuralNetwork, NeuralParams, NeuralState};

use crate::artifact::read_json;
use crate::error::{PipelineError, Result};
use crate::preprocess::PreprocessorKind;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Every variant is a two-class classifier
pub const NUM_CLASSES: usize = 2;

// ============================================================================
// CORE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    NeuralNetwork,
    LogisticRegression,
}

impl ModelKind {
    /// Registry keys, aliases included
    pub const KEYS: [(&'static str, ModelKind); 3] = [
        ("neural_network", ModelKind::NeuralNetwork),
        ("tensorflow", ModelKind::NeuralNetwork),
        ("logistic_regression", ModelKind::LogisticRegression),
    ];

    /// Canonical registry key
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::NeuralNetwork => "neural_network",
            ModelKind::LogisticRegression => "logistic_regression",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::KEYS
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::KEYS.iter().map(|(key, _)| *key).collect();
                PipelineError::configuration(format!(
                    "unknown model '{}' (known: {})",
                    name,
                    known.join(", ")
                ))
            })
    }

    pub fn default_preprocessor(&self) -> PreprocessorKind {
        match self {
            ModelKind::NeuralNetwork | ModelKind::LogisticRegression => PreprocessorKind::Numeric,
        }
    }
}

/// Per-call overrides for training
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainOptions {
    pub epochs: Option<usize>,
    pub batch_size: Option<usize>,
}

/// Per-call options for prediction and evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictOptions {
    /// Rows per forward pass; whole input when unset
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainSummary {
    pub epochs_run: usize,
    pub final_loss: f64,
    pub validation_loss: Option<f64>,
}

/// Persisted model state, tagged with its variant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum ModelArtifact {
    NeuralNetwork(NeuralState),
    LogisticRegression(LogisticState),
}

impl ModelArtifact {
    pub fn kind(&self) -> ModelKind {
        match self {
            ModelArtifact::NeuralNetwork(_) => ModelKind::NeuralNetwork,
            ModelArtifact::LogisticRegression(_) => ModelKind::LogisticRegression,
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

// ============================================================================
// TRAIT
// ============================================================================

/// Model - train / evaluate / predict / persist
pub trait Model: Send + Sync {
    fn kind(&self) -> ModelKind;

    /// Feature count the trained parameters expect
    fn input_dim(&self) -> Option<usize>;

    fn is_trained(&self) -> bool {
        self.input_dim().is_some()
    }

    fn train(
        &mut self,
        features: &Array2<f32>,
        labels: &[usize],
        validation: Option<(&Array2<f32>, &[usize])>,
        options: &TrainOptions,
    ) -> Result<TrainSummary>;

    /// Class probabilities, shape (n, NUM_CLASSES)
    fn predict_proba(&self, features: &Array2<f32>) -> Result<Array2<f32>>;

    /// Arg-max class per row
    fn predict(&self, features: &Array2<f32>, options: &PredictOptions) -> Result<Vec<usize>> {
        let batch = options.batch_size.unwrap_or(features.nrows()).max(1);
        let mut classes = Vec::with_capacity(features.nrows());
        for chunk in features.axis_chunks_iter(Axis(0), batch) {
            let probs = self.predict_proba(&chunk.to_owned())?;
            classes.extend(argmax_rows(&probs));
        }
        Ok(classes)
    }

    fn evaluate(
        &self,
        features: &Array2<f32>,
        labels: &[usize],
        options: &PredictOptions,
    ) -> Result<Metrics> {
        if features.nrows() != labels.len() {
            return Err(PipelineError::validation(format!(
                "{} feature rows but {} labels",
                features.nrows(),
                labels.len()
            )));
        }
        let predicted = self.predict(features, options)?;
        Ok(Metrics::compute(&predicted, labels))
    }

    fn save(&self, path: &Path) -> Result<()>;

    /// Replace this instance's parameters with the artifact at `path`
    fn load(&mut self, path: &Path) -> Result<()>;
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Factory: one concrete type per registry key
pub fn build_model(kind: ModelKind, params: &Value) -> Result<Box<dyn Model>> {
    Ok(match kind {
        ModelKind::NeuralNetwork => Box::new(NeuralNetwork::from_params(params)?),
        ModelKind::LogisticRegression => Box::new(LogisticRegression::from_params(params)?),
    })
}

/// Build a model by registry key
pub fn model_for(name: &str, params: &Value) -> Result<Box<dyn Model>> {
    build_model(ModelKind::from_name(name)?, params)
}

/// Reconstitute whichever variant the artifact holds
pub fn load_model(path: &Path) -> Result<Box<dyn Model>> {
    let kind = ModelArtifact::read(path)?.kind();
    let mut model = build_model(kind, &Value::Null)?;
    model.load(path)?;
    Ok(model)
}

// ============================================================================
// SHARED HELPERS
// ============================================================================

/// Index of the largest value per row; ties go to the lower class
pub fn argmax_rows(probs: &Array2<f32>) -> Vec<usize> {
    probs
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &p)| {
                    if p > best.1 {
                        (i, p)
                    } else {
                        best
                    }
                })
                .0
        })
        .collect()
}

/// Shape, label range and finiteness checks before fitting
pub(crate) fn check_training_inputs(features: &Array2<f32>, labels: &[usize]) -> Result<()> {
    if features.nrows() == 0 {
        return Err(PipelineError::validation("cannot train on zero rows"));
    }
    if features.nrows() != labels.len() {
        return Err(PipelineError::validation(format!(
            "{} feature rows but {} labels",
            features.nrows(),
            labels.len()
        )));
    }
    if let Some(bad) = labels.iter().find(|&&l| l >= NUM_CLASSES) {
        return Err(PipelineError::validation(format!("label {} is not 0 or 1", bad)));
    }
    if features.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::validation("training features contain NaN or infinite values"));
    }
    Ok(())
}

/// Validation rows must match the training width
pub(crate) fn check_same_width(train: &Array2<f32>, validation: &Array2<f32>) -> Result<()> {
    if train.ncols() != validation.ncols() {
        return Err(PipelineError::validation(format!(
            "validation has {} features, training has {}",
            validation.ncols(),
            train.ncols()
        )));
    }
    Ok(())
}

/// Reject input the trained parameters cannot consume
pub(crate) fn check_inference_input(
    kind: ModelKind,
    input_dim: Option<usize>,
    features: &Array2<f32>,
) -> Result<()> {
    let Some(expected) = input_dim else {
        return Err(PipelineError::inference(format!("{} model is not trained", kind.name())));
    };
    if features.ncols() != expected {
        return Err(PipelineError::inference(format!(
            "{} model expects {} features, got {}",
            kind.name(),
            expected,
            features.ncols()
        )));
    }
    if features.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::validation("features contain NaN or infinite values"));
    }
    Ok(())
}

/// Error for an artifact holding a different variant than the loader
pub(crate) fn variant_mismatch(path: &Path, found: ModelKind, expected: ModelKind) -> PipelineError {
    PipelineError::configuration(format!(
        "model artifact {} holds '{}', expected '{}'",
        path.display(),
        found.name(),
        expected.name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    #[test]
    fn test_registry_keys() {
        assert_eq!(ModelKind::from_name("tensorflow").unwrap(), ModelKind::NeuralNetwork);
        assert_eq!(ModelKind::from_name("neural_network").unwrap(), ModelKind::NeuralNetwork);
        assert_eq!(
            ModelKind::from_name("logistic_regression").unwrap(),
            ModelKind::LogisticRegression
        );

        let err = model_for("random_forest", &Value::Null).err().unwrap();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(err.to_string().contains("'random_forest'"));
    }

    #[test]
    fn test_argmax_ties_go_low() {
        let probs = array![[0.2, 0.8], [0.5, 0.5], [0.9, 0.1]];
        assert_eq!(argmax_rows(&probs), vec![1, 0, 0]);
    }

    #[test]
    fn test_untrained_model_is_an_inference_error() {
        let model = model_for("logistic_regression", &Value::Null).unwrap();
        let err = model.predict(&array![[1.0f32]], &PredictOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Inference(_)));
    }

    #[test]
    fn test_load_model_dispatches_on_variant() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");

        let x = array![[-2.0f32], [-1.0], [1.0], [2.0]];
        let y = [0, 0, 1, 1];
        let mut model = model_for("logistic_regression", &Value::Null).unwrap();
        model.train(&x, &y, None, &TrainOptions::default()).unwrap();
        model.save(&path).unwrap();

        let loaded = load_model(&path).unwrap();
        assert_eq!(loaded.kind(), ModelKind::LogisticRegression);
        assert_eq!(loaded.input_dim(), Some(1));

        let mut wrong = model_for("tensorflow", &Value::Null).unwrap();
        assert!(matches!(
            wrong.load(&path).unwrap_err(),
            PipelineError::Configuration(_)
        ));
    }
}
