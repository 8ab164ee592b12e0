// 🎯 Training & evaluation workflow
//
// build table → seeded split → fit preprocessor on the training rows →
// train model → evaluate on held-out rows → persist model, preprocessor and
// manifest under `artifacts_dir`.

use crate::artifact::{read_json, write_json};
use crate::config::TrainingConfig;
use crate::error::{PipelineError, Result};
use crate::models::{load_model, model_for, Metrics, PredictOptions, TrainOptions, TrainSummary};
use crate::pipeline::{run_pipeline, MergeReport};
use crate::preprocess::{load_preprocessor, preprocessor_for};
use crate::table::FeatureTable;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const MANIFEST_FILE: &str = "manifest.json";

// ============================================================================
// SPLIT
// ============================================================================

/// Row positions of a train/validation split
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Shuffle `0..n` with `seed` and hold out `ceil(n * fraction)` rows.
/// Both sides always get at least one row.
pub fn split_indices(n: usize, fraction: f64, seed: u64) -> Result<Split> {
    if n < 2 {
        return Err(PipelineError::data_integrity(format!(
            "need at least 2 entities to split, got {}",
            n
        )));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let held_out = ((n as f64 * fraction).ceil() as usize).clamp(1, n - 1);
    let validation = order.split_off(n - held_out);
    Ok(Split {
        train: order,
        validation,
    })
}

fn select_labels(labels: &[usize], positions: &[usize]) -> Vec<usize> {
    positions.iter().map(|&p| labels[p]).collect()
}

// ============================================================================
// MANIFEST
// ============================================================================

/// Record of one training run, written next to its artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingManifest {
    pub run_id: String,
    pub trained_at: DateTime<Utc>,
    /// Canonical registry keys
    pub model: String,
    pub preprocessor: String,
    /// File names relative to the artifacts directory
    pub model_file: PathBuf,
    pub preprocessor_file: PathBuf,
    pub feature_columns: Vec<String>,
    pub schema_fingerprint: String,
    pub seed: u64,
    pub validation_fraction: f64,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub training: TrainSummary,
    pub metrics: Metrics,
}

impl TrainingManifest {
    pub fn path(artifacts_dir: &Path) -> PathBuf {
        artifacts_dir.join(MANIFEST_FILE)
    }

    pub fn read(artifacts_dir: &Path) -> Result<Self> {
        read_json(&Self::path(artifacts_dir))
    }

    pub fn write(&self, artifacts_dir: &Path) -> Result<PathBuf> {
        let path = Self::path(artifacts_dir);
        write_json(&path, self)?;
        Ok(path)
    }

    pub fn model_path(&self, artifacts_dir: &Path) -> PathBuf {
        artifacts_dir.join(&self.model_file)
    }

    pub fn preprocessor_path(&self, artifacts_dir: &Path) -> PathBuf {
        artifacts_dir.join(&self.preprocessor_file)
    }
}

// ============================================================================
// WORKFLOWS
// ============================================================================

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub manifest: TrainingManifest,
    pub manifest_path: PathBuf,
    pub report: MergeReport,
}

#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub manifest: TrainingManifest,
    pub metrics: Metrics,
}

/// Labels plus held-out positions for a table
struct Prepared {
    labels: Vec<usize>,
    split: Split,
}

fn prepare(table: &FeatureTable, fraction: f64, seed: u64) -> Result<Prepared> {
    let labels = table.labels()?;
    let split = split_indices(table.len(), fraction, seed)?;
    Ok(Prepared { labels, split })
}

/// Train on the configured sources and persist the artifacts
pub fn run_training(config: &TrainingConfig) -> Result<TrainingOutcome> {
    config.validate()?;
    let output = run_pipeline(&config.data)?;
    train_on_table(config, &output.table, output.report)
}

/// Train on an already-built table
pub fn train_on_table(
    config: &TrainingConfig,
    table: &FeatureTable,
    report: MergeReport,
) -> Result<TrainingOutcome> {
    let Prepared { labels, split } = prepare(table, config.validation_fraction, config.seed)?;

    let frame = table.full_feature_frame()?;
    let train_frame = frame.select_rows(&split.train)?;
    let val_frame = frame.select_rows(&split.validation)?;
    let y_train = select_labels(&labels, &split.train);
    let y_val = select_labels(&labels, &split.validation);

    let mut preprocessor = preprocessor_for(
        config.preprocessor.name.as_deref(),
        &config.model.name,
        &config.preprocessor.params,
    )?;
    let x_train: Array2<f32> = preprocessor.preprocess(&train_frame)?;
    let x_val = preprocessor.transform(&val_frame)?;

    let mut model = model_for(&config.model.name, &config.model.params)?;
    info!(
        model = model.kind().name(),
        preprocessor = preprocessor.kind().name(),
        train_rows = split.train.len(),
        validation_rows = split.validation.len(),
        features = x_train.ncols(),
        "training"
    );
    let training = model.train(
        &x_train,
        &y_train,
        Some((&x_val, &y_val)),
        &TrainOptions::default(),
    )?;
    let metrics = model.evaluate(&x_val, &y_val, &PredictOptions::default())?;
    info!("validation metrics: {}", metrics.summary());

    let model_file = PathBuf::from(format!("{}_model.json", model.kind().name()));
    let preprocessor_file = PathBuf::from(format!("{}_preprocessor.json", preprocessor.kind().name()));
    model.save(&config.artifacts_dir.join(&model_file))?;
    preprocessor.save(&config.artifacts_dir.join(&preprocessor_file))?;

    let manifest = TrainingManifest {
        run_id: report.run_id.clone(),
        trained_at: Utc::now(),
        model: model.kind().name().to_string(),
        preprocessor: preprocessor.kind().name().to_string(),
        model_file,
        preprocessor_file,
        feature_columns: table.feature_columns(),
        schema_fingerprint: table.schema_fingerprint(),
        seed: config.seed,
        validation_fraction: config.validation_fraction,
        train_rows: split.train.len(),
        validation_rows: split.validation.len(),
        training,
        metrics,
    };
    let manifest_path = manifest.write(&config.artifacts_dir)?;
    info!(path = %manifest_path.display(), "wrote training manifest");

    Ok(TrainingOutcome {
        manifest,
        manifest_path,
        report,
    })
}

/// Reload persisted artifacts and score them on the same held-out rows
pub fn run_evaluation(config: &TrainingConfig) -> Result<EvaluationOutcome> {
    let output = run_pipeline(&config.data)?;
    evaluate_on_table(&config.artifacts_dir, &output.table)
}

pub fn evaluate_on_table(artifacts_dir: &Path, table: &FeatureTable) -> Result<EvaluationOutcome> {
    let manifest = TrainingManifest::read(artifacts_dir)?;
    if manifest.schema_fingerprint != table.schema_fingerprint() {
        return Err(PipelineError::data_integrity(format!(
            "feature schema changed since training (trained on {}, table has {})",
            manifest.schema_fingerprint,
            table.schema_fingerprint()
        )));
    }

    let model = load_model(&manifest.model_path(artifacts_dir))?;
    let preprocessor = load_preprocessor(&manifest.preprocessor_path(artifacts_dir))?;

    let Prepared { labels, split } = prepare(table, manifest.validation_fraction, manifest.seed)?;
    let val_frame = table.full_feature_frame()?.select_rows(&split.validation)?;
    let x_val = preprocessor.transform(&val_frame)?;
    let y_val = select_labels(&labels, &split.validation);

    let metrics = model.evaluate(&x_val, &y_val, &PredictOptions::default())?;
    info!("evaluation metrics: {}", metrics.summary());

    Ok(EvaluationOutcome { manifest, metrics })
}

// ============================================================================
// TESTS
// ============================================================================
