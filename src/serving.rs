// 🚀 Prediction service
//
// Holds the feature store, the fitted preprocessor and the trained model, all
// immutable after `initialize`. A dependency that fails to load is recorded
// instead of aborting startup: the process still serves /health, and every
// prediction reports the failed dependency.

use crate::config::{FeatureSource, ServerConfig};
use crate::error::{PipelineError, Result};
use crate::feature_store::{FeatureStore, Lookup};
use crate::frame::ColumnData;
use crate::models::{argmax_rows, load_model, Model};
use crate::pipeline::run_pipeline;
use crate::preprocess::{load_preprocessor, Preprocessor};
use crate::snapshot::{load_feature_table, open_snapshot};
use crate::train::TrainingManifest;
use serde::Serialize;
use std::path::Path;
use tracing::{error, info};

// ============================================================================
// DEPENDENCIES
// ============================================================================

/// A loaded dependency, or the reason it failed to load
#[derive(Debug)]
pub enum Dependency<T> {
    Ready(T),
    Failed(String),
}

impl<T> Dependency<T> {
    pub fn from_result(name: &str, result: Result<T>) -> Self {
        match result {
            Ok(value) => Dependency::Ready(value),
            Err(e) => {
                error!(dependency = name, error = %e, "dependency failed to load");
                Dependency::Failed(e.to_string())
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Dependency::Ready(_))
    }

    /// The loaded value, or an Unavailable error naming the dependency
    pub fn get(&self, name: &str) -> Result<&T> {
        match self {
            Dependency::Ready(value) => Ok(value),
            Dependency::Failed(reason) => Err(PipelineError::Unavailable(format!(
                "{} failed to load: {}",
                name, reason
            ))),
        }
    }
}

/// Model, preprocessor and the manifest that produced them
pub struct ModelBundle {
    pub manifest: Option<TrainingManifest>,
    pub model: Box<dyn Model>,
    pub preprocessor: Box<dyn Preprocessor>,
}

impl std::fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBundle")
            .field("model", &self.model.kind())
            .field("preprocessor", &self.preprocessor.kind())
            .field("input_dim", &self.model.input_dim())
            .finish()
    }
}

impl ModelBundle {
    pub fn new(model: Box<dyn Model>, preprocessor: Box<dyn Preprocessor>) -> Result<Self> {
        if !model.is_trained() {
            return Err(PipelineError::configuration(format!(
                "{} model is not trained",
                model.kind().name()
            )));
        }
        if !preprocessor.is_fitted() {
            return Err(PipelineError::configuration(format!(
                "{} preprocessor is not fitted",
                preprocessor.kind().name()
            )));
        }
        Ok(ModelBundle {
            manifest: None,
            model,
            preprocessor,
        })
    }

    /// Load the artifacts a training manifest points at
    pub fn load(artifacts_dir: &Path) -> Result<Self> {
        let manifest = TrainingManifest::read(artifacts_dir)?;
        let model = load_model(&manifest.model_path(artifacts_dir))?;
        let preprocessor = load_preprocessor(&manifest.preprocessor_path(artifacts_dir))?;

        let mut bundle = Self::new(model, preprocessor)?;
        bundle.manifest = Some(manifest);
        Ok(bundle)
    }

    /// Fail when the serving table lacks a column the preprocessor was fitted on
    pub fn check_schema(&self, store: &FeatureStore) -> Result<()> {
        let available = store.feature_columns();
        let missing: Vec<String> = self
            .preprocessor
            .required_features()
            .into_iter()
            .filter(|c| !available.contains(c))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::data_integrity(format!(
                "feature table lacks columns the model was trained on: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Build the feature store from the configured source
pub fn load_feature_store(source: &FeatureSource) -> Result<FeatureStore> {
    let table = match source {
        FeatureSource::Csv(paths) => run_pipeline(paths)?.table,
        FeatureSource::Sqlite(path) => {
            if !path.exists() {
                return Err(PipelineError::data_integrity(format!(
                    "snapshot {} does not exist",
                    path.display()
                )));
            }
            load_feature_table(&open_snapshot(path)?)?
        }
    };
    Ok(FeatureStore::new(table))
}

// ============================================================================
// HEALTH
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyHealth {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub ready: bool,
    pub feature_table: DependencyHealth,
    pub model: DependencyHealth,
}

// ============================================================================
// SERVICE
// ============================================================================

/// Class predictions for the matched ids, in request order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub ids: Vec<i64>,
    pub predictions: Vec<usize>,
    pub unknown: Vec<i64>,
}

#[derive(Debug)]
pub struct PredictionService {
    features: Dependency<FeatureStore>,
    model: Dependency<ModelBundle>,
}

impl PredictionService {
    pub fn new(features: Result<FeatureStore>, model: Result<ModelBundle>) -> Self {
        // a model fitted on another schema can never answer for this table
        let model = match (&features, model) {
            (Ok(store), Ok(bundle)) => bundle.check_schema(store).map(|_| bundle),
            (_, model) => model,
        };

        let service = PredictionService {
            features: Dependency::from_result("feature table", features),
            model: Dependency::from_result("model", model),
        };
        info!(ready = service.is_ready(), "prediction service initialized");
        service
    }

    /// Load every dependency once; failures are recorded, never fatal
    pub fn initialize(config: &ServerConfig) -> Self {
        let features = load_feature_store(&config.features);
        let model = ModelBundle::load(&config.artifacts_dir);
        Self::new(features, model)
    }

    pub fn is_ready(&self) -> bool {
        self.features.is_ready() && self.model.is_ready()
    }

    pub fn health(&self) -> HealthReport {
        let feature_table = match &self.features {
            Dependency::Ready(store) => DependencyHealth {
                ready: true,
                detail: None,
                entities: Some(store.len()),
                variant: None,
            },
            Dependency::Failed(reason) => DependencyHealth {
                ready: false,
                detail: Some(reason.clone()),
                entities: None,
                variant: None,
            },
        };
        let model = match &self.model {
            Dependency::Ready(bundle) => DependencyHealth {
                ready: true,
                detail: None,
                entities: None,
                variant: Some(bundle.model.kind().name().to_string()),
            },
            Dependency::Failed(reason) => DependencyHealth {
                ready: false,
                detail: Some(reason.clone()),
                entities: None,
                variant: None,
            },
        };

        HealthReport {
            status: "ok",
            ready: self.is_ready(),
            feature_table,
            model,
        }
    }

    /// ids → feature rows → finite check → preprocessor (apply only) → model → arg-max
    pub fn predict(&self, ids: &[i64]) -> Result<Prediction> {
        let store = self.features.get("feature table")?;
        let bundle = self.model.get("model")?;

        let lookup = store.lookup(ids)?;
        check_finite(&lookup)?;

        let x = bundle.preprocessor.transform(&lookup.frame)?;
        let probs = bundle.model.predict_proba(&x).map_err(|e| match e {
            PipelineError::Validation(_) => e,
            other => PipelineError::inference(other.to_string()),
        })?;

        let predictions = argmax_rows(&probs);
        if predictions.len() != lookup.ids.len() {
            return Err(PipelineError::inference(format!(
                "model returned {} predictions for {} rows",
                predictions.len(),
                lookup.ids.len()
            )));
        }

        Ok(Prediction {
            ids: lookup.ids,
            predictions,
            unknown: lookup.unknown,
        })
    }
}

/// Every value must be present and survive the cast to f32 as a finite number.
/// A missing cell counts as NaN.
fn check_finite(lookup: &Lookup) -> Result<()> {
    for column in lookup.frame.columns() {
        let ColumnData::Numeric(values) = &column.data else {
            continue;
        };
        for (id, value) in lookup.ids.iter().zip(values) {
            match value {
                None => {
                    return Err(PipelineError::validation(format!(
                        "id {} has a missing (NaN) value in column '{}'",
                        id, column.name
                    )))
                }
                Some(v) if !(*v as f32).is_finite() => {
                    return Err(PipelineError::validation(format!(
                        "id {} has non-finite value {} in column '{}'",
                        id, v, column.name
                    )))
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{model_for, TrainOptions};
    use crate::preprocess::{build_preprocessor, PreprocessorKind};
    use crate::table::{FeatureRow, FeatureTable, LABEL_COLUMN};
    use serde_json::Value;

    /// Model that must never be reached
    struct Unreachable;

    impl Model for Unreachable {
        fn kind(&self) -> crate::models::ModelKind {
            crate::models::ModelKind::LogisticRegression
        }
        fn input_dim(&self) -> Option<usize> {
            Some(2)
        }
        fn train(
            &mut self,
            _: &ndarray::Array2<f32>,
            _: &[usize],
            _: Option<(&ndarray::Array2<f32>, &[usize])>,
            _: &TrainOptions,
        ) -> Result<crate::models::TrainSummary> {
            unreachable!()
        }
        fn predict_proba(&self, _: &ndarray::Array2<f32>) -> Result<ndarray::Array2<f32>> {
            panic!("model invoked")
        }
        fn save(&self, _: &Path) -> Result<()> {
            Ok(())
        }
        fn load(&mut self, _: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn store() -> FeatureStore {
        let table = FeatureTable::new(
            vec!["clicks".into(), "MRR".into(), LABEL_COLUMN.into()],
            vec![
                FeatureRow { id: 1, values: vec![Some(40.0), Some(100.0), Some(1.0)] },
                FeatureRow { id: 2, values: vec![Some(1.0), Some(0.0), Some(0.0)] },
                FeatureRow { id: 3, values: vec![Some(42.0), Some(90.0), Some(1.0)] },
                FeatureRow { id: 4, values: vec![Some(2.0), Some(0.0), Some(0.0)] },
                FeatureRow { id: 5, values: vec![Some(f64::INFINITY), Some(0.0), Some(0.0)] },
                FeatureRow { id: 6, values: vec![Some(3.0), None, Some(0.0)] },
            ],
        )
        .unwrap();
        FeatureStore::new(table)
    }

    fn trained_bundle(store: &FeatureStore) -> ModelBundle {
        let frame = store.table().feature_frame(&[0, 1, 2, 3]).unwrap();
        let mut preprocessor = build_preprocessor(PreprocessorKind::Numeric, &Value::Null).unwrap();
        let x = preprocessor.preprocess(&frame).unwrap();

        let mut model = model_for("logistic_regression", &Value::Null).unwrap();
        model.train(&x, &[1, 0, 1, 0], None, &TrainOptions::default()).unwrap();
        ModelBundle::new(model, preprocessor).unwrap()
    }

    fn service() -> PredictionService {
        let store = store();
        let bundle = trained_bundle(&store);
        PredictionService::new(Ok(store), Ok(bundle))
    }

    #[test]
    fn test_predict_in_request_order() {
        let prediction = service().predict(&[2, 1, 999, 2]).unwrap();
        assert_eq!(prediction.ids, vec![2, 1]);
        assert_eq!(prediction.predictions, vec![0, 1]);
        assert_eq!(prediction.unknown, vec![999]);
    }

    #[test]
    fn test_unknown_ids_are_a_client_error() {
        let err = service().predict(&[999]).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_infinite_value_rejected_before_model() {
        let store = store();
        let mut bundle = trained_bundle(&store);
        bundle.model = Box::new(Unreachable);
        let service = PredictionService::new(Ok(store), Ok(bundle));

        let err = service.predict(&[5]).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(err.to_string().contains("non-finite"));
    }

    #[test]
    fn test_missing_value_rejects_whole_batch_before_model() {
        let store = store();
        let mut bundle = trained_bundle(&store);
        bundle.model = Box::new(Unreachable);
        let service = PredictionService::new(Ok(store), Ok(bundle));

        let err = service.predict(&[1, 6]).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(err.to_string().contains("id 6 has a missing (NaN) value in column 'MRR'"));
    }

    #[test]
    fn test_failed_dependency_reports_unavailable() {
        let service = PredictionService::new(
            Ok(store()),
            Err(PipelineError::configuration("manifest missing")),
        );
        assert!(!service.is_ready());

        let err = service.predict(&[1]).unwrap_err();
        assert!(matches!(err, PipelineError::Unavailable(_)));
        assert!(err.to_string().contains("model"));

        let health = service.health();
        assert_eq!(health.status, "ok");
        assert!(!health.ready);
        assert!(health.feature_table.ready);
        assert_eq!(health.feature_table.entities, Some(6));
        assert!(!health.model.ready);
    }

    #[test]
    fn test_schema_mismatch_marks_model_unavailable() {
        let store = store();
        let bundle = trained_bundle(&store);

        let other = FeatureStore::new(
            FeatureTable::new(
                vec!["logins".into(), LABEL_COLUMN.into()],
                vec![FeatureRow { id: 1, values: vec![Some(1.0), Some(1.0)] }],
            )
            .unwrap(),
        );
        let service = PredictionService::new(Ok(other), Ok(bundle));
        assert!(!service.is_ready());
        assert!(matches!(
            service.predict(&[1]).unwrap_err(),
            PipelineError::Unavailable(_)
        ));
    }

    #[test]
    fn test_missing_snapshot_is_reported() {
        let err = load_feature_store(&FeatureSource::Sqlite("/nonexistent/snapshot.db".into()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)));
    }
}
