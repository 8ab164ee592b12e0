// Customer Propensity - Core Library
// Feature-merge pipeline, model registry and prediction service, shared by the
// CLI, the API server and the tests

pub mod error;
pub mod artifact;
pub mod loader;         // Record Loader - three CSV sources
pub mod normalize;      // Per-Source Normalizer
pub mod join;           // Temporal Join & Labeling
pub mod encoding;       // Categorical Encoder
pub mod aggregate;      // Aggregator
pub mod table;          // Merged feature table
pub mod frame;
pub mod pipeline;       // Stage orchestration + MergeReport
pub mod feature_store;  // Id-indexed view for serving
pub mod preprocess;     // Preprocessor registry
pub mod models;         // Model registry
pub mod config;
pub mod train;          // Training & evaluation workflow
pub mod snapshot;       // SQLite snapshot of the merged table
pub mod serving;        // Prediction service

#[cfg(feature = "server")]
pub mod api;
#[cfg(feature = "server")]
pub mod metrics;        // Prometheus counters for the API

// Re-export commonly used types
pub use error::{ErrorClass, PipelineError, Result};
pub use loader::{load_sources, load_table, RawSourceTable, RawSources, SourceKind, SourcePaths};
pub use normalize::{EntityTable, EventTable, Population, UNKNOWN_CATEGORY};
pub use join::{JoinStats, JoinedTable, TemporalFilter};
pub use encoding::{encode, CategoricalEncoding, CategoricalField};
pub use aggregate::aggregate;
pub use table::{fingerprint, FeatureRow, FeatureTable, ID_COLUMN, LABEL_COLUMN, MRR_COLUMN};
pub use frame::{ColumnData, Frame};
pub use pipeline::{build_feature_table, run_pipeline, MergeReport, PipelineOutput};
pub use feature_store::{FeatureStore, Lookup};
pub use preprocess::{
    build_preprocessor, load_preprocessor, preprocessor_for, Preprocessor, PreprocessorKind,
};
pub use models::{
    build_model, load_model, model_for, Metrics, Model, ModelKind, PredictOptions, TrainOptions,
};
pub use config::{FeatureSource, ServerConfig, TrainingConfig};
pub use train::{run_evaluation, run_training, TrainingManifest, TrainingOutcome};
pub use snapshot::{latest_run, load_feature_table, open_snapshot, save_feature_table};
pub use serving::{HealthReport, ModelBundle, Prediction, PredictionService};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the fmt subscriber; RUST_LOG overrides the default filter
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("customer_propensity=info,propensity_server=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
