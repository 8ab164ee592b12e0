use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use customer_propensity::{
    init_tracing, open_snapshot, run_evaluation, run_pipeline, run_training, save_feature_table,
    SourcePaths, TrainingConfig,
};
use std::path::{Path, PathBuf};

/// Customer propensity: build the merged feature table, train and evaluate models
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the feature-merge pipeline and report row counts
    Build {
        #[arg(long, default_value = "data/customers.csv")]
        customers: PathBuf,

        #[arg(long, default_value = "data/noncustomers.csv")]
        noncustomers: PathBuf,

        #[arg(long, default_value = "data/actions.csv")]
        events: PathBuf,

        /// Materialize the table into this SQLite snapshot
        #[arg(long)]
        sqlite: Option<PathBuf>,
    },

    /// Train a model from a YAML training config
    Train {
        #[arg(short, long, default_value = "config/train.yaml")]
        config: PathBuf,
    },

    /// Score saved artifacts on the held-out split
    Evaluate {
        #[arg(short, long, default_value = "config/train.yaml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    init_tracing();

    match Cli::parse().command {
        Command::Build {
            customers,
            noncustomers,
            events,
            sqlite,
        } => run_build(
            SourcePaths {
                customers,
                noncustomers,
                events,
            },
            sqlite,
        ),
        Command::Train { config } => run_train(config),
        Command::Evaluate { config } => run_evaluate(config),
    }
}

fn load_config(path: &Path) -> Result<TrainingConfig> {
    TrainingConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn run_build(paths: SourcePaths, sqlite: Option<PathBuf>) -> Result<()> {
    println!("🔗 Feature-merge pipeline");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n📂 Loading sources...");
    let output = run_pipeline(&paths).context("Pipeline failed")?;
    let report = &output.report;

    println!("✓ Customers:     {}", report.customers_loaded);
    println!("✓ Non-customers: {}", report.noncustomers_loaded);
    println!("✓ Events:        {}", report.events_loaded);

    println!("\n⏰ Temporal join");
    println!(
        "✓ Customer rows kept: {} ({} removed by close date)",
        report.customer_join.kept_rows, report.customer_join.removed_by_temporal_filter
    );
    println!("✓ Non-customer rows kept: {}", report.noncustomer_join.kept_rows);

    for warning in report.warnings() {
        println!("⚠️  {}", warning);
    }

    println!("\n📊 Merged table");
    println!("✓ Entities: {}", report.entities_merged);
    println!("✓ Columns:  {}", report.columns);
    println!("✓ Schema fingerprint: {}", report.schema_fingerprint);

    if let Some(path) = sqlite {
        println!("\n💾 Saving snapshot...");
        let conn = open_snapshot(&path)
            .with_context(|| format!("Failed to open snapshot {}", path.display()))?;
        save_feature_table(&conn, &output.table, report)?;
        println!("✓ Snapshot written to {}", path.display());
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Run {} complete", report.run_id);
    Ok(())
}

fn run_train(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;

    println!("🎯 Training {}", config.model.name);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let outcome = run_training(&config).context("Training failed")?;
    let manifest = &outcome.manifest;

    println!("✓ Model:        {}", manifest.model);
    println!("✓ Preprocessor: {}", manifest.preprocessor);
    println!("✓ Train rows:   {}", manifest.train_rows);
    println!("✓ Held out:     {}", manifest.validation_rows);
    println!("✓ Final loss:   {:.4}", manifest.training.final_loss);
    println!("\n📈 {}", manifest.metrics.summary());

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Manifest written to {}", outcome.manifest_path.display());
    Ok(())
}

fn run_evaluate(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;

    println!("🔍 Evaluating artifacts in {}", config.artifacts_dir.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let outcome = run_evaluation(&config).context("Evaluation failed")?;
    println!("✓ Model: {} (run {})", outcome.manifest.model, outcome.manifest.run_id);
    println!("\n📈 {}", outcome.metrics.summary());
    Ok(())
}
