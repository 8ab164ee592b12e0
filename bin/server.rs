// Customer Propensity - Prediction Server
// REST API with Axum: POST /predict, GET /health

use anyhow::{Context, Result};
use clap::Parser;
use customer_propensity::{api, init_tracing, PredictionService, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve propensity predictions over HTTP", long_about = None)]
struct Args {
    /// Server config (YAML); defaults apply when absent
    #[arg(short, long, default_value = "config/server.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    println!("🌐 Customer Propensity - Prediction Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let file_config = if args.config.exists() {
        ServerConfig::load(&args.config)
            .with_context(|| format!("Failed to load {}", args.config.display()))?
    } else {
        warn!(path = %args.config.display(), "config not found, using defaults");
        ServerConfig::default()
    };
    let config = file_config.with_env_overrides()?;

    // Load everything once; a failed dependency leaves the server up but not ready
    let config_for_init = config.clone();
    let service = tokio::task::spawn_blocking(move || PredictionService::initialize(&config_for_init))
        .await
        .context("Initialization task panicked")?;

    let health = service.health();
    if health.ready {
        println!("✓ Feature table ready ({} entities)", health.feature_table.entities.unwrap_or(0));
        println!("✓ Model ready ({})", health.model.variant.as_deref().unwrap_or("?"));
    } else {
        println!("❌ Not ready; /predict will answer 503 until restarted with working inputs");
        for detail in [&health.feature_table.detail, &health.model.detail].into_iter().flatten() {
            println!("   {}", detail);
        }
    }

    let app = api::router(Arc::new(service))?;

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(%addr, "listening");
    println!("\n🚀 Server running on http://{}", addr);
    println!("   POST /predict  {{\"ids\": [..]}}");
    println!("   GET  /health");
    println!("   GET  /metrics");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
