//! Ensemble engine server - headless retraining service
//!
//! Registers one ensemble per symbol, retrains them from CSV files as the
//! scheduler decides and pushes metrics as structured JSON logs to stdout.
//!
//! # Usage
//! ```sh
//! ENGINE_SYMBOLS=BTCUSDT,ETHUSDT TRAINING_DATA_DIR=data/training cargo run --bin server
//! ```
//!
//! # Environment Variables
//! - `ENGINE_SYMBOLS` - Comma-separated symbols to serve (required)
//! - `TRAINING_DATA_DIR` - Directory holding `<SYMBOL>.csv` (default: data/training)
//! - `TRAINING_TARGET_COLUMN` - Target column in those files (default: target)
//! - `MODEL_METADATA_DIR` - Directory for model metadata JSON (in-memory when unset)
//! - `OBSERVABILITY_ENABLED` - Enable metrics reporting (default: true)
//! - `OBSERVABILITY_INTERVAL` - Interval in seconds between metric outputs (default: 60)

use anyhow::{Result, bail};
use ensemble_engine::application::engine::ModelEngine;
use ensemble_engine::application::ml::learner_factory::build_ensemble;
use ensemble_engine::config::EngineConfig;
use ensemble_engine::domain::repositories::MetadataRepository;
use ensemble_engine::infrastructure::observability::{Metrics, MetricsReporter};
use ensemble_engine::infrastructure::{
    CsvTrainingDataProvider, InMemoryMetadataRepository, JsonFileMetadataRepository,
};
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Setup logging (stdout only)
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Ensemble Engine Server {} starting...", env!("CARGO_PKG_VERSION"));
    info!("Metrics: Push-based (JSON to stdout)");

    let config = EngineConfig::from_env()?;
    info!(
        "Configuration loaded: Method={}, Size={}, Workers={}, Timeout={:?}",
        config.training.ensemble_method,
        config.training.ensemble_size,
        config.training.workers,
        config.training.timeout
    );

    let symbols: Vec<String> = std::env::var("ENGINE_SYMBOLS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        bail!("ENGINE_SYMBOLS is empty; nothing to serve");
    }

    let data_dir =
        std::env::var("TRAINING_DATA_DIR").unwrap_or_else(|_| "data/training".to_string());
    let target_column =
        std::env::var("TRAINING_TARGET_COLUMN").unwrap_or_else(|_| "target".to_string());

    let metadata: Arc<dyn MetadataRepository> = match &config.metadata_dir {
        Some(dir) => Arc::new(JsonFileMetadataRepository::new(dir)?),
        None => {
            warn!("MODEL_METADATA_DIR not set, model metadata will not survive restarts");
            Arc::new(InMemoryMetadataRepository::new())
        }
    };

    let engine = ModelEngine::new(&config, metadata, Metrics::new()?)
        .with_data_provider(Arc::new(CsvTrainingDataProvider::new(
            &data_dir,
            target_column,
        )));

    for symbol in &symbols {
        let name = format!(
            "{}_{}",
            symbol.to_lowercase(),
            config.training.ensemble_method
        );
        if engine.restore_from_metadata(&name, symbol).await? {
            continue;
        }
        engine.register_model(&name, symbol, Box::new(build_ensemble(&config.training)?))?;
    }
    info!(
        "Serving {} models from {} (training data: {})",
        symbols.len(),
        config
            .metadata_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "memory".to_string()),
        data_dir
    );

    let engine = Arc::new(engine);
    let retrain_handle = Arc::clone(&engine).spawn_retrain_loop(config.scheduler.check_interval);

    // Start metrics reporter if enabled
    if config.observability.enabled {
        let interval = config.observability.interval_secs;
        let reporter = MetricsReporter::new(Arc::clone(&engine), interval);

        tokio::spawn(async move {
            reporter.run().await;
        });

        info!("Metrics reporter started (interval: {}s)", interval);
    } else {
        info!("Metrics reporting disabled.");
    }

    info!("Server running. Press Ctrl+C to shutdown.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting...");
    retrain_handle.abort();

    Ok(())
}
