//! Offline training CLI.
//!
//! Trains an ensemble on a CSV file, cross-validates it and stores the
//! model metadata as JSON.
//!
//! # Usage
//! ```sh
//! cargo run --bin train -- --input data/BTCUSDT.csv --name btc_bagging --method boosting --size 50
//! ```
//!
//! Flags left unset fall back to the `ENSEMBLE_*` / `TREE_*` environment
//! configuration.

use anyhow::{Context, Result};
use clap::Parser;
use ensemble_engine::application::ml::cross_validation::{CrossValidator, CvReport};
use ensemble_engine::application::ml::learner_factory::build_ensemble;
use ensemble_engine::config::EngineConfig;
use ensemble_engine::domain::ml::cancellation::CancellationToken;
use ensemble_engine::domain::ml::learner::BaseLearner;
use ensemble_engine::domain::ml::model::{EnsembleMethod, ModelMetadata};
use ensemble_engine::domain::repositories::MetadataRepository;
use ensemble_engine::infrastructure::csv_training_data::load_dataset;
use ensemble_engine::infrastructure::persistence::metadata_store::JsonFileMetadataRepository;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to training data CSV
    #[arg(long)]
    input: PathBuf,

    /// Target column in the CSV
    #[arg(long, default_value = "target")]
    target: String,

    /// Model name used for the metadata file
    #[arg(long, default_value = "ensemble")]
    name: String,

    /// Directory for model metadata JSON
    #[arg(long, default_value = "data/models")]
    output: PathBuf,

    /// bagging, boosting or stacking
    #[arg(long)]
    method: Option<EnsembleMethod>,

    /// Number of base learners
    #[arg(long)]
    size: Option<usize>,

    /// Maximum depth of each tree
    #[arg(long)]
    max_depth: Option<usize>,

    /// Minimum samples required to split an internal node
    #[arg(long)]
    min_split: Option<usize>,

    /// Seed for bootstrap sampling; random when unset
    #[arg(long)]
    seed: Option<u64>,

    /// Worker threads for bagging
    #[arg(long)]
    workers: Option<usize>,

    /// Training budget in seconds, cross-validation included
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Use only the most recent N rows. 0 = use all.
    #[arg(long, default_value_t = 0)]
    max_rows: usize,

    /// Skip cross-validation
    #[arg(long)]
    no_cv: bool,
}

fn print_report(report: &CvReport, min_accuracy: f64) {
    println!("\n══════════════════════════════════════════════════════");
    println!("  CROSS-VALIDATION");
    println!("══════════════════════════════════════════════════════");
    for fold in &report.folds {
        println!(
            "  Fold {}: train {:>6} | val {:>6} | train acc {:.3} | val acc {:.3} | gap {:+.3}",
            fold.fold,
            fold.train_size,
            fold.validation_size,
            fold.train_accuracy,
            fold.validation_accuracy,
            fold.overfitting_gap
        );
    }
    if report.skipped_folds > 0 {
        println!("  Skipped folds: {}", report.skipped_folds);
    }
    println!("\n  Raw accuracy:     {:.4}", report.raw_accuracy);
    println!("  Accuracy:         {:.4}", report.accuracy);
    println!("  Precision:        {:.4}", report.precision);
    println!("  Recall:           {:.4}", report.recall);
    println!("  F1:               {:.4}", report.f1);
    println!(
        "  Overfitting:      {} (avg gap {:.3}, max gap {:.3}, x{:.2})",
        report.assessment.severity,
        report.assessment.avg_gap,
        report.assessment.max_gap,
        report.assessment.multiplier
    );
    if report.clamped {
        println!("  Accuracy clamped to the ceiling");
    }
    let verdict = if report.is_acceptable(min_accuracy) {
        "ACCEPTED"
    } else {
        "REJECTED"
    };
    println!("  Verdict:          {} (min accuracy {:.2})", verdict, min_accuracy);
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let mut config = EngineConfig::from_env()?;
    if let Some(method) = args.method {
        config.training.ensemble_method = method;
    }
    if let Some(size) = args.size {
        config.training.ensemble_size = size;
    }
    if let Some(depth) = args.max_depth {
        config.training.tree.max_depth = depth;
    }
    if let Some(split) = args.min_split {
        config.training.tree.min_samples_split = split;
    }
    if args.seed.is_some() {
        config.training.seed = args.seed;
    }
    if let Some(workers) = args.workers {
        config.training.workers = workers;
    }
    if let Some(secs) = args.timeout_secs {
        config.training.timeout = Duration::from_secs(secs);
    }

    let mut data = load_dataset(&args.input, &args.target)?;
    if args.max_rows > 0 && data.len() > args.max_rows {
        data = data.slice(data.len() - args.max_rows..data.len());
    }
    info!(
        "Loaded {} rows x {} features from {:?}",
        data.len(),
        data.n_features(),
        args.input
    );

    let mut model = build_ensemble(&config.training)?;
    info!(
        "Training {} ensemble of {} trees (max_depth {}, workers {})",
        config.training.ensemble_method,
        config.training.ensemble_size,
        config.training.tree.max_depth,
        config.training.workers
    );

    let token = CancellationToken::with_budget(config.training.timeout);
    let validator = CrossValidator::new(config.validation.cv_settings());
    let no_cv = args.no_cv;
    let feature_names = data.feature_names.clone();
    let data_hash = data.content_hash();

    // CPU-bound; keep it off the async workers
    let started = Instant::now();
    let (model, report) = tokio::task::spawn_blocking(move || -> Result<_> {
        model.train(&data.features, &data.targets, &token)?;
        let report = if no_cv {
            None
        } else {
            Some(validator.validate(&model, &data, &token)?)
        };
        Ok((model, report))
    })
    .await
    .context("Training task panicked")??;
    info!("Training finished in {:?}", started.elapsed());

    if let Some(report) = &report {
        print_report(report, config.scheduler.min_accuracy);
    }

    let metadata = ModelMetadata::describe(
        &args.name,
        &model,
        &feature_names,
        &data_hash,
        report.as_ref().map(CvReport::summary),
    );

    println!("\n  Top features:");
    for (name, importance) in metadata.ranked_features().iter().take(10) {
        println!("    {:<24} {:.4}", name, importance);
    }

    let repo = JsonFileMetadataRepository::new(&args.output)?;
    repo.save(&metadata).await?;
    println!("\n  Metadata written to {:?}", repo.dir().join(format!("{}.json", args.name)));
    Ok(())
}
