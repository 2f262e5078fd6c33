//! Realign CLI
//!
//! Batch runner around Realign Core and its bundled overlap engine.
//!
//! # Usage
//! ```bash
//! realign align --features zones.json --reference parcels-2024.json --config run.toml
//! realign actualise --features zones.json --reference parcels-2025.json --config run.toml --max-distance 3
//! realign check-config run.toml
//! ```

mod report;

use anyhow::Context;
use clap::{Parser, Subcommand};
use realign_core::config::{Mode, PredictionStrategy, RunConfig, RunConfigFile};
use realign_core::observer::TracingObserver;
use realign_core::types::{Distance, Feature, ReferenceSet};
use realign_core::workflow::Aligner;
use realign_core::OverlapEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Realign - distance-swept boundary alignment against reference parcels
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep every feature and emit predictions
    Align {
        #[command(flatten)]
        inputs: Inputs,

        /// Override the prediction strategy (all, best, original)
        #[arg(long)]
        prediction: Option<PredictionStrategy>,
    },

    /// Re-align only features affected by a new reference version
    Actualise {
        #[command(flatten)]
        inputs: Inputs,

        /// Upper bound for re-alignment, in meters (default: from config)
        #[arg(long)]
        max_distance: Option<f64>,
    },

    /// Validate a run configuration and print it normalized
    CheckConfig {
        /// Configuration file (.toml or .json)
        config: PathBuf,
    },
}

#[derive(clap::Args)]
struct Inputs {
    /// Thematic features (JSON array)
    #[arg(long, value_name = "FILE")]
    features: PathBuf,

    /// Reference parcel set (JSON)
    #[arg(long, value_name = "FILE")]
    reference: PathBuf,

    /// Run configuration (.toml or .json)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Write the features with accepted decisions applied to this file
    #[arg(short, long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Maximum number of features processed at once
    #[arg(long)]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the JSON report
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(filter("debug"))
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter("info"))
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Align { inputs, prediction } => {
            let mut config = load_config(&inputs)?.with_mode(Mode::Predictions);
            if let Some(strategy) = prediction {
                config = config.with_prediction(strategy);
            }
            run(inputs, config).await?;
        }
        Commands::Actualise {
            inputs,
            max_distance,
        } => {
            let mut config = load_config(&inputs)?.with_mode(Mode::UpdateToActual);
            if let Some(max) = max_distance {
                config = config.with_max_actualisation_distance(Distance::new(max)?);
            }
            run(inputs, config).await?;
        }
        Commands::CheckConfig { config } => {
            let loaded = RunConfig::from_file(&config)
                .with_context(|| format!("Invalid configuration {}", config.display()))?;
            let normalized = RunConfigFile::from(&loaded);
            println!("{}", serde_json::to_string_pretty(&normalized)?);
        }
    }

    Ok(())
}

fn filter(default_level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
}

fn load_config(inputs: &Inputs) -> anyhow::Result<RunConfig> {
    let mut config = RunConfig::from_file(&inputs.config)
        .with_context(|| format!("Invalid configuration {}", inputs.config.display()))?;
    if let Some(concurrency) = inputs.concurrency {
        config = config.with_concurrency(concurrency);
    }
    Ok(config)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read {} from {}", what, path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Cannot parse {} in {}", what, path.display()))
}

async fn run(inputs: Inputs, config: RunConfig) -> anyhow::Result<()> {
    let features: Vec<Feature> = read_json(&inputs.features, "features")?;
    let reference: ReferenceSet = read_json(&inputs.reference, "reference set")?;
    let provenance_field = config.provenance_field.clone();

    tracing::info!(
        "Loaded {} features and {} reference parcels (version {})",
        features.len(),
        reference.len(),
        reference.version
    );

    let aligner = Aligner::new(Arc::new(OverlapEngine::new()), config)?
        .with_observer(Arc::new(TracingObserver));

    let token = aligner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing features already in progress");
            token.cancel();
        }
    });

    let report = aligner.run(features.clone(), Arc::new(reference)).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&report::ReportView::from(&report))?
    );

    if let Some(out) = &inputs.out {
        let updated = report::apply(&features, &report, &provenance_field);
        std::fs::write(out, serde_json::to_string_pretty(&updated)?)
            .with_context(|| format!("Cannot write {}", out.display()))?;
        tracing::info!("Wrote {} features to {}", updated.len(), out.display());
    }

    Ok(())
}
