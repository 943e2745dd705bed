//! mlm-trainer - continuous model training from the command line
//!
//! Trains the built-in linear regression family against the training data
//! under the root folder, and manages the training buffer.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mlm_common::config::{LoggingConfig, RootFolderResolver};
use mlm_trainer::config::{load_config, staging_dir, TrainerPaths, MODULE_NAME};
use mlm_trainer::models::evaluation::{higher_is_better, metrics};
use mlm_trainer::models::{Dataset, Row, Schema, Value};
use mlm_trainer::regression::{LinearModelCodec, LinearRegressionTrainer};
use mlm_trainer::storage::{DataStorage, FileDataStorage, FileModelStorage};
use mlm_trainer::TrainingOrchestrator;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for mlm-trainer
#[derive(Parser, Debug)]
#[command(name = "mlm-trainer")]
#[command(about = "Continuous background training for a machine-learning model")]
#[command(version)]
struct Args {
    /// Root folder holding training data and models
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train until the model is current (and, when cycling, stops improving)
    Train,
    /// Predict the label for one row of feature values
    Predict {
        /// Feature values in schema order
        #[arg(required = true)]
        features: Vec<String>,
    },
    /// Append rows to the training buffer
    Add {
        /// Rows as a JSON array of arrays, e.g. '[[1.0, 3.0], [2.0, 5.0]]'
        rows: String,
        /// Skip rows already present in the training data or buffer
        #[arg(long)]
        check_duplicates: bool,
    },
    /// Fold the training buffer into the training data
    Commit,
    /// Discard everything in the training buffer
    Clear,
    /// Replace the training data with a dataset file (JSON)
    Import { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging)?;

    info!(
        "Starting mlm-trainer {} ({}, {}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("MLM_GIT_HASH"),
        env!("MLM_BUILD_PROFILE"),
        env!("MLM_BUILD_TIMESTAMP")
    );

    let root = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .with_toml_root(config.root_folder.clone())
        .resolve();
    let paths = TrainerPaths::new(root);
    paths
        .ensure_dirs()
        .context("Failed to create storage directories")?;

    let data = Arc::new(FileDataStorage::new(&paths.data));
    let buffer = Arc::new(FileDataStorage::new(&paths.buffer));
    let orchestrator = TrainingOrchestrator::builder(
        Arc::new(LinearRegressionTrainer::default()),
        data.clone(),
        higher_is_better(metrics::R_SQUARED),
    )
    .training_buffer(buffer.clone())
    .model_storage(Arc::new(FileModelStorage::new(&paths.model, LinearModelCodec)))
    .settings(&config.training)
    .staging_dir(staging_dir(&config, &paths))
    .build();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    match args.command {
        Command::Train => {
            orchestrator.start_training(&cancel).await?;
            orchestrator.wait_for_training().await?;
            match orchestrator.snapshot().evaluation() {
                Some(evaluation) => println!("{}", evaluation),
                None => println!("No model trained"),
            }
        }
        Command::Predict { features } => {
            let row: Row = features.iter().map(|s| parse_value(s)).collect();
            let output = orchestrator.predict(&row, &cancel).await?;
            let rendered: Vec<String> = output.iter().map(Value::to_string).collect();
            println!("{}", rendered.join(","));
        }
        Command::Add {
            rows,
            check_duplicates,
        } => {
            let rows: Vec<Row> =
                serde_json::from_str(&rows).context("Rows must be a JSON array of arrays")?;
            let schema = existing_schema(&*buffer, &*data)
                .await?
                .context("No training data yet; import a dataset first")?;
            let added = orchestrator
                .add_training_data(&Dataset::new(schema, rows)?, check_duplicates)
                .await?;
            println!("Added {} rows", added);
        }
        Command::Commit => {
            let committed = orchestrator.commit_training_data().await?;
            println!("Committed {} rows", committed);
        }
        Command::Clear => {
            let cleared = orchestrator.clear_training_data().await?;
            println!("Cleared {} rows", cleared);
        }
        Command::Import { path } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let parsed: Dataset = serde_json::from_slice(&bytes)
                .with_context(|| format!("{} is not a dataset", path.display()))?;
            let schema = Schema::new(parsed.schema().columns().to_vec())?;
            let dataset = Dataset::new(Arc::new(schema), parsed.rows().to_vec())?;
            data.save_data(&dataset).await?;
            println!("Imported {} rows", dataset.len());
        }
    }

    orchestrator.shutdown().await?;
    Ok(())
}

/// Console logging, plus a plain-text file when `logging.file` is set
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let file_layer = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("mlm_trainer={0},mlm_common={0}", logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

/// Schema of the buffer, else of the training data
async fn existing_schema(
    buffer: &dyn DataStorage,
    data: &dyn DataStorage,
) -> Result<Option<Arc<Schema>>> {
    for storage in [buffer, data] {
        if let Some(dataset) = storage.load_data().await? {
            return Ok(Some(Arc::clone(dataset.schema())));
        }
    }
    Ok(None)
}

/// Integer, float, boolean, else text
fn parse_value(raw: &str) -> Value {
    if let Ok(v) = raw.parse::<i64>() {
        Value::Integer(v)
    } else if let Ok(v) = raw.parse::<f64>() {
        Value::Float(v)
    } else if let Ok(v) = raw.parse::<bool>() {
        Value::Boolean(v)
    } else {
        Value::Text(raw.to_string())
    }
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, stopping");
}
