//! BIN Processor Router - Main Entry Point
//!
//! Serves processor rankings over NATS, answers one-off predictions from
//! the command line, and runs the periodic retraining job.

use anyhow::{Context, Result};
use bin_processor_router::{
    config::{AppConfig, LoggingConfig},
    consumer::RequestConsumer,
    metrics::{MetricsReporter, ServingMetrics},
    models::{ArtifactStore, ArtifactWatcher, ModelHandle, PredictionService, ServingModel},
    producer::ResponsePublisher,
    retrain::Retrainer,
    types::{Bin, PredictionReply, PredictionRequest},
};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bin-router", version, about = "BIN-based payment processor ranking")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "config/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve prediction requests over NATS
    Serve,
    /// Rank processors for BINs using the latest model
    Predict {
        /// Comma-separated BINs
        #[arg(long, value_delimiter = ',', required = true)]
        bins: Vec<Bin>,
        /// 3-D Secure flag (0 or 1)
        #[arg(long, default_value_t = 1)]
        is_3d: u8,
        #[arg(long)]
        top_n: Option<usize>,
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Retrain from the base and newly arrived records
    Retrain,
    /// List published model versions
    Versions,
    /// Point `latest` at an existing version
    Promote { version: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, from_file) = if cli.config.exists() {
        let config = AppConfig::load_from_path(&cli.config)
            .with_context(|| format!("Failed to load {}", cli.config.display()))?;
        (config, true)
    } else {
        (AppConfig::default(), false)
    };

    init_tracing(&config.logging)?;
    if from_file {
        info!(path = %cli.config.display(), "Configuration loaded");
    } else {
        warn!(path = %cli.config.display(), "Configuration file not found, using defaults");
    }

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Predict {
            bins,
            is_3d,
            top_n,
            threshold,
        } => {
            let request = PredictionRequest {
                bins,
                is_3d,
                top_n,
                threshold,
            };
            predict(config, request)
        }
        Command::Retrain => retrain(config).await,
        Command::Versions => versions(&config),
        Command::Promote { version } => {
            let store = ArtifactStore::new(&config.artifacts.models_dir);
            let pointer = store
                .promote(&version)
                .with_context(|| format!("Failed to promote {}", version))?;
            println!("latest -> {} ({})", pointer.version, pointer.file);
            Ok(())
        }
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("bin_processor_router={}", logging.level).parse()?)
        .add_directive(format!("bin_router={}", logging.level).parse()?);

    match logging.format.as_str() {
        "json" => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        "pretty" => tracing_subscriber::fmt().pretty().with_env_filter(filter).init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

async fn serve(config: AppConfig) -> Result<()> {
    info!("Starting BIN Processor Router");

    let store = ArtifactStore::new(&config.artifacts.models_dir);
    let handle = ModelHandle::empty();
    let watcher = ArtifactWatcher::new(store, handle.clone());

    if watcher
        .check_and_reload()
        .context("Failed to load the latest model")?
    {
        info!(version = ?handle.version(), "Model loaded");
    } else {
        warn!(
            models_dir = %config.artifacts.models_dir,
            "No model published yet; requests fail until one is"
        );
    }

    if config.artifacts.reload_interval_secs > 0 {
        watcher.start(Duration::from_secs(config.artifacts.reload_interval_secs));
        info!(
            interval_secs = config.artifacts.reload_interval_secs,
            "Watching for new model versions"
        );
    }

    let metrics = Arc::new(ServingMetrics::new());
    let service = Arc::new(
        PredictionService::from_config(&config.ranking, handle)?.with_metrics(metrics.clone()),
    );
    info!(
        threshold = service.defaults().threshold,
        top_n = service.defaults().top_n,
        external = ?config.ranking.external_processors,
        "Prediction service initialized"
    );

    let client = async_nats::connect(&config.nats.url).await?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = RequestConsumer::new(client.clone(), &config.nats.request_subject)
        .with_queue_group(config.nats.queue_group.clone());
    let publisher = Arc::new(ResponsePublisher::new(
        client.clone(),
        &config.nats.response_subject,
    ));

    let num_workers = config.pipeline.workers;
    info!(
        workers = num_workers,
        subject = %config.nats.request_subject,
        "Starting request loop"
    );

    let semaphore = Arc::new(Semaphore::new(num_workers));
    let processed_count = Arc::new(AtomicU64::new(0));

    let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs);
    tokio::spawn(reporter.start());

    let mut subscription = consumer.subscribe().await?;

    while let Some(message) = subscription.next().await {
        let permit = semaphore.clone().acquire_owned().await?;

        let service = service.clone();
        let publisher = publisher.clone();
        let processed_count = processed_count.clone();

        tokio::spawn(async move {
            let reply = match RequestConsumer::decode(&message) {
                Ok(request) => service.handle_request(&request),
                Err(e) => {
                    warn!(error = %e, "Rejected prediction request");
                    PredictionReply::error(e.to_string())
                }
            };

            if let Err(e) = publisher.publish(message.reply.as_ref(), &reply).await {
                error!(error = %e, "Failed to publish prediction reply");
            } else {
                debug!("Prediction reply published");
            }

            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 {
                info!(processed = count, "Processing milestone");
            }

            drop(permit);
        });
    }

    info!("Router shutting down...");
    metrics.print_summary();

    Ok(())
}

fn predict(config: AppConfig, request: PredictionRequest) -> Result<()> {
    let store = ArtifactStore::new(&config.artifacts.models_dir);
    let artifact = store
        .load_latest()
        .context("Failed to load the latest model")?;
    let model = ServingModel::from_artifact(artifact)?;

    let service = PredictionService::from_config(&config.ranking, ModelHandle::new(model))?;
    let options = service.options(request.top_n, request.threshold)?;
    let responses = service.predict_many(&request.bins, request.is_3d, &options)?;

    println!("{}", serde_json::to_string_pretty(&responses)?);
    Ok(())
}

async fn retrain(config: AppConfig) -> Result<()> {
    let store = ArtifactStore::new(&config.artifacts.models_dir);
    let retrainer = Retrainer::new(config.retraining.clone(), store);

    let report = tokio::task::spawn_blocking(move || retrainer.run())
        .await
        .context("Retraining task panicked")?
        .context("Retraining aborted; the published model is unchanged")?;

    info!(
        version = %report.version,
        processors = report.processors.len(),
        training_records = report.summary.training_records,
        "Retraining complete"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn versions(config: &AppConfig) -> Result<()> {
    let store = ArtifactStore::new(&config.artifacts.models_dir);
    let latest = store.latest_pointer().ok().map(|p| p.version);

    for version in store.list_versions()? {
        let marker = if latest.as_deref() == Some(version.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{} {}", marker, version);
    }
    Ok(())
}
