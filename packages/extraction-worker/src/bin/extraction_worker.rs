//! Entity extraction worker binary
//!
//! `run` serves extraction requests until Ctrl-C, `check` tests the broker connection
//! and `extract` sends a single request through the same topics.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use extraction_worker::kernel::{broker, BrokerClient, GlinerModel};
use extraction_worker::{
    check_broker, drive_client, Config, ExtractionClient, ExtractionRequest, ExtractionWorker,
    ResponseRouter, WorkerConfig,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "extraction-worker")]
#[command(about = "Answers named-entity extraction requests received over MQTT")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve extraction requests (default)
    Run,

    /// Check that the message broker accepts connections
    Check,

    /// Send one extraction request and print the entities as JSON
    Extract {
        /// Text to extract entities from
        #[arg(long)]
        text: String,

        /// Entity label to look for (repeatable)
        #[arg(long = "label", required = true)]
        labels: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,extraction_worker=debug,rumqttc=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Check => check_broker(&config)
            .await
            .context("Message broker check failed"),
        Commands::Extract { text, labels } => extract(config, text, labels).await,
    }
}

async fn run(config: Config) -> Result<()> {
    tracing::info!("Starting entity extraction worker");

    let (mqtt, events) = broker::connect(&config, None);
    let model = GlinerModel::from_config(&config);
    let worker = ExtractionWorker::new(
        Arc::new(mqtt),
        Arc::new(model),
        WorkerConfig::from_config(&config),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_ctrl_c(shutdown.clone()));

    worker
        .run(events, shutdown)
        .await
        .context("Extraction worker failed")?;

    Ok(())
}

async fn extract(config: Config, text: String, labels: Vec<String>) -> Result<()> {
    let (mqtt, events) = broker::connect(&config, Some("requester"));
    let mqtt: Arc<dyn BrokerClient> = Arc::new(mqtt);
    let router = Arc::new(ResponseRouter::new(config.topics.clone()));
    let (ready_tx, ready_rx) = watch::channel(false);
    let shutdown = CancellationToken::new();

    let driver = tokio::spawn(drive_client(
        events,
        mqtt.clone(),
        router.clone(),
        ready_tx,
        config.reconnect_delay,
        shutdown.clone(),
    ));

    let client = ExtractionClient::new(mqtt, router, ready_rx, config.response_timeout);
    let result = client
        .extract(&ExtractionRequest::new(text, labels))
        .await;

    shutdown.cancel();
    if let Ok(Err(e)) = driver.await {
        tracing::warn!(error = %e, "Client event loop failed");
    }

    let entities = result.context("Extraction request failed")?;
    println!("{}", serde_json::to_string_pretty(&entities)?);
    Ok(())
}

async fn shutdown_on_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl-C, shutting down");
            shutdown.cancel();
        }
        Err(e) => tracing::warn!(error = %e, "Failed to listen for Ctrl-C"),
    }
}
