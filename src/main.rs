//! # Fulfillment Monitor Entry Point
//!
//! `serve` runs the API with its workers and scheduler. The remaining
//! subcommands trigger one pipeline pass and exit, for cron-style deployments.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fulfillment_monitor::{
    adapters::AdapterRegistry,
    config::{AppConfig, ConfigLoader},
    db,
    pipeline::Pipeline,
    rules::ScheduleMode,
    server::run_server,
    telemetry::init_tracing,
    transports::Transports,
};

#[derive(Debug, Parser)]
#[command(name = "fulfillment-monitor", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API, workers and scheduler (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Evaluate scheduled rules once
    Evaluate {
        #[arg(long, value_enum)]
        mode: ScheduleMode,
    },
    /// Escalate unacknowledged critical notifications once
    Escalate,
    /// Re-enqueue events stuck without a queued job
    Reconcile,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("Failed to load configuration")?;
    init_tracing(&config).context("Failed to initialize tracing")?;

    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let connection = db::init_pool(&config).await?;
    db::run_migrations(&connection).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, connection).await,
        Command::Migrate => {
            info!("Migrations applied");
            Ok(())
        }
        Command::Evaluate { mode } => {
            let (pipeline, _receiver) = build_pipeline(&config, connection)?;
            let created = pipeline.evaluate_scheduled_rules(mode).await?;
            info!(%mode, created, "Scheduled evaluation complete");
            Ok(())
        }
        Command::Escalate => {
            let (pipeline, _receiver) = build_pipeline(&config, connection)?;
            let summary = pipeline.run_escalation_check().await?;
            info!(
                examined = summary.examined,
                escalated = summary.escalated,
                "Escalation check complete"
            );
            Ok(())
        }
        Command::Reconcile => {
            // Enqueued jobs need live workers, so process inline instead.
            let (pipeline, _receiver) = build_pipeline(&config, connection)?;
            let pending = pipeline
                .events
                .list_unprocessed_before(chrono::Utc::now(), &HashSet::new())
                .await?;
            let mut failed = 0;
            for event in &pending {
                if let Err(err) = pipeline.process_now(event.id).await {
                    failed += 1;
                    warn!(event_id = %event.id, error = %err, "Reconciled event failed");
                }
            }
            info!(examined = pending.len(), failed, "Reconciliation complete");
            Ok(())
        }
    }
}

fn build_pipeline(
    config: &AppConfig,
    connection: sea_orm::DatabaseConnection,
) -> anyhow::Result<(Pipeline, tokio::sync::mpsc::Receiver<fulfillment_monitor::queue::Job>)> {
    let transports = Transports::from_config(&config.notifications)?;
    Ok(Pipeline::build(
        connection,
        config,
        AdapterRegistry::with_default_adapters(),
        transports,
    ))
}

async fn serve(config: AppConfig, connection: sea_orm::DatabaseConnection) -> anyhow::Result<()> {
    let (pipeline, receiver) = build_pipeline(&config, connection.clone())?;
    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    run_server(config, connection, Arc::new(pipeline), receiver, shutdown).await
}
