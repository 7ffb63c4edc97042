//! depot: operator binary for artifact hand-off and outbox dispatch.
//!
//! Configuration comes from the environment (and `.env`), see `depot_core::Config`.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use depot_core::models::{IssueWriteLocationRequest, RecordOutcomeRequest};
use depot_core::{Config, DepotError};
use depot_cli::{init_tracing, print_json, report_error, spawn_channel_consumer, App};
use depot_worker::Sweep;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "depot", about = "Artifact hand-off and outbox dispatch")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconcilers until interrupted
    Run,
    /// Run one batch of a single reconciler: outbox, stale-upload or stuck-dispatch
    Sweep {
        name: String,
    },
    /// Issue a write location for a new upload
    Issue {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        filename: String,
        #[arg(long, default_value = "application/pdf")]
        content_type: String,
    },
    /// Write a local file to a pending upload's quarantine location
    Write {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        upload: Uuid,
        #[arg(long)]
        file: PathBuf,
    },
    /// Complete an upload written to quarantine
    Complete {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        upload: Uuid,
    },
    /// Show an upload record
    Get {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        upload: Uuid,
    },
    /// Delete an upload on behalf of its owner
    Delete {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        upload: Uuid,
    },
    /// Show the record that holds an upload's bytes
    Resolve {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        upload: Uuid,
    },
    /// Reject a pending upload
    Reject {
        #[arg(long)]
        upload: Uuid,
    },
    /// Dispatch one pending job
    Dispatch {
        job: Uuid,
    },
    /// Record a worker outcome: completed, failed or not-a-cv
    Outcome {
        #[arg(long)]
        job: Uuid,
        #[arg(long)]
        status: String,
        #[arg(long)]
        error: Option<String>,
        /// Result document as JSON
        #[arg(long)]
        result: Option<String>,
    },
    /// Show the event history of a job
    History {
        job: Uuid,
    },
    /// Show the current state of every job for an upload
    Jobs {
        #[arg(long)]
        upload: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = Config::from_env().context("Failed to load configuration")?;
    let mut app = App::from_config(config).await?;

    if let Err(e) = execute(&mut app, cli.command).await {
        if let Some(depot_err) = e.downcast_ref::<DepotError>() {
            let body = report_error(depot_err);
            eprintln!("{}", serde_json::to_string_pretty(&body)?);
            std::process::exit(1);
        }
        return Err(e);
    }

    Ok(())
}

async fn execute(app: &mut App, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run => {
            let consumer = app.channel_jobs.take().map(spawn_channel_consumer);

            let mut scheduler = app.scheduler();
            scheduler.start();

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received");

            scheduler.shutdown().await?;
            if let Some(consumer) = consumer {
                consumer.abort();
            }
        }
        Commands::Sweep { name } => {
            let scheduler = app.scheduler();
            let sweep = scheduler.sweep(&name).ok_or_else(|| {
                DepotError::Validation(format!(
                    "Unknown sweep '{}', expected outbox, stale-upload or stuck-dispatch",
                    name
                ))
            })?;
            match sweep.run_once().await? {
                Some(report) => print_json(&report)?,
                None => print_json(&serde_json::json!({ "sweep": name, "skipped": true }))?,
            }
        }
        Commands::Issue {
            owner,
            filename,
            content_type,
        } => {
            let location = app
                .lifecycle
                .issue_write_location(IssueWriteLocationRequest {
                    owner_id: owner,
                    filename,
                    content_type,
                })
                .await?;
            print_json(&location)?;
        }
        Commands::Write {
            owner,
            upload,
            file,
        } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let record = app.write_quarantined(upload, owner, data.into()).await?;
            print_json(&record)?;
        }
        Commands::Complete { owner, upload } => {
            let response = app.lifecycle.complete_upload(upload, owner).await?;
            print_json(&response)?;
        }
        Commands::Get { owner, upload } => {
            print_json(&app.lifecycle.get_upload(upload, owner).await?)?;
        }
        Commands::Delete { owner, upload } => {
            print_json(&app.lifecycle.delete_upload(upload, owner).await?)?;
        }
        Commands::Resolve { owner, upload } => {
            print_json(&app.lifecycle.resolve_payload(upload, owner).await?)?;
        }
        Commands::Reject { upload } => {
            print_json(&app.lifecycle.reject_upload(upload).await?)?;
        }
        Commands::Dispatch { job } => {
            print_json(&app.producer.dispatch(job).await?)?;
        }
        Commands::Outcome {
            job,
            status,
            error,
            result,
        } => {
            let result = result
                .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
                .transpose()
                .map_err(DepotError::from)?;
            let event = app
                .producer
                .record_outcome_request(RecordOutcomeRequest {
                    job_id: job,
                    status,
                    error,
                    result,
                })
                .await?;
            print_json(&event)?;
        }
        Commands::History { job } => {
            print_json(&app.producer.job_history(job).await?)?;
        }
        Commands::Jobs { upload } => {
            print_json(&app.producer.jobs_for_upload(upload).await?)?;
        }
    }

    Ok(())
}
