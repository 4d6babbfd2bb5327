use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dealwatch_ingest::{build_scheduler, pipeline_from_config, IngestConfig};
use dealwatch_storage::SqliteStore;
use dealwatch_web::AppState;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "dealwatch")]
#[command(about = "Rotating-window product price tracker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the snapshot schema.
    Migrate,
    /// Run one ingestion batch and print the summary.
    Ingest,
    /// Run once at startup, then ingest on the twice-daily cron cadence.
    Schedule,
    /// Serve the JSON query API.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = IngestConfig::from_env();

    match cli.command.unwrap_or(Commands::Ingest) {
        Commands::Migrate => {
            let store = SqliteStore::connect(&config.database_url).await?;
            store.migrate().await?;
            println!("schema ready at {}", config.database_url);
        }
        Commands::Ingest => {
            let (pipeline, _store) = pipeline_from_config(&config).await?;
            let summary = pipeline.run_once().await?;
            println!(
                "ingest complete: run_id={} generation={} inserted={} updated={} skipped={} failed={}",
                summary.run_id,
                summary.generation,
                summary.inserted,
                summary.updated,
                summary.skipped,
                summary.failed
            );
        }
        Commands::Schedule => {
            let (pipeline, _store) = pipeline_from_config(&config).await?;

            // startup run; a failure here is logged, the cadence still starts
            match pipeline.run_once().await {
                Ok(summary) => info!(run_id = %summary.run_id, generation = summary.generation, "startup ingest complete"),
                Err(err) => tracing::warn!(error = %err, "startup ingest failed"),
            }

            let scheduler = build_scheduler(pipeline, &config).await?;
            scheduler.start().await?;
            info!(
                cron_1 = %config.ingest_cron_1,
                cron_2 = %config.ingest_cron_2,
                "scheduler active"
            );
            tokio::signal::ctrl_c().await?;
        }
        Commands::Serve => {
            let (pipeline, store) = pipeline_from_config(&config).await?;
            dealwatch_web::serve_from_env(AppState::new(Arc::new(store), pipeline)).await?;
        }
    }

    Ok(())
}
