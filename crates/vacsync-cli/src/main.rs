use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vacsync_sheets::GoogleSheetsClient;
use vacsync_storage::{PgVacancyStore, VacancyStore};
use vacsync_sync::alert::{Alerter, ALERT_SUBJECT};
use vacsync_sync::{SyncConfig, SyncEngine};

#[derive(Debug, Parser)]
#[command(name = "vacsync")]
#[command(about = "Spreadsheet to vacancy database synchronizer")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync pass and exit.
    Sync,
    /// Create the schema and seed the direction catalog if missing.
    Seed,
    /// Re-run the sync on a fixed interval; alert and exit on failure.
    Watch,
}

async fn connect(config: &SyncConfig) -> Result<(PgVacancyStore, GoogleSheetsClient)> {
    let store = PgVacancyStore::connect(&config.database_url()).await?;
    let source = GoogleSheetsClient::connect(config.sheets_config()).await?;
    Ok((store, source))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Seed => {
            let store = PgVacancyStore::connect(&config.database_url()).await?;
            let seeded = store.ensure_seeded().await?;
            println!(
                "seed {}: schema {}",
                if seeded { "applied" } else { "skipped" },
                if seeded { "created" } else { "already present" }
            );
        }
        Commands::Sync => {
            let (store, source) = connect(&config).await?;
            let engine = SyncEngine::new(&source, &store, config.sheet_range.clone());
            let summary = engine.run_once().await?;
            println!(
                "sync complete: run_id={} sheets={} inserted={} duplicates={} unresolved={}",
                summary.run_id,
                summary.sheets_seen,
                summary.inserted,
                summary.duplicates_skipped,
                summary.unresolved_directions
            );
        }
        Commands::Watch => {
            let (store, source) = connect(&config).await?;
            let engine = SyncEngine::new(&source, &store, config.sheet_range.clone());
            let alerter = config.alerter();
            let interval = Duration::from_secs(config.sync_interval_secs);

            loop {
                let started = Instant::now();
                match engine.run_once().await {
                    Ok(summary) => {
                        info!(
                            run_id = %summary.run_id,
                            inserted = summary.inserted,
                            duplicates = summary.duplicates_skipped,
                            elapsed = ?started.elapsed(),
                            "watch run finished"
                        );
                    }
                    Err(err) => {
                        error!(error = %format!("{err:#}"), "sync run failed");
                        if let Err(alert_err) = alerter.notify(ALERT_SUBJECT, &format!("{err:#}")) {
                            error!(error = %alert_err, "failed to deliver alert");
                        }
                        return Err(err);
                    }
                }
                tokio::time::sleep(interval).await;
            }
        }
    }

    Ok(())
}
