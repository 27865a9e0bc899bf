#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for statsync.
//!
//! Each subcommand runs one stage against the bucket named in the
//! environment and prints its JSON result to stdout. The exit status is
//! non-zero when the stage reports a `500`.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use statsync_cli_utils::{IndicatifProgress, MultiProgress};
use statsync_config::PipelineConfig;
use statsync_ingest::{http, listing, population};
use statsync_storage::s3::S3Store;

#[derive(Parser)]
#[command(name = "statsync", about = "BLS and population data mirror and analytics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run both ingestion stages (BLS mirror and population snapshot)
    Ingest {
        /// Identifier echoed in the report
        #[arg(long)]
        request_id: Option<String>,
    },
    /// Mirror the BLS directory only
    SyncBls,
    /// Take a population snapshot only
    SyncPopulation,
    /// Compute the reports from stored data and save the result envelope
    Analyze,
    /// Print the files currently listed in the BLS directory
    ListRemote,
}

/// JSON body for a stage that failed outright.
#[derive(Serialize)]
struct StageError {
    success: bool,
    error: String,
}

impl StageError {
    fn new(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            error: error.to_string(),
        }
    }
}

fn print_json(value: &impl Serialize) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

const fn exit_code(status_code: u16) -> ExitCode {
    if status_code >= 500 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn open_store(config: &PipelineConfig) -> S3Store {
    S3Store::from_env(&config.bucket, config.endpoint_url.as_deref()).await
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let multi = statsync_cli_utils::init_logger();
    let cli = Cli::parse();

    let config = PipelineConfig::from_env()?;
    config.log_summary();

    run(cli.command, &config, &multi).await
}

async fn run(
    command: Commands,
    config: &PipelineConfig,
    multi: &MultiProgress,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let client = http::build_client(config)?;

    match command {
        Commands::ListRemote => {
            let files = listing::discover_files(&client, &config.bls_url).await?;
            print_json(&files)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Ingest { request_id } => {
            let store = open_store(config).await;
            let progress = IndicatifProgress::files_bar(multi, "Listing BLS directory");
            let report = statsync_ingest::run_ingest(config, &client, &store, request_id, &progress)
                .await;
            print_json(&report)?;
            Ok(exit_code(report.status.status_code()))
        }
        Commands::SyncBls => {
            let store = open_store(config).await;
            let progress = IndicatifProgress::files_bar(multi, "Listing BLS directory");
            match statsync_ingest::sync_bls(config, &client, &store, &progress).await {
                Ok(summary) => {
                    print_json(&summary)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    log::error!("BLS sync failed: {e}");
                    print_json(&StageError::new(e))?;
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::SyncPopulation => {
            let store = open_store(config).await;
            match population::sync_population(
                &client,
                &store,
                &config.population_prefix,
                &config.population_api_url,
            )
            .await
            {
                Ok(summary) => {
                    print_json(&summary)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    log::error!("Population sync failed: {e}");
                    print_json(&StageError::new(e))?;
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Analyze => {
            let store = open_store(config).await;
            let response = statsync_analytics::run_analysis(config, &store).await;
            print_json(&response.body)?;
            Ok(exit_code(response.status_code))
        }
    }
}
