//! Niffler E2E CLI - Main Entry Point
//!
//! Watches Kafka topics, waits for service database rows and runs the
//! Kafka/userdata scenarios from the command line.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

use commands::{db, kafka, scenario};

/// Niffler E2E toolkit
#[derive(Parser)]
#[command(name = "niffler-e2e")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file (TOML); the environment is used when absent
    #[arg(long, env = "NIFFLER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and publish to Kafka topics
    #[command(subcommand)]
    Kafka(kafka::KafkaCommands),

    /// Wait for rows in the service databases
    #[command(subcommand)]
    Db(db::DbCommands),

    /// Run end-to-end scenarios
    #[command(subcommand)]
    Scenario(scenario::ScenarioCommands),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let settings = commands::load_settings(cli.config.as_deref())?;
    tracing::debug!("Loaded settings: {:?}", settings.kafka);

    match cli.command {
        Commands::Kafka(cmd) => kafka::execute(cmd, &settings, cli.format).await?,
        Commands::Db(cmd) => db::execute(cmd, &settings, cli.format).await?,
        Commands::Scenario(cmd) => scenario::execute(cmd, &settings, cli.format).await?,
    }

    Ok(())
}
