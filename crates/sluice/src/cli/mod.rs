mod migrate;

pub use migrate::MigrateCommand;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sluice_core::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// sluice - versioned schema migrations
#[derive(Parser)]
#[command(name = "sluice")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Manage database migrations.
    Migrate(MigrateCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Migrate(cmd) => cmd.execute().await,
        }
    }
}

/// Install the global subscriber on stderr. `RUST_LOG` wins over the configured level.
pub(crate) fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}
