//! Completed stage consumer binary.
//!
//! Subscribes to the completed queue, obtains a dataset identifier (a
//! registered DOI when the DOI/REMS environment is configured, a
//! deterministic URN otherwise) and publishes the dataset mapping.

use std::path::Path;

use anyhow::Result;
use clap::Parser;

use arcon_core::broker::Consumer;
use arcon_core::config::{env_or, BrokerSettings};
use arcon_core::identifier::DatasetRegistrar;
use arcon_core::stages::CompletedHandler;

/// arcon completed consumer: maps archived files onto datasets.
#[derive(Parser)]
#[command(name = "arcon-completed", version, about)]
struct Cli {
    /// Path to the access-registry template file (overrides CONFIG_FILE).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    arcon_consumers::init_tracing();
    let cli = Cli::parse();

    let settings = BrokerSettings::from_env()?;
    let queue = env_or("COMPLETED_QUEUE", "completed");
    tracing::info!(host = %settings.host, queue = %queue, "starting completed consumer");

    let registrar = DatasetRegistrar::from_env(cli.config.as_deref().map(Path::new))?;
    if matches!(registrar, DatasetRegistrar::Registered { .. }) {
        tracing::info!("DOI and access-registry credentials found, minting registered DOIs");
    } else {
        tracing::info!("no DOI/REMS configuration, deriving dataset URNs locally");
    }

    let handler = CompletedHandler::new(env_or("MAPPINGS_QUEUE", "mappings"), registrar);
    Consumer::new(settings, queue).run(&handler).await?;
    Ok(())
}
