//! Verified stage consumer binary.
//!
//! Subscribes to the verified queue and assigns accession IDs.

use anyhow::Result;
use clap::Parser;

use arcon_core::broker::Consumer;
use arcon_core::config::{env_or, BrokerSettings};
use arcon_core::stages::VerifiedHandler;

/// arcon verified consumer: assigns accession IDs to verified files.
#[derive(Parser)]
#[command(name = "arcon-verified", version, about)]
struct Cli {}

#[tokio::main]
async fn main() -> Result<()> {
    arcon_consumers::init_tracing();
    Cli::parse();

    let settings = BrokerSettings::from_env()?;
    let queue = env_or("VERIFIED_QUEUE", "verified");
    tracing::info!(host = %settings.host, queue = %queue, "starting verified consumer");

    let handler = VerifiedHandler::from_env();
    Consumer::new(settings, queue).run(&handler).await?;
    Ok(())
}
