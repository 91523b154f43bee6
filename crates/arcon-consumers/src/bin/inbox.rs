//! Inbox stage consumer binary.
//!
//! Subscribes to the inbox queue and publishes ingest triggers for uploads.

use anyhow::Result;
use clap::Parser;

use arcon_core::broker::Consumer;
use arcon_core::config::{env_or, BrokerSettings};
use arcon_core::stages::InboxHandler;

/// arcon inbox consumer: turns upload events into ingest triggers.
#[derive(Parser)]
#[command(name = "arcon-inbox", version, about)]
struct Cli {}

#[tokio::main]
async fn main() -> Result<()> {
    arcon_consumers::init_tracing();
    Cli::parse();

    let settings = BrokerSettings::from_env()?;
    let queue = env_or("INBOX_QUEUE", "inbox");
    tracing::info!(host = %settings.host, queue = %queue, "starting inbox consumer");

    let handler = InboxHandler::from_env();
    Consumer::new(settings, queue).run(&handler).await?;
    Ok(())
}
