//! Stage transformers for the three pipeline queues.
//!
//! Each stage decodes the inbound JSON, validates it against its schema,
//! shapes the next-stage message, validates that against the output schema,
//! and hands it back to the broker runtime for publication. The runtime owns
//! the publish/ack/reject ordering; handlers never touch the channel.

mod completed;
mod inbox;
mod verified;

pub use completed::CompletedHandler;
pub use inbox::InboxHandler;
pub use verified::VerifiedHandler;

use crate::error::StageError;

/// An outbound message a handler wants published before its delivery is
/// acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// The routing key (queue) to publish on.
    pub queue: String,
    /// The JSON payload.
    pub payload: Vec<u8>,
}

/// A per-queue message transformer.
///
/// Implementations must be side-effect free on the broker: the runtime
/// publishes the returned message, acknowledges on success and funnels
/// failures to the error queue.
#[async_trait::async_trait]
pub trait StageHandler: Send + Sync {
    /// The stage name, used for consumer tags and log context.
    fn stage(&self) -> &'static str;

    /// Transform one delivery. `Ok(None)` means the message was valid but
    /// produces no downstream message.
    async fn handle(&self, body: &[u8]) -> Result<Option<Outbound>, StageError>;
}
