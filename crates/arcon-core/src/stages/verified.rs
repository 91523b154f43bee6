//! Verified stage: assigns accession IDs to verified files.

use serde_json::Value;

use super::{Outbound, StageHandler};
use crate::config::env_or;
use crate::error::StageError;
use crate::ids::generate_accession_id;
use crate::messages::{AccessionRequest, VerifiedEvent};
use crate::schema;

/// Handler for the verified queue.
pub struct VerifiedHandler {
    accessionids_queue: String,
}

impl VerifiedHandler {
    /// Create a handler publishing to the given accession-ID queue.
    pub fn new(accessionids_queue: impl Into<String>) -> Self {
        Self {
            accessionids_queue: accessionids_queue.into(),
        }
    }

    /// Create a handler from the environment (`ACCESSIONIDS_QUEUE`, default
    /// `accessionIDs`).
    pub fn from_env() -> Self {
        Self::new(env_or("ACCESSIONIDS_QUEUE", "accessionIDs"))
    }
}

#[async_trait::async_trait]
impl StageHandler for VerifiedHandler {
    fn stage(&self) -> &'static str {
        "verified"
    }

    async fn handle(&self, body: &[u8]) -> Result<Option<Outbound>, StageError> {
        let mut value: Value =
            serde_json::from_slice(body).map_err(|source| StageError::Json { source })?;
        tracing::debug!(body = %value, "verified message received");

        schema::validate("ingestion-accession-request", &mut value)?;
        let event: VerifiedEvent =
            serde_json::from_value(value).map_err(|source| StageError::Json { source })?;

        let request = AccessionRequest {
            kind: "accession".to_string(),
            user: event.user,
            filepath: event.filepath,
            decrypted_checksums: event.decrypted_checksums,
            accession_id: generate_accession_id(),
        };
        let mut out =
            serde_json::to_value(&request).map_err(|source| StageError::Json { source })?;
        schema::validate("ingestion-accession", &mut out)?;

        // The sha256 entry is guaranteed by the input schema.
        let checksum = request
            .decrypted_checksums
            .iter()
            .find(|c| c.kind == "sha256")
            .map_or("", |c| c.value.as_str());
        tracing::info!(
            filepath = %request.filepath,
            accession_id = %request.accession_id,
            checksum,
            queue = %self.accessionids_queue,
            "publishing accession request"
        );

        Ok(Some(Outbound {
            queue: self.accessionids_queue.clone(),
            payload: serde_json::to_vec(&out).map_err(|source| StageError::Json { source })?,
        }))
    }
}
