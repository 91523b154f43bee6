//! Typed message shapes flowing through the pipeline.
//!
//! Every stage decodes its inbound JSON into one of these structs after
//! schema validation, and serializes one of them back out before publishing.
//! The `type` discriminator field is renamed on the serde level so the Rust
//! field names stay keyword-free.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single checksum entry, e.g. `{"type": "sha256", "value": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    /// The checksum algorithm.
    #[serde(rename = "type")]
    pub kind: String,
    /// The hex-encoded checksum value.
    pub value: String,
}

/// The inbox operation reported by the upload service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboxOperation {
    Upload,
    Rename,
    Remove,
}

/// A lifecycle event from the inbox queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxEvent {
    /// The username of the uploader.
    pub user: String,
    /// The path of the file in the inbox.
    pub filepath: String,
    /// What happened to the file.
    pub operation: InboxOperation,
    /// The previous path, present on rename events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldpath: Option<String>,
    /// Checksums of the encrypted file, when the producer supplied them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_checksums: Option<Vec<Checksum>>,
}

/// The message that triggers ingestion of an uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestTrigger {
    /// The message type, always `"ingest"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The username of the uploader.
    pub user: String,
    /// The path of the file to ingest.
    pub filepath: String,
    /// Checksums of the encrypted file, carried through when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_checksums: Option<Vec<Checksum>>,
}

/// A verification-complete event from the verified queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedEvent {
    /// The username of the uploader.
    pub user: String,
    /// The path of the verified file.
    pub filepath: String,
    /// Checksums of the decrypted file content; exactly one `sha256` entry.
    pub decrypted_checksums: Vec<Checksum>,
}

/// The message that assigns an accession ID to a verified file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessionRequest {
    /// The message type, always `"accession"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The username of the uploader.
    pub user: String,
    /// The path of the verified file.
    pub filepath: String,
    /// Checksums of the decrypted file content.
    pub decrypted_checksums: Vec<Checksum>,
    /// The accession identifier assigned to the file.
    pub accession_id: String,
}

/// An ingestion-complete event from the completed queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedEvent {
    /// The username of the uploader.
    pub user: String,
    /// The path of the archived file.
    pub filepath: String,
    /// The accession identifier assigned at the verified stage.
    pub accession_id: String,
    /// Checksums of the decrypted file content.
    pub decrypted_checksums: Vec<Checksum>,
}

/// The message that maps accession IDs onto a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingTrigger {
    /// The message type, always `"mapping"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The dataset identifier the files belong to.
    pub dataset_id: String,
    /// The accession identifiers mapped to the dataset.
    pub accession_ids: Vec<String>,
}

/// The record published to the error queue when a handler fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// The username taken from the failed message, empty if absent.
    pub user: String,
    /// The filepath taken from the failed message, empty if absent.
    pub filepath: String,
    /// A summary of the failure.
    pub reason: String,
    /// Encrypted checksums carried through from the failed message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_checksums: Option<Vec<Checksum>>,
    /// Decrypted checksums carried through from the failed message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decrypted_checksums: Option<Vec<Checksum>>,
}

impl ErrorRecord {
    /// Shape an error record from whatever the failed payload contained.
    ///
    /// The payload has already failed processing, so fields are extracted
    /// leniently: missing or mistyped `user`/`filepath` become empty strings
    /// and unreadable checksum arrays are dropped.
    pub fn from_payload(payload: &Value, reason: String) -> Self {
        let field = |name: &str| {
            payload
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let checksums = |name: &str| {
            payload
                .get(name)
                .cloned()
                .and_then(|v| serde_json::from_value::<Vec<Checksum>>(v).ok())
        };

        Self {
            user: field("user"),
            filepath: field("filepath"),
            reason,
            encrypted_checksums: checksums("encrypted_checksums"),
            decrypted_checksums: checksums("decrypted_checksums"),
        }
    }
}
