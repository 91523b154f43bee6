//! Inbox stage: turns upload events into ingest triggers.

use serde_json::Value;

use super::{Outbound, StageHandler};
use crate::config::env_or;
use crate::error::StageError;
use crate::messages::{InboxEvent, InboxOperation, IngestTrigger};
use crate::schema;

/// Handler for the inbox queue.
///
/// Upload events become ingest triggers; rename and remove events are
/// validated and acknowledged without producing a downstream message.
pub struct InboxHandler {
    ingest_queue: String,
}

impl InboxHandler {
    /// Create a handler publishing to the given ingest queue.
    pub fn new(ingest_queue: impl Into<String>) -> Self {
        Self {
            ingest_queue: ingest_queue.into(),
        }
    }

    /// Create a handler from the environment (`INGEST_QUEUE`, default
    /// `ingest`).
    pub fn from_env() -> Self {
        Self::new(env_or("INGEST_QUEUE", "ingest"))
    }
}

#[async_trait::async_trait]
impl StageHandler for InboxHandler {
    fn stage(&self) -> &'static str {
        "inbox"
    }

    async fn handle(&self, body: &[u8]) -> Result<Option<Outbound>, StageError> {
        let mut value: Value =
            serde_json::from_slice(body).map_err(|source| StageError::Json { source })?;
        tracing::debug!(body = %value, "inbox message received");

        // The operation selects which schema the message must conform to.
        let operation = value
            .get("operation")
            .and_then(Value::as_str)
            .ok_or_else(|| StageError::MissingField {
                field: "operation".to_string(),
            })?
            .to_string();
        let schema_name = match operation.as_str() {
            "upload" => "inbox-upload",
            "rename" => "inbox-rename",
            "remove" => "inbox-remove",
            _ => return Err(StageError::UnknownOperation { operation }),
        };
        schema::validate(schema_name, &mut value)?;
        let event: InboxEvent =
            serde_json::from_value(value).map_err(|source| StageError::Json { source })?;

        match event.operation {
            InboxOperation::Upload => {
                if !valid_upload_path(&event.filepath) {
                    return Err(StageError::InvalidPath {
                        filepath: event.filepath,
                    });
                }

                let trigger = IngestTrigger {
                    kind: "ingest".to_string(),
                    user: event.user,
                    filepath: event.filepath,
                    encrypted_checksums: event.encrypted_checksums,
                };
                let mut out = serde_json::to_value(&trigger)
                    .map_err(|source| StageError::Json { source })?;
                schema::validate("ingestion-trigger", &mut out)?;

                tracing::info!(
                    filepath = %trigger.filepath,
                    user = %trigger.user,
                    queue = %self.ingest_queue,
                    "publishing ingest trigger"
                );
                Ok(Some(Outbound {
                    queue: self.ingest_queue.clone(),
                    payload: serde_json::to_vec(&out)
                        .map_err(|source| StageError::Json { source })?,
                }))
            }
            InboxOperation::Rename | InboxOperation::Remove => {
                tracing::info!(
                    operation = %operation,
                    filepath = %event.filepath,
                    user = %event.user,
                    "inbox event validated, no downstream message"
                );
                Ok(None)
            }
        }
    }
}

/// An uploaded filepath must end in a real file name.
fn valid_upload_path(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or("");
    !last.is_empty() && last != "." && last != ".."
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn handler() -> InboxHandler {
        InboxHandler::new("ingest")
    }

    #[tokio::test]
    async fn upload_produces_ingest_trigger() {
        let body = json!({
            "user": "alice",
            "filepath": "/ega/alice/f.c4gh",
            "operation": "upload",
            "encrypted_checksums": [{"type": "sha256", "value": "abc"}]
        });
        let out = handler()
            .handle(body.to_string().as_bytes())
            .await
            .expect("handled")
            .expect("outbound");
        assert_eq!(out.queue, "ingest");
        let published: Value = serde_json::from_slice(&out.payload).expect("payload");
        assert_eq!(
            published,
            json!({
                "type": "ingest",
                "user": "alice",
                "filepath": "/ega/alice/f.c4gh",
                "encrypted_checksums": [{"type": "sha256", "value": "abc"}]
            })
        );
    }

    #[tokio::test]
    async fn upload_without_checksums_omits_the_field() {
        let body = json!({"user": "u", "filepath": "/p/f", "operation": "upload"});
        let out = handler()
            .handle(body.to_string().as_bytes())
            .await
            .expect("handled")
            .expect("outbound");
        let published: Value = serde_json::from_slice(&out.payload).expect("payload");
        assert_eq!(
            published,
            json!({"type": "ingest", "user": "u", "filepath": "/p/f"})
        );
    }

    #[tokio::test]
    async fn rename_is_validated_but_produces_nothing() {
        let body = json!({
            "user": "u",
            "oldpath": "/x",
            "filepath": "/y",
            "operation": "rename"
        });
        let out = handler().handle(body.to_string().as_bytes()).await.expect("handled");
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn remove_is_validated_but_produces_nothing() {
        let body = json!({"user": "u", "filepath": "/y", "operation": "remove"});
        let out = handler().handle(body.to_string().as_bytes()).await.expect("handled");
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn bare_slash_filepath_is_rejected() {
        let body = json!({"user": "u", "filepath": "/", "operation": "upload"});
        let err = handler().handle(body.to_string().as_bytes()).await.unwrap_err();
        assert!(matches!(err, StageError::InvalidPath { filepath } if filepath == "/"));
    }

    #[tokio::test]
    async fn dot_and_dotdot_components_are_rejected() {
        for bad in ["/a/.", "/a/.."] {
            let body = json!({"user": "u", "filepath": bad, "operation": "upload"});
            let err = handler().handle(body.to_string().as_bytes()).await.unwrap_err();
            assert!(matches!(err, StageError::InvalidPath { .. }), "{bad}");
        }
    }

    #[tokio::test]
    async fn missing_operation_is_reported() {
        let body = json!({"user": "u", "filepath": "/p/f"});
        let err = handler().handle(body.to_string().as_bytes()).await.unwrap_err();
        assert!(matches!(err, StageError::MissingField { field } if field == "operation"));
    }

    #[tokio::test]
    async fn unknown_operation_is_reported() {
        let body = json!({"user": "u", "filepath": "/p/f", "operation": "defragment"});
        let err = handler().handle(body.to_string().as_bytes()).await.unwrap_err();
        assert!(
            matches!(err, StageError::UnknownOperation { operation } if operation == "defragment")
        );
    }

    #[tokio::test]
    async fn rename_without_oldpath_fails_validation() {
        let body = json!({"user": "u", "filepath": "/y", "operation": "rename"});
        let err = handler().handle(body.to_string().as_bytes()).await.unwrap_err();
        assert!(matches!(err, StageError::Validation(_)));
    }

    #[tokio::test]
    async fn non_json_body_is_reported() {
        let err = handler().handle(b"not json").await.unwrap_err();
        assert!(matches!(err, StageError::Json { .. }));
    }

    #[test]
    fn upload_path_rules() {
        assert!(valid_upload_path("/ega/alice/f.c4gh"));
        assert!(valid_upload_path("f.c4gh"));
        assert!(!valid_upload_path("/"));
        assert!(!valid_upload_path(""));
        assert!(!valid_upload_path("/a/"));
        assert!(!valid_upload_path("/a/."));
        assert!(!valid_upload_path("/a/.."));
    }
}
