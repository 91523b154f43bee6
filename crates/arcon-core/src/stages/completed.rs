//! Completed stage: announces the dataset a newly archived file belongs to.

use serde_json::Value;

use super::{Outbound, StageHandler};
use crate::error::StageError;
use crate::identifier::DatasetRegistrar;
use crate::messages::{CompletedEvent, MappingTrigger};
use crate::schema;

/// Handler for the completed queue.
///
/// Obtains the dataset identifier through the configured strategy (a
/// registered DOI or a deterministic URN) and publishes the accession-to-
/// dataset mapping.
pub struct CompletedHandler {
    mappings_queue: String,
    registrar: DatasetRegistrar,
}

impl CompletedHandler {
    /// Create a handler with an explicit registrar.
    pub fn new(mappings_queue: impl Into<String>, registrar: DatasetRegistrar) -> Self {
        Self {
            mappings_queue: mappings_queue.into(),
            registrar,
        }
    }
}

#[async_trait::async_trait]
impl StageHandler for CompletedHandler {
    fn stage(&self) -> &'static str {
        "completed"
    }

    async fn handle(&self, body: &[u8]) -> Result<Option<Outbound>, StageError> {
        let mut value: Value =
            serde_json::from_slice(body).map_err(|source| StageError::Json { source })?;
        tracing::debug!(body = %value, "completed message received");

        schema::validate("ingestion-completion", &mut value)?;
        let event: CompletedEvent =
            serde_json::from_value(value).map_err(|source| StageError::Json { source })?;

        let dataset_id = self
            .registrar
            .dataset_id(&event.user, &event.filepath)
            .await?;

        let trigger = MappingTrigger {
            kind: "mapping".to_string(),
            dataset_id,
            accession_ids: vec![event.accession_id],
        };
        let mut out =
            serde_json::to_value(&trigger).map_err(|source| StageError::Json { source })?;
        schema::validate("dataset-mapping", &mut out)?;

        tracing::info!(
            filepath = %event.filepath,
            dataset_id = %trigger.dataset_id,
            accession_id = %trigger.accession_ids[0],
            queue = %self.mappings_queue,
            "publishing dataset mapping"
        );
        Ok(Some(Outbound {
            queue: self.mappings_queue.clone(),
            payload: serde_json::to_vec(&out).map_err(|source| StageError::Json { source })?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DoiSettings, OrchestratorConfig, RemsSettings};
    use crate::doi::DoiClient;
    use crate::rems::RemsClient;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completed_body() -> String {
        json!({
            "user": "u",
            "filepath": "/a/b/c",
            "accession_id": "urn:uuid:2a4e1eb0-6e3a-4b7e-8d4b-6f2f7a0f9e60",
            "decrypted_checksums": [{"type": "sha256", "value": "h"}]
        })
        .to_string()
    }

    #[tokio::test]
    async fn derived_mapping_uses_deterministic_dataset_id() {
        let handler = CompletedHandler::new("mappings", DatasetRegistrar::Derived);
        let out = handler
            .handle(completed_body().as_bytes())
            .await
            .expect("handled")
            .expect("outbound");
        assert_eq!(out.queue, "mappings");

        let published: Value = serde_json::from_slice(&out.payload).expect("payload");
        assert_eq!(
            published,
            json!({
                "type": "mapping",
                "dataset_id": "urn:dir:a",
                "accession_ids": ["urn:uuid:2a4e1eb0-6e3a-4b7e-8d4b-6f2f7a0f9e60"]
            })
        );
    }

    #[tokio::test]
    async fn incomplete_event_fails_validation() {
        let handler = CompletedHandler::new("mappings", DatasetRegistrar::Derived);
        let body = json!({"user": "u", "filepath": "/a/b/c"}).to_string();
        let err = handler.handle(body.as_bytes()).await.unwrap_err();
        assert!(matches!(err, StageError::Validation(_)));
    }

    #[tokio::test]
    async fn registered_mapping_drafts_registers_and_publishes_the_doi() {
        let doi_server = MockServer::start().await;
        let rems_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/dois"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "data": {"attributes": {"doi": "10.0/xyz", "suffix": "xyz"}}
            })))
            .expect(1)
            .mount(&doi_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/dois/xyz"))
            .and(body_partial_json(json!({
                "data": {"attributes": {"event": "publish"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .expect(1)
            .mount(&doi_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/organizations/ARC"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"organization/id": "ARC"})),
            )
            .mount(&rems_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/resources"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&rems_server)
            .await;
        // The resource must be registered under the drafted DOI.
        Mock::given(method("POST"))
            .and(path("/api/resources/create"))
            .and(body_partial_json(json!({"resid": "10.0/xyz"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"success": true, "id": 2})),
            )
            .expect(1)
            .mount(&rems_server)
            .await;
        for resource in ["licenses", "forms", "workflows", "catalogue-items"] {
            Mock::given(method("GET"))
                .and(path(format!("/api/{resource}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
                .mount(&rems_server)
                .await;
            Mock::given(method("POST"))
                .and(path(format!("/api/{resource}/create")))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(json!({"success": true, "id": 1})),
                )
                .expect(1)
                .mount(&rems_server)
                .await;
        }

        let registrar = DatasetRegistrar::Registered {
            doi: DoiClient::new(&DoiSettings {
                api: doi_server.uri(),
                prefix: "10.0".to_string(),
                user: "du".to_string(),
                key: "dk".to_string(),
            }),
            rems: RemsClient::new(
                &RemsSettings {
                    api: rems_server.uri(),
                    user: "ru".to_string(),
                    key: "rk".to_string(),
                },
                OrchestratorConfig::load(None).expect("default template").rems,
            ),
        };
        let handler = CompletedHandler::new("mappings", registrar);

        let out = handler
            .handle(completed_body().as_bytes())
            .await
            .expect("handled")
            .expect("outbound");
        let published: Value = serde_json::from_slice(&out.payload).expect("payload");
        assert_eq!(
            published,
            json!({
                "type": "mapping",
                "dataset_id": "10.0/xyz",
                "accession_ids": ["urn:uuid:2a4e1eb0-6e3a-4b7e-8d4b-6f2f7a0f9e60"]
            })
        );
    }

    #[tokio::test]
    async fn registry_failure_aborts_the_event_before_publication() {
        let doi_server = MockServer::start().await;
        let rems_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/dois"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "data": {"attributes": {"doi": "10.0/xyz", "suffix": "xyz"}}
            })))
            .expect(1)
            .mount(&doi_server)
            .await;
        // The DOI must never be published when registration fails.
        Mock::given(method("PUT"))
            .and(path("/dois/xyz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .expect(0)
            .mount(&doi_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/organizations/ARC"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&rems_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/organizations/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false})))
            .mount(&rems_server)
            .await;

        let registrar = DatasetRegistrar::Registered {
            doi: DoiClient::new(&DoiSettings {
                api: doi_server.uri(),
                prefix: "10.0".to_string(),
                user: "du".to_string(),
                key: "dk".to_string(),
            }),
            rems: RemsClient::new(
                &RemsSettings {
                    api: rems_server.uri(),
                    user: "ru".to_string(),
                    key: "rk".to_string(),
                },
                OrchestratorConfig::load(None).expect("default template").rems,
            ),
        };
        let handler = CompletedHandler::new("mappings", registrar);

        let err = handler.handle(completed_body().as_bytes()).await.unwrap_err();
        assert!(matches!(err, StageError::Rems(_)));
    }
}
