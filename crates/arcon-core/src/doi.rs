//! Reqwest-based client for the DataCite-style DOI API.
//!
//! Drafts a DOI for a newly archived dataset and later publishes it. The
//! client is a thin HTTP adapter: transport faults (connection refused,
//! timeouts) are retried a bounded number of times with a doubling delay;
//! HTTP error statuses are surfaced as [`DoiError::Api`] without retry.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::DoiSettings;
use crate::error::DoiError;

/// Maximum send attempts for one logical request.
const RETRY_ATTEMPTS: u32 = 3;

/// Delay before the first retry; doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// A minted DOI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoiObject {
    /// The suffix under the configured prefix.
    pub suffix: String,
    /// The full `<prefix>/<suffix>` identifier.
    pub full_doi: String,
}

/// HTTP client for the DOI API.
///
/// Uses basic authentication with the configured credentials. Drafted DOIs
/// are not findable until [`DoiClient::set_state`] publishes them.
pub struct DoiClient {
    client: reqwest::Client,
    api: String,
    prefix: String,
    user: String,
    key: String,
}

#[derive(Serialize)]
struct DoiEnvelope<T> {
    data: DoiData<T>,
}

#[derive(Serialize)]
struct DoiData<T> {
    #[serde(rename = "type")]
    kind: &'static str,
    attributes: T,
}

impl<T> DoiEnvelope<T> {
    fn new(attributes: T) -> Self {
        Self {
            data: DoiData {
                kind: "dois",
                attributes,
            },
        }
    }
}

#[derive(Serialize)]
struct DraftAttributes<'a> {
    prefix: &'a str,
    titles: Vec<TitleEntry>,
    creators: Vec<CreatorEntry>,
}

#[derive(Serialize)]
struct TitleEntry {
    title: String,
}

#[derive(Serialize)]
struct CreatorEntry {
    name: String,
}

#[derive(Serialize)]
struct EventAttributes<'a> {
    event: &'a str,
}

#[derive(Deserialize)]
struct DoiResponse {
    data: DoiResponseData,
}

#[derive(Deserialize)]
struct DoiResponseData {
    attributes: DoiAttributes,
}

#[derive(Deserialize)]
struct DoiAttributes {
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    suffix: Option<String>,
}

impl DoiClient {
    /// Create a new DOI client from settings.
    pub fn new(settings: &DoiSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            api: settings.api.trim_end_matches('/').to_string(),
            prefix: settings.prefix.clone(),
            user: settings.user.clone(),
            key: settings.key.clone(),
        }
    }

    /// Draft a DOI for a file with minimal metadata.
    ///
    /// The draft carries the archive user as creator and the file name as
    /// title; full metadata curation happens in the registry, not here.
    pub async fn create_draft(&self, user: &str, filepath: &str) -> Result<DoiObject, DoiError> {
        let title = filepath.rsplit('/').next().unwrap_or(filepath);
        let body = DoiEnvelope::new(DraftAttributes {
            prefix: &self.prefix,
            titles: vec![TitleEntry {
                title: title.to_string(),
            }],
            creators: vec![CreatorEntry {
                name: user.to_string(),
            }],
        });

        let url = format!("{}/dois", self.api);
        let response = self
            .send_with_retry(|| {
                self.client
                    .post(&url)
                    .basic_auth(&self.user, Some(&self.key))
                    .json(&body)
            })
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DoiError::Api { status, message });
        }

        let parsed: DoiResponse = response.json().await.map_err(|e| DoiError::Parse {
            message: e.to_string(),
        })?;
        let full_doi = parsed.data.attributes.doi.ok_or_else(|| DoiError::Parse {
            message: "response carries no doi".to_string(),
        })?;
        // DataCite reports the suffix separately; fall back to splitting the
        // DOI for servers that omit it.
        let suffix = match parsed.data.attributes.suffix {
            Some(suffix) => suffix,
            None => full_doi
                .split_once('/')
                .map(|(_, s)| s.to_string())
                .ok_or_else(|| DoiError::Parse {
                    message: format!("doi '{full_doi}' has no suffix"),
                })?,
        };

        tracing::info!(doi = %full_doi, "drafted DOI");
        Ok(DoiObject { suffix, full_doi })
    }

    /// Transition a DOI; the orchestrator only uses `"publish"`.
    pub async fn set_state(&self, state: &str, suffix: &str) -> Result<(), DoiError> {
        let body = DoiEnvelope::new(EventAttributes { event: state });
        let url = format!("{}/dois/{}", self.api, suffix);
        let response = self
            .send_with_retry(|| {
                self.client
                    .put(&url)
                    .basic_auth(&self.user, Some(&self.key))
                    .json(&body)
            })
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DoiError::Api { status, message });
        }

        tracing::info!(suffix, state, "transitioned DOI");
        Ok(())
    }

    /// Send a request, retrying transport faults with a doubling delay.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, DoiError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < RETRY_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "transport fault talking to DOI API, retrying");
                    tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt - 1)).await;
                }
                Err(e) => return Err(DoiError::Network { source: e }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(api: String) -> DoiSettings {
        DoiSettings {
            api,
            prefix: "10.0".to_string(),
            user: "doi-user".to_string(),
            key: "doi-key".to_string(),
        }
    }

    #[tokio::test]
    async fn create_draft_returns_suffix_and_full_doi() {
        let server = MockServer::start().await;
        let client = DoiClient::new(&settings(server.uri()));

        Mock::given(method("POST"))
            .and(path("/dois"))
            .and(body_partial_json(json!({
                "data": {"type": "dois", "attributes": {"prefix": "10.0"}}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "data": {
                    "id": "10.0/xyz",
                    "attributes": {"doi": "10.0/xyz", "suffix": "xyz", "state": "draft"}
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let doi = client.create_draft("alice", "/ega/alice/f.c4gh").await.expect("draft");
        assert_eq!(
            doi,
            DoiObject {
                suffix: "xyz".to_string(),
                full_doi: "10.0/xyz".to_string()
            }
        );
    }

    #[tokio::test]
    async fn create_draft_derives_suffix_when_absent() {
        let server = MockServer::start().await;
        let client = DoiClient::new(&settings(server.uri()));

        Mock::given(method("POST"))
            .and(path("/dois"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "data": {"attributes": {"doi": "10.0/abc"}}
            })))
            .mount(&server)
            .await;

        let doi = client.create_draft("u", "/p/f").await.expect("draft");
        assert_eq!(doi.suffix, "abc");
    }

    #[tokio::test]
    async fn create_draft_maps_http_error_without_retry() {
        let server = MockServer::start().await;
        let client = DoiClient::new(&settings(server.uri()));

        Mock::given(method("POST"))
            .and(path("/dois"))
            .respond_with(ResponseTemplate::new(422).set_body_string("prefix missing"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client.create_draft("u", "/p/f").await.unwrap_err();
        match err {
            DoiError::Api { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "prefix missing");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn set_state_puts_event_to_suffix_path() {
        let server = MockServer::start().await;
        let client = DoiClient::new(&settings(server.uri()));

        Mock::given(method("PUT"))
            .and(path("/dois/xyz"))
            .and(body_partial_json(json!({
                "data": {"attributes": {"event": "publish"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .expect(1)
            .mount(&server)
            .await;

        client.set_state("publish", "xyz").await.expect("publish");
    }

    #[tokio::test]
    async fn connection_refused_surfaces_as_network_error() {
        // Nothing listens on this port; the client should retry its bounded
        // number of attempts and then report the transport fault.
        let client = DoiClient::new(&settings("http://127.0.0.1:9".to_string()));
        let err = client.create_draft("u", "/p/f").await.unwrap_err();
        assert!(matches!(err, DoiError::Network { .. }));
    }
}
