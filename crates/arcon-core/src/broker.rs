//! AMQP broker runtime.
//!
//! One connection per process, one manual-ack subscription, deliveries
//! processed strictly one at a time. A handler success publishes the
//! outbound message (persistent, correlation id propagated) before the
//! delivery is acknowledged; a handler failure publishes an error record to
//! the error queue and rejects the delivery without requeue. Session-level
//! AMQP failures re-enter the connect loop; ctrl-c closes the connection and
//! returns cleanly.

use std::time::Duration;

use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicRejectOptions,
};
use lapin::tcp::{OwnedIdentity, OwnedTLSConfig};
use lapin::types::{FieldTable, ShortString};
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Connection, ConnectionProperties};
use serde_json::Value;

use crate::config::BrokerSettings;
use crate::error::{BrokerError, StageError};
use crate::messages::ErrorRecord;
use crate::schema;
use crate::stages::StageHandler;

/// Upper bound on the connect backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// A long-lived consumer bound to one queue.
pub struct Consumer {
    settings: BrokerSettings,
    queue: String,
}

impl Consumer {
    /// Create a consumer for the given queue.
    pub fn new(settings: BrokerSettings, queue: impl Into<String>) -> Self {
        Self {
            settings,
            queue: queue.into(),
        }
    }

    /// Run the consume loop until shutdown.
    ///
    /// Reconnects (with backoff) whenever the AMQP session fails; returns
    /// `Ok(())` on ctrl-c and `Err` only when the connect loop gives up.
    pub async fn run(&self, handler: &dyn StageHandler) -> Result<(), BrokerError> {
        loop {
            let connection = self.connect().await?;
            match self.consume(&connection, handler).await {
                Ok(()) => {
                    let _ = connection.close(200, "shutdown").await;
                    tracing::info!(stage = handler.stage(), "consumer stopped");
                    return Ok(());
                }
                Err(error) => {
                    tracing::error!(%error, "AMQP session failed, reconnecting");
                }
            }
        }
    }

    /// Establish a connection, retrying with bounded backoff.
    async fn connect(&self) -> Result<Connection, BrokerError> {
        let uri = self.uri();
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let options = ConnectionProperties::default()
                .with_executor(tokio_executor_trait::Tokio::current())
                .with_reactor(tokio_reactor_trait::Tokio::default());
            let result = if self.settings.ssl {
                Connection::connect_uri_with_config(uri.clone(), options, self.tls_config()?).await
            } else {
                Connection::connect_uri(uri.clone(), options).await
            };
            match result {
                Ok(connection) => {
                    tracing::info!(
                        host = %self.settings.host,
                        vhost = %self.settings.vhost,
                        "established AMQP connection"
                    );
                    return Ok(connection);
                }
                Err(error) => {
                    tracing::error!(%error, attempt = attempts, "failed to connect to broker");
                    if let Some(max) = self.settings.max_retries {
                        if attempts > max {
                            return Err(BrokerError::RetriesExhausted { attempts });
                        }
                    }
                    tokio::time::sleep(backoff_delay(attempts)).await;
                }
            }
        }
    }

    /// Subscribe and process deliveries until shutdown or session failure.
    async fn consume(
        &self,
        connection: &Connection,
        handler: &dyn StageHandler,
    ) -> Result<(), BrokerError> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|source| BrokerError::Protocol { source })?;
        let consumer_tag = format!("arcon-{}", handler.stage());
        let mut deliveries = channel
            .basic_consume(
                &self.queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| BrokerError::Protocol { source })?;
        tracing::info!(queue = %self.queue, stage = handler.stage(), "consuming");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown requested");
                    return Ok(());
                }
                delivery = deliveries.next() => match delivery {
                    Some(Ok(delivery)) => self.process(connection, handler, delivery).await?,
                    Some(Err(source)) => return Err(BrokerError::Protocol { source }),
                    None => return Err(BrokerError::SessionEnded),
                },
            }
        }
    }

    /// Handle one delivery: exactly one of ack or reject happens before the
    /// next delivery is taken.
    async fn process(
        &self,
        connection: &Connection,
        handler: &dyn StageHandler,
        delivery: Delivery,
    ) -> Result<(), BrokerError> {
        let correlation_id = delivery.properties.correlation_id().clone();
        tracing::debug!(
            stage = handler.stage(),
            correlation_id = ?correlation_id,
            bytes = delivery.data.len(),
            "delivery received"
        );

        match handler.handle(&delivery.data).await {
            Ok(outbound) => {
                if let Some(message) = outbound {
                    self.publish(connection, &message.queue, &message.payload, correlation_id)
                        .await?;
                }
                delivery
                    .ack(BasicAckOptions::default())
                    .await
                    .map_err(|source| BrokerError::Protocol { source })?;
            }
            Err(error) => {
                tracing::error!(
                    stage = handler.stage(),
                    %error,
                    "handler failed, emitting error record"
                );
                if let Err(fanout) = self
                    .publish_error(connection, &delivery.data, &error, correlation_id)
                    .await
                {
                    tracing::error!(%fanout, "failed to publish error record");
                }
                delivery
                    .reject(BasicRejectOptions { requeue: false })
                    .await
                    .map_err(|source| BrokerError::Protocol { source })?;
            }
        }
        Ok(())
    }

    /// Shape, validate and publish the error record for a failed delivery.
    async fn publish_error(
        &self,
        connection: &Connection,
        payload: &[u8],
        error: &StageError,
        correlation_id: Option<ShortString>,
    ) -> Result<(), BrokerError> {
        let raw: Value = serde_json::from_slice(payload).unwrap_or(Value::Null);
        let record = ErrorRecord::from_payload(&raw, error.to_string());
        let mut value = serde_json::to_value(&record).map_err(|source| {
            BrokerError::ErrorRecordInvalid {
                source: StageError::Json { source },
            }
        })?;
        schema::validate("ingestion-user-error", &mut value)
            .map_err(|source| BrokerError::ErrorRecordInvalid { source })?;
        let body = serde_json::to_vec(&value).map_err(|source| BrokerError::ErrorRecordInvalid {
            source: StageError::Json { source },
        })?;
        self.publish(connection, &self.settings.error_queue, &body, correlation_id)
            .await
    }

    /// Publish a persistent JSON message on the configured exchange.
    ///
    /// A channel is opened for the publish and closed right after; the
    /// consume channel stays dedicated to deliveries.
    async fn publish(
        &self,
        connection: &Connection,
        queue: &str,
        payload: &[u8],
        correlation_id: Option<ShortString>,
    ) -> Result<(), BrokerError> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|source| BrokerError::Protocol { source })?;
        let mut properties = BasicProperties::default()
            .with_content_type(ShortString::from("application/json"))
            .with_delivery_mode(2);
        if let Some(id) = correlation_id {
            properties = properties.with_correlation_id(id);
        }
        channel
            .basic_publish(
                &self.settings.exchange,
                queue,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|source| BrokerError::Publish {
                queue: queue.to_string(),
                source,
            })?
            .await
            .map_err(|source| BrokerError::Publish {
                queue: queue.to_string(),
                source,
            })?;
        let _ = channel.close(200, "publish complete").await;
        tracing::debug!(queue, exchange = %self.settings.exchange, "published message");
        Ok(())
    }

    fn uri(&self) -> AMQPUri {
        AMQPUri {
            scheme: if self.settings.ssl {
                AMQPScheme::AMQPS
            } else {
                AMQPScheme::AMQP
            },
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.settings.user.clone(),
                    password: self.settings.password.clone(),
                },
                host: self.settings.host.clone(),
                port: self.settings.port,
            },
            vhost: self.settings.vhost.clone(),
            query: AMQPQueryString::default(),
        }
    }

    /// Assemble the TLS configuration from whichever cert files exist.
    fn tls_config(&self) -> Result<OwnedTLSConfig, BrokerError> {
        let read_tls = |path: &std::path::Path| {
            std::fs::read(path).map_err(|source| BrokerError::Tls {
                path: path.display().to_string(),
                source,
            })
        };

        let mut config = OwnedTLSConfig::default();
        if self.settings.cacert.is_file() {
            config.cert_chain = Some(
                String::from_utf8_lossy(&read_tls(&self.settings.cacert)?).into_owned(),
            );
        }
        if self.settings.client_cert.is_file() && self.settings.client_key.is_file() {
            config.identity = Some(OwnedIdentity::PKCS8 {
                pem: read_tls(&self.settings.client_cert)?,
                key: read_tls(&self.settings.client_key)?,
            });
        }
        Ok(config)
    }
}

/// Backoff before connect attempt `n + 1`: `min(2n, 30)` seconds.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt) * 2).min(MAX_BACKOFF)
}
