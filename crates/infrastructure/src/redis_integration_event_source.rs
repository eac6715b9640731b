//! Redis Streams consumer for authority integration events.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use permita_application::{InboundEvent, IntegrationEventSource};
use permita_core::{AppError, AppResult};
use permita_domain::IntegrationEvent;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadReply};
use tracing::{info, warn};

const RESOURCE: &str = "integration_stream";

/// Stream and consumer group the worker reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationStreamSettings {
    /// Stream the authority appends events to.
    pub stream_key: String,
    /// Consumer group shared by every worker instance.
    pub consumer_group: String,
    /// Name of this instance within the group.
    pub consumer_name: String,
    /// Maximum entries read per batch.
    pub batch_size: usize,
}

/// Reads events through a consumer group and acknowledges them with `XACK`.
///
/// Entries this consumer received but never acknowledged are replayed first, oldest first,
/// before new entries are requested.
pub struct RedisIntegrationEventSource {
    client: redis::Client,
    settings: IntegrationStreamSettings,
    replay_cursor: Mutex<Option<String>>,
}

impl RedisIntegrationEventSource {
    /// Creates a source for the configured stream and group.
    #[must_use]
    pub fn new(client: redis::Client, settings: IntegrationStreamSettings) -> Self {
        Self {
            client,
            settings,
            replay_cursor: Mutex::new(Some("0".to_owned())),
        }
    }

    /// Creates the stream and consumer group when they do not exist yet.
    pub async fn ensure_consumer_group(&self) -> AppResult<()> {
        let mut connection = self.connection().await?;
        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(self.settings.stream_key.as_str())
            .arg(self.settings.consumer_group.as_str())
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut connection)
            .await;

        match created {
            Ok(_) => {
                info!(
                    stream_key = self.settings.stream_key.as_str(),
                    consumer_group = self.settings.consumer_group.as_str(),
                    "created integration consumer group"
                );
                Ok(())
            }
            Err(error) if error.code() == Some("BUSYGROUP") => Ok(()),
            Err(error) => Err(AppError::operation_failed(RESOURCE, "create_group", error)),
        }
    }

    async fn connection(&self) -> AppResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::operation_failed(RESOURCE, "connect", error))
    }

    fn replay_cursor(&self) -> Option<String> {
        self.replay_cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_replay_cursor(&self, cursor: Option<String>) {
        *self
            .replay_cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = cursor;
    }

    async fn read_group(
        &self,
        connection: &mut MultiplexedConnection,
        start: &str,
    ) -> AppResult<Vec<StreamId>> {
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(self.settings.consumer_group.as_str())
            .arg(self.settings.consumer_name.as_str())
            .arg("COUNT")
            .arg(self.settings.batch_size.max(1))
            .arg("STREAMS")
            .arg(self.settings.stream_key.as_str())
            .arg(start)
            .query_async(connection)
            .await
            .map_err(|error| AppError::operation_failed(RESOURCE, "read_group", error))?;

        Ok(reply
            .map(|reply| {
                reply
                    .keys
                    .into_iter()
                    .flat_map(|stream| stream.ids)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ack(&self, connection: &mut MultiplexedConnection, entry_id: &str) -> AppResult<()> {
        let _: u64 = redis::cmd("XACK")
            .arg(self.settings.stream_key.as_str())
            .arg(self.settings.consumer_group.as_str())
            .arg(entry_id)
            .query_async(connection)
            .await
            .map_err(|error| AppError::operation_failed(RESOURCE, "acknowledge", error))?;
        Ok(())
    }

    /// Decodes a batch; undecodable entries are acknowledged and dropped.
    async fn decode_batch(
        &self,
        connection: &mut MultiplexedConnection,
        entries: Vec<StreamId>,
    ) -> AppResult<Vec<InboundEvent>> {
        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            match decode_entry(
                entry.id.as_str(),
                entry.get::<String>("body"),
                entry.get::<String>("correlation_id"),
            ) {
                Ok(event) => events.push(event),
                Err(error) => {
                    warn!(
                        entry_id = entry.id.as_str(),
                        error = %error,
                        "dropping undecodable integration event"
                    );
                    self.ack(connection, entry.id.as_str()).await?;
                }
            }
        }
        Ok(events)
    }
}

fn decode_entry(
    entry_id: &str,
    body: Option<String>,
    correlation_id: Option<String>,
) -> AppResult<InboundEvent> {
    let body = body.ok_or_else(|| {
        AppError::Validation(format!("stream entry '{entry_id}' has no body field"))
    })?;
    let event = serde_json::from_str::<IntegrationEvent>(body.as_str())
        .map_err(|error| AppError::operation_failed(RESOURCE, "decode", error))?;

    Ok(InboundEvent {
        delivery_id: entry_id.to_owned(),
        correlation_id: correlation_id.filter(|value| !value.trim().is_empty()),
        event,
    })
}

#[async_trait]
impl IntegrationEventSource for RedisIntegrationEventSource {
    async fn receive(&self) -> AppResult<Vec<InboundEvent>> {
        let mut connection = self.connection().await?;

        if let Some(cursor) = self.replay_cursor() {
            let pending = self.read_group(&mut connection, cursor.as_str()).await?;
            match pending.last() {
                Some(last) => {
                    self.set_replay_cursor(Some(last.id.clone()));
                    return self.decode_batch(&mut connection, pending).await;
                }
                None => self.set_replay_cursor(None),
            }
        }

        let fresh = self.read_group(&mut connection, ">").await?;
        self.decode_batch(&mut connection, fresh).await
    }

    async fn acknowledge(&self, delivery_id: &str) -> AppResult<()> {
        let mut connection = self.connection().await?;
        self.ack(&mut connection, delivery_id).await
    }
}

#[cfg(test)]
mod tests {
    use permita_core::AppError;

    use super::decode_entry;

    #[test]
    fn entry_decodes_with_correlation_id() {
        let body = r#"{
            "type": "activity_group_grant_granted",
            "tenant_id": "T1",
            "user_id": "alice",
            "activity_group_name": "G1"
        }"#;

        let decoded = decode_entry(
            "1700000000000-0",
            Some(body.to_owned()),
            Some("corr-9".to_owned()),
        );

        let Ok(inbound) = decoded else {
            panic!("entry should decode");
        };
        assert_eq!(inbound.delivery_id, "1700000000000-0");
        assert_eq!(inbound.correlation_id.as_deref(), Some("corr-9"));
        assert_eq!(inbound.event.name(), "activity_group_grant_granted");
    }

    #[test]
    fn blank_correlation_id_is_dropped() {
        let body =
            r#"{"type": "activity_group_deleted", "tenant_id": "T1", "activity_group_name": "G1"}"#;

        let decoded = decode_entry("1-0", Some(body.to_owned()), Some("  ".to_owned()));

        assert!(decoded.is_ok_and(|inbound| inbound.correlation_id.is_none()));
    }

    #[test]
    fn missing_or_malformed_body_is_rejected() {
        assert!(matches!(
            decode_entry("1-0", None, None),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            decode_entry("1-0", Some(r#"{"type": "unknown"}"#.to_owned()), None),
            Err(AppError::OperationFailed { .. })
        ));
    }
}
