//! Redis Streams message bus.

use async_trait::async_trait;
use permita_application::{MessageBus, OutboundMessage};
use permita_core::{AppError, AppResult};
use tracing::debug;

/// Publishes messages by appending them to one Redis stream.
#[derive(Clone)]
pub struct RedisMessageBus {
    client: redis::Client,
    stream_key: String,
}

impl RedisMessageBus {
    /// Creates a bus writing to the given stream.
    #[must_use]
    pub fn new(client: redis::Client, stream_key: impl Into<String>) -> Self {
        Self {
            client,
            stream_key: stream_key.into(),
        }
    }
}

fn stream_fields(message: &OutboundMessage) -> AppResult<Vec<(&'static str, String)>> {
    let body = serde_json::to_string(&message.body)
        .map_err(|error| AppError::operation_failed("message_bus", "encode", error))?;

    let mut fields = vec![
        ("message_id", message.message_id.to_string()),
        ("message_type", message.message_type.clone()),
        ("tenant_id", message.headers.tenant_id.clone()),
        ("correlation_id", message.headers.correlation_id.clone()),
        ("body", body),
    ];
    if let Some(etag) = &message.headers.etag {
        fields.push(("etag", etag.clone()));
    }
    Ok(fields)
}

#[async_trait]
impl MessageBus for RedisMessageBus {
    async fn publish(&self, message: &OutboundMessage) -> AppResult<()> {
        let fields = stream_fields(message)?;
        let mut connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::operation_failed("message_bus", "connect", error))?;

        let entry_id: String = redis::cmd("XADD")
            .arg(self.stream_key.as_str())
            .arg("*")
            .arg(fields)
            .query_async(&mut connection)
            .await
            .map_err(|error| AppError::operation_failed("message_bus", "publish", error))?;

        debug!(
            entry_id = entry_id.as_str(),
            message_id = %message.message_id,
            message_type = message.message_type.as_str(),
            "published message"
        );
        Ok(())
    }
}
