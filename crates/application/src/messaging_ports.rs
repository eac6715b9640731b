use async_trait::async_trait;
use chrono::{DateTime, Utc};
use permita_core::AppResult;
use permita_domain::IntegrationEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Headers carried by every published message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeaders {
    /// Tenant the message belongs to.
    pub tenant_id: String,
    /// Correlation id of the originating request.
    pub correlation_id: String,
    /// Version tag of the state the message describes.
    pub etag: Option<String>,
}

/// Message handed to the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Unique message id, reused when the message lands in the outbox.
    pub message_id: Uuid,
    /// Message type name.
    pub message_type: String,
    /// JSON body.
    pub body: Value,
    /// Transport headers.
    pub headers: MessageHeaders,
}

/// Message persisted for later re-publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Unique message id.
    pub message_id: Uuid,
    /// Serialized message body.
    pub message_body: Value,
    /// Serialized transport headers.
    pub message_headers: Value,
}

impl From<&OutboundMessage> for OutboxMessage {
    fn from(message: &OutboundMessage) -> Self {
        let message_headers = serde_json::json!({
            "message_type": message.message_type,
            "tenant_id": message.headers.tenant_id,
            "correlation_id": message.headers.correlation_id,
            "etag": message.headers.etag,
        });

        Self {
            message_id: message.message_id,
            message_body: message.body.clone(),
            message_headers,
        }
    }
}

/// Audit record published when an auditable activity completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Activity name.
    pub activity: String,
    /// Activity category label.
    pub kind: String,
    /// Tenant of the acting principal, if any.
    pub tenant_id: Option<String>,
    /// Acting subject, if any.
    pub subject: Option<String>,
    /// Correlation id of the request.
    pub correlation_id: String,
    /// Captured request state.
    pub before: Value,
    /// Captured outcome state.
    pub after: Value,
    /// Completion instant.
    pub occurred_at: DateTime<Utc>,
}

/// At-least-once message bus port.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes one message.
    async fn publish(&self, message: &OutboundMessage) -> AppResult<()>;
}

/// Durable outbox port for messages that failed to publish.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Appends messages in one write.
    async fn save_messages(&self, messages: Vec<OutboxMessage>) -> AppResult<()>;
}

/// Integration event read from the inbound stream but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Transport id used to acknowledge the delivery.
    pub delivery_id: String,
    /// Correlation id propagated by the publisher, if any.
    pub correlation_id: Option<String>,
    /// Decoded event.
    pub event: IntegrationEvent,
}

/// At-least-once source of authority integration events.
///
/// Deliveries that are never acknowledged are handed out again after a restart.
#[async_trait]
pub trait IntegrationEventSource: Send + Sync {
    /// Returns the next batch, empty when nothing is waiting.
    async fn receive(&self) -> AppResult<Vec<InboundEvent>>;

    /// Marks one delivery as handled.
    async fn acknowledge(&self, delivery_id: &str) -> AppResult<()>;
}
