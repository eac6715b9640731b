use async_trait::async_trait;
use permita_application::{OutboxMessage, OutboxRepository};
use permita_core::{AppError, AppResult};
use sqlx::{PgPool, Postgres, QueryBuilder};

/// PostgreSQL-backed outbox for messages that could not be published.
#[derive(Clone)]
pub struct PostgresOutboxRepository {
    pool: PgPool,
}

impl PostgresOutboxRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxRepository for PostgresOutboxRepository {
    async fn save_messages(&self, messages: Vec<OutboxMessage>) -> AppResult<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO outbox_messages (message_id, message_body, message_headers) ",
        );
        builder.push_values(messages, |mut row, message| {
            row.push_bind(message.message_id)
                .push_bind(message.message_body)
                .push_bind(message.message_headers);
        });
        builder.push(" ON CONFLICT (message_id) DO NOTHING");

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|error| AppError::operation_failed("outbox", "save_messages", error))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use permita_application::{OutboxMessage, OutboxRepository};
    use serde_json::json;
    use uuid::Uuid;

    use super::PostgresOutboxRepository;
    use crate::postgres_test_pool::test_pool;

    #[tokio::test]
    async fn messages_are_appended_once() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let repository = PostgresOutboxRepository::new(pool.clone());
        let message = OutboxMessage {
            message_id: Uuid::new_v4(),
            message_body: json!({ "activity": "GrantAccess" }),
            message_headers: json!({ "tenant_id": "T1" }),
        };

        assert!(repository.save_messages(vec![message.clone()]).await.is_ok());
        assert!(repository.save_messages(vec![message.clone()]).await.is_ok());
        assert!(repository.save_messages(Vec::new()).await.is_ok());

        let stored = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM outbox_messages WHERE message_id = $1 AND dispatched_at IS NULL",
        )
        .bind(message.message_id)
        .fetch_one(&pool)
        .await;
        assert!(stored.is_ok_and(|count| count == 1));
    }
}
