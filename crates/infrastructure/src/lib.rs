//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod http_authority_client;
mod http_credential_provider;
mod in_memory_metrics_recorder;
mod in_memory_policy_data_cache;
mod postgres_activity_group_repository;
mod postgres_grant_repository;
mod postgres_outbox_repository;
mod postgres_scope;
mod postgres_transaction_manager;
mod redis_integration_event_source;
mod redis_message_bus;
mod redis_policy_data_cache;

#[cfg(test)]
mod postgres_test_pool;

pub use http_authority_client::{AuthorityClientSettings, HttpAuthorityClient};
pub use http_credential_provider::{ClientCredentialsSettings, HttpCredentialProvider};
pub use in_memory_metrics_recorder::{ActivityMetrics, InMemoryMetricsRecorder};
pub use in_memory_policy_data_cache::InMemoryPolicyDataCache;
pub use postgres_activity_group_repository::PostgresActivityGroupRepository;
pub use postgres_grant_repository::PostgresGrantRepository;
pub use postgres_outbox_repository::PostgresOutboxRepository;
pub use postgres_transaction_manager::PostgresTransactionManager;
pub use redis_integration_event_source::{
    IntegrationStreamSettings, RedisIntegrationEventSource,
};
pub use redis_message_bus::RedisMessageBus;
pub use redis_policy_data_cache::RedisPolicyDataCache;

/// Directory-embedded migrations for the PostgreSQL adapters.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
