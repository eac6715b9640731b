//! Application services and ports.

#![forbid(unsafe_code)]

mod cache_invalidation;
mod grant_management;
mod grant_ports;
mod integration_event_consumer;
mod integration_event_handler;
mod messaging_ports;
mod metrics_ports;
mod pipeline;
mod policy_ports;
mod policy_service;
mod sync_jobs;
mod sync_ports;
mod sync_service;
mod token_cache;
mod transaction_ports;

#[cfg(test)]
mod test_fakes;

pub use grant_management::{
    CheckAccess, CheckAccessHandler, DeleteGrant, DeleteGrantHandler, GrantAccess,
    GrantAccessHandler, GrantAccessValidator, GrantKeyValidator, ListUserGrants,
    ListUserGrantsHandler, RevokeGrant, RevokeGrantHandler, activity_catalog,
};
pub use grant_ports::{
    ActivityGroupReplacement, ActivityGroupRepository, GrantReplacement, GrantRepository,
};
pub use integration_event_consumer::IntegrationEventConsumer;
pub use integration_event_handler::{
    HandleIntegrationEvent, IntegrationEventHandler, IntegrationEventOutcome,
};
pub use messaging_ports::{
    AuditEvent, InboundEvent, IntegrationEventSource, MessageBus, MessageHeaders,
    OutboundMessage, OutboxMessage, OutboxRepository,
};
pub use metrics_ports::{ActivitySample, MetricsRecorder};
pub use pipeline::{
    Activity, ActivityHandler, ActivityOutput, AuditBehavior, AuthorizationBehavior, Behavior,
    LoggingBehavior, MetricsBehavior, Next, Pipeline, PipelineBuilder, PipelineStage,
    RequestContext, TransactionBehavior, ValidationBehavior, Validator,
};
pub use policy_ports::{PolicyCacheKey, PolicyCacheSettings, PolicyDataCache, PolicyEvaluator};
pub use policy_service::{BuiltinPolicyEvaluator, Policy, PolicyDataProvider};
pub use sync_jobs::{
    JobOutcome, SyncActivityGroupsJob, SyncActivityGroupsJobHandler, SyncAllActivityGroupGrantsJob,
    SyncAllActivityGroupGrantsJobHandler,
};
pub use sync_ports::{AccessCredential, AuthorityClient, CredentialProvider};
pub use sync_service::{AuthorizationSyncService, SyncSummary};
pub use token_cache::{ServiceTokenCache, TokenCacheSettings};
pub use transaction_ports::{IsolationLevel, TransactionManager, TransactionOptions, UnitOfWork};
