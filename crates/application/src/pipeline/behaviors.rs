use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use permita_core::{AppError, AppResult, WILDCARD};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache_invalidation::remove_all;
use crate::{
    ActivitySample, AuditEvent, MessageBus, MessageHeaders, MetricsRecorder, OutboundMessage,
    OutboxMessage, OutboxRepository, PolicyDataCache, PolicyDataProvider, TransactionManager,
    TransactionOptions,
};

use super::{Activity, ActivityOutput, Behavior, Next, PipelineStage, RequestContext, Validator};

const AUDIT_MESSAGE_TYPE: &str = "activity_audited";

/// Logs every request and its outcome; the only stage that logs failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingBehavior;

#[async_trait]
impl<A: Activity> Behavior<A> for LoggingBehavior {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Logging
    }

    async fn handle(
        &self,
        context: &mut RequestContext,
        activity: A,
        next: Next<'_, A>,
    ) -> AppResult<A::Output> {
        let descriptor = A::DESCRIPTOR;
        let correlation_id = context.correlation_id().to_owned();
        debug!(
            activity = descriptor.name,
            kind = descriptor.kind.as_str(),
            correlation_id = %correlation_id,
            request = ?activity,
            "handling activity"
        );

        let result = next.run(context, activity).await;

        match &result {
            Ok(output) => info!(
                activity = descriptor.name,
                kind = descriptor.kind.as_str(),
                correlation_id = %correlation_id,
                output = ?output,
                "activity completed"
            ),
            Err(failure) => {
                let status = failure.status_code();
                if status.is_server_error() {
                    error!(
                        activity = descriptor.name,
                        kind = descriptor.kind.as_str(),
                        correlation_id = %correlation_id,
                        status = status.as_u16(),
                        error = %failure,
                        "activity failed"
                    );
                } else {
                    warn!(
                        activity = descriptor.name,
                        kind = descriptor.kind.as_str(),
                        correlation_id = %correlation_id,
                        status = status.as_u16(),
                        error = %failure,
                        "activity rejected"
                    );
                }
            }
        }

        result
    }
}

/// Records per-activity and untagged aggregate metrics.
#[derive(Clone)]
pub struct MetricsBehavior {
    recorder: Arc<dyn MetricsRecorder>,
}

impl MetricsBehavior {
    /// Creates the stage.
    #[must_use]
    pub fn new(recorder: Arc<dyn MetricsRecorder>) -> Self {
        Self { recorder }
    }
}

#[async_trait]
impl<A: Activity> Behavior<A> for MetricsBehavior {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Metrics
    }

    async fn handle(
        &self,
        context: &mut RequestContext,
        activity: A,
        next: Next<'_, A>,
    ) -> AppResult<A::Output> {
        let started = Instant::now();
        let result = next.run(context, activity).await;
        let duration = started.elapsed();

        let failure_status = result
            .as_ref()
            .err()
            .map(|failure| failure.status_code().as_u16());
        self.recorder.record_activity(&ActivitySample {
            name: A::DESCRIPTOR.name,
            kind: A::DESCRIPTOR.kind,
            duration,
            failure_status,
        });
        self.recorder
            .record_aggregate(duration, failure_status.is_some());

        result
    }
}

/// Publishes an audit event for completed work, falling back to the outbox.
#[derive(Clone)]
pub struct AuditBehavior {
    bus: Arc<dyn MessageBus>,
    outbox: Arc<dyn OutboxRepository>,
}

impl AuditBehavior {
    /// Creates the stage.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, outbox: Arc<dyn OutboxRepository>) -> Self {
        Self { bus, outbox }
    }

    async fn publish(&self, message: OutboundMessage) {
        let Err(publish_error) = self.bus.publish(&message).await else {
            return;
        };

        warn!(
            message_id = %message.message_id,
            correlation_id = %message.headers.correlation_id,
            error = %publish_error,
            "audit publish failed, writing to outbox"
        );

        if let Err(outbox_error) = self
            .outbox
            .save_messages(vec![OutboxMessage::from(&message)])
            .await
        {
            error!(
                message_id = %message.message_id,
                correlation_id = %message.headers.correlation_id,
                error = %outbox_error,
                "failed to write audit event to outbox"
            );
        }
    }
}

#[async_trait]
impl<A: Activity> Behavior<A> for AuditBehavior {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Audit
    }

    async fn handle(
        &self,
        context: &mut RequestContext,
        activity: A,
        next: Next<'_, A>,
    ) -> AppResult<A::Output> {
        let descriptor = A::DESCRIPTOR;
        let before = activity.audit_state();
        let output = next.run(context, activity).await?;

        if !output.performed_work() {
            debug!(
                activity = descriptor.name,
                correlation_id = context.correlation_id(),
                "no work performed, audit skipped"
            );
            return Ok(output);
        }

        let tenant_id = context
            .principal()
            .filter(|_| descriptor.capabilities.multi_tenant)
            .map(|principal| principal.tenant_id().to_string());
        let event = AuditEvent {
            activity: descriptor.name.to_owned(),
            kind: descriptor.kind.as_str().to_owned(),
            tenant_id: tenant_id.clone(),
            subject: context
                .principal()
                .map(|principal| principal.subject().to_owned()),
            correlation_id: context.correlation_id().to_owned(),
            before,
            after: output.audit_state(),
            occurred_at: Utc::now(),
        };

        let body = match serde_json::to_value(&event) {
            Ok(body) => body,
            Err(serialize_error) => {
                error!(
                    activity = descriptor.name,
                    error = %serialize_error,
                    "failed to serialize audit event"
                );
                return Ok(output);
            }
        };

        self.publish(OutboundMessage {
            message_id: Uuid::new_v4(),
            message_type: AUDIT_MESSAGE_TYPE.to_owned(),
            body,
            headers: MessageHeaders {
                tenant_id: tenant_id.unwrap_or_else(|| WILDCARD.to_owned()),
                correlation_id: context.correlation_id().to_owned(),
                etag: output.etag(),
            },
        })
        .await;

        Ok(output)
    }
}

/// Runs inner stages inside a unit of work, joining one that is already open.
///
/// Cache entries invalidated inside the unit of work are removed only after it commits and
/// are dropped on rollback.
#[derive(Clone)]
pub struct TransactionBehavior {
    manager: Arc<dyn TransactionManager>,
    cache: Arc<dyn PolicyDataCache>,
    options: TransactionOptions,
}

impl TransactionBehavior {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        manager: Arc<dyn TransactionManager>,
        cache: Arc<dyn PolicyDataCache>,
        options: TransactionOptions,
    ) -> Self {
        Self {
            manager,
            cache,
            options,
        }
    }
}

#[async_trait]
impl<A: Activity> Behavior<A> for TransactionBehavior {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Transaction
    }

    async fn handle(
        &self,
        context: &mut RequestContext,
        activity: A,
        next: Next<'_, A>,
    ) -> AppResult<A::Output> {
        if context.unit_of_work.is_some() {
            return next.run(context, activity).await;
        }

        let unit_of_work = self.manager.begin(&self.options).await?;
        context.unit_of_work = Some(unit_of_work.clone());
        let result = next.run(context, activity).await;
        context.unit_of_work = None;
        let stale_keys = context.take_deferred_invalidations();

        match result {
            Ok(output) => {
                unit_of_work.commit().await?;
                remove_all(self.cache.as_ref(), &stale_keys).await?;
                Ok(output)
            }
            Err(failure) => {
                if let Err(rollback_error) = unit_of_work.rollback().await {
                    warn!(
                        correlation_id = context.correlation_id(),
                        error = %rollback_error,
                        "rollback failed"
                    );
                }
                Err(failure)
            }
        }
    }
}

/// Rejects anonymous and unauthorized principals before validation runs.
#[derive(Clone)]
pub struct AuthorizationBehavior {
    provider: PolicyDataProvider,
}

impl AuthorizationBehavior {
    /// Creates the stage.
    #[must_use]
    pub fn new(provider: PolicyDataProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<A: Activity> Behavior<A> for AuthorizationBehavior {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Authorization
    }

    async fn handle(
        &self,
        context: &mut RequestContext,
        activity: A,
        next: Next<'_, A>,
    ) -> AppResult<A::Output> {
        let name = A::DESCRIPTOR.name;
        let Some(principal) = context.principal().cloned() else {
            return Err(AppError::NotAuthenticated(format!(
                "activity '{name}' requires an authenticated principal"
            )));
        };

        let policy = self.provider.within(context).get_policy(&principal).await?;
        let resource = activity.resource_id();
        if !policy.is_authorized(name, resource.as_deref())? {
            return Err(AppError::NotAuthorized(format!(
                "subject '{}' may not perform '{name}' in tenant '{}'",
                principal.subject(),
                principal.tenant_id()
            )));
        }

        context.access_token = principal.access_token().map(str::to_owned);
        next.run(context, activity).await
    }
}

/// Runs every registered validator and aggregates their failures.
pub struct ValidationBehavior<A: Activity> {
    validators: Vec<Arc<dyn Validator<A>>>,
}

impl<A: Activity> ValidationBehavior<A> {
    /// Creates the stage.
    #[must_use]
    pub fn new(validators: Vec<Arc<dyn Validator<A>>>) -> Self {
        Self { validators }
    }
}

#[async_trait]
impl<A: Activity> Behavior<A> for ValidationBehavior<A> {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Validation
    }

    async fn handle(
        &self,
        context: &mut RequestContext,
        activity: A,
        next: Next<'_, A>,
    ) -> AppResult<A::Output> {
        let failures = self
            .validators
            .iter()
            .flat_map(|validator| validator.validate(&activity))
            .collect::<Vec<_>>();
        if !failures.is_empty() {
            return Err(AppError::InvalidCommandOrQuery(failures));
        }

        next.run(context, activity).await
    }
}
