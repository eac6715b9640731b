use std::sync::Arc;

use permita_core::AppResult;

use crate::{
    MessageBus, MetricsRecorder, OutboxRepository, PolicyDataProvider, TransactionManager,
    TransactionOptions,
};

use super::{
    Activity, ActivityHandler, AuditBehavior, AuthorizationBehavior, Behavior, LoggingBehavior,
    MetricsBehavior, Pipeline, TransactionBehavior, ValidationBehavior, Validator,
};

/// Shared components every pipeline is composed from.
#[derive(Clone)]
pub struct PipelineBuilder {
    metrics: Arc<dyn MetricsRecorder>,
    bus: Arc<dyn MessageBus>,
    outbox: Arc<dyn OutboxRepository>,
    transactions: Arc<dyn TransactionManager>,
    transaction_options: TransactionOptions,
    policy: PolicyDataProvider,
}

impl PipelineBuilder {
    /// Creates a builder from the shared components.
    #[must_use]
    pub fn new(
        metrics: Arc<dyn MetricsRecorder>,
        bus: Arc<dyn MessageBus>,
        outbox: Arc<dyn OutboxRepository>,
        transactions: Arc<dyn TransactionManager>,
        transaction_options: TransactionOptions,
        policy: PolicyDataProvider,
    ) -> Self {
        Self {
            metrics,
            bus,
            outbox,
            transactions,
            transaction_options,
            policy,
        }
    }

    /// Composes the chain for one activity type from its declared capabilities.
    pub fn build<A: Activity>(
        &self,
        handler: impl ActivityHandler<A> + 'static,
        validators: Vec<Arc<dyn Validator<A>>>,
    ) -> AppResult<Pipeline<A>> {
        let capabilities = A::DESCRIPTOR.capabilities;
        let mut behaviors: Vec<Arc<dyn Behavior<A>>> = vec![
            Arc::new(LoggingBehavior),
            Arc::new(MetricsBehavior::new(self.metrics.clone())),
        ];

        if capabilities.auditable {
            behaviors.push(Arc::new(AuditBehavior::new(
                self.bus.clone(),
                self.outbox.clone(),
            )));
        }
        if capabilities.transactional {
            behaviors.push(Arc::new(TransactionBehavior::new(
                self.transactions.clone(),
                self.policy.cache(),
                self.transaction_options,
            )));
        }
        if capabilities.authorizable {
            behaviors.push(Arc::new(AuthorizationBehavior::new(self.policy.clone())));
        }
        if !validators.is_empty() {
            behaviors.push(Arc::new(ValidationBehavior::new(validators)));
        }

        Pipeline::new(behaviors, Arc::new(handler))
    }
}
