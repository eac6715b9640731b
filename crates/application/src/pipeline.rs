//! Ordered behavior chain wrapping every activity.
//!
//! Stages always run as Logging, Metrics, Audit, Transaction, Authorization, Validation and
//! finally the handler. Stages an activity does not opt into are left out, never reordered.

use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use permita_core::{AppError, AppResult, UserIdentity};
use permita_domain::{ActivityDescriptor, Grant, PolicyDecision};
use serde_json::Value;

use crate::{ActivityGroupRepository, GrantRepository, PolicyCacheKey, UnitOfWork};

mod behaviors;
mod builder;


pub use behaviors::{
    AuditBehavior, AuthorizationBehavior, LoggingBehavior, MetricsBehavior, TransactionBehavior,
    ValidationBehavior,
};
pub use builder::PipelineBuilder;

/// Result type produced by an activity handler.
pub trait ActivityOutput: Debug + Send + 'static {
    /// State captured as the audit event's `after` value.
    fn audit_state(&self) -> Value {
        Value::Null
    }

    /// Returns false when the handler had nothing to do; no audit event is published then.
    fn performed_work(&self) -> bool {
        true
    }

    /// Version tag published with the audit event.
    fn etag(&self) -> Option<String> {
        None
    }
}

impl ActivityOutput for () {}

impl ActivityOutput for bool {
    fn audit_state(&self) -> Value {
        Value::Bool(*self)
    }
}

impl ActivityOutput for Grant {
    fn audit_state(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl ActivityOutput for Vec<Grant> {
    fn audit_state(&self) -> Value {
        Value::from(self.len())
    }
}

impl ActivityOutput for PolicyDecision {
    fn audit_state(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A command, query, notification or job submitted to a pipeline.
pub trait Activity: Debug + Send + Sync + 'static {
    /// Handler result.
    type Output: ActivityOutput;

    /// Name, category, capabilities and resource types of this activity.
    const DESCRIPTOR: ActivityDescriptor;

    /// Resource the activity targets, checked against resource grants.
    fn resource_id(&self) -> Option<String> {
        None
    }

    /// State captured as the audit event's `before` value.
    fn audit_state(&self) -> Value {
        Value::Null
    }
}

/// Stage identity, ordered outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineStage {
    /// Request and outcome logging.
    Logging,
    /// Duration and error counters.
    Metrics,
    /// Audit event publication with outbox fallback.
    Audit,
    /// Unit of work around the inner stages.
    Transaction,
    /// Authentication and grant checks.
    Authorization,
    /// Aggregated validator failures.
    Validation,
}

/// Per-request state threaded through every stage.
pub struct RequestContext {
    correlation_id: String,
    principal: Option<UserIdentity>,
    access_token: Option<String>,
    unit_of_work: Option<Arc<dyn UnitOfWork>>,
    stale_cache_keys: Mutex<Vec<PolicyCacheKey>>,
}

impl RequestContext {
    /// Creates a context for a request made by a principal.
    #[must_use]
    pub fn new(correlation_id: impl Into<String>, principal: Option<UserIdentity>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            principal,
            access_token: None,
            unit_of_work: None,
            stale_cache_keys: Mutex::new(Vec::new()),
        }
    }

    /// Creates a context for system work without a principal.
    #[must_use]
    pub fn system(correlation_id: impl Into<String>) -> Self {
        Self::new(correlation_id, None)
    }

    /// Returns the correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        self.correlation_id.as_str()
    }

    /// Returns the acting principal, if any.
    #[must_use]
    pub fn principal(&self) -> Option<&UserIdentity> {
        self.principal.as_ref()
    }

    /// Returns the principal or a `NotAuthenticated` error.
    pub fn require_principal(&self) -> AppResult<&UserIdentity> {
        self.principal.as_ref().ok_or_else(|| {
            AppError::NotAuthenticated("request has no authenticated principal".to_owned())
        })
    }

    /// Returns the access token attached after authorization.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Returns the unit of work the request runs in.
    #[must_use]
    pub fn unit_of_work(&self) -> Option<&Arc<dyn UnitOfWork>> {
        self.unit_of_work.as_ref()
    }

    /// Returns the grant store bound to the open unit of work, or `store` outside one.
    #[must_use]
    pub fn grant_store(&self, store: &Arc<dyn GrantRepository>) -> Arc<dyn GrantRepository> {
        self.unit_of_work
            .as_ref()
            .map_or_else(|| store.clone(), |unit_of_work| unit_of_work.grants())
    }

    /// Returns the activity group store bound to the open unit of work, or `store` outside one.
    #[must_use]
    pub fn activity_group_store(
        &self,
        store: &Arc<dyn ActivityGroupRepository>,
    ) -> Arc<dyn ActivityGroupRepository> {
        self.unit_of_work
            .as_ref()
            .map_or_else(|| store.clone(), |unit_of_work| unit_of_work.activity_groups())
    }

    /// Queues cache entries to remove once the unit of work commits.
    pub(crate) fn defer_invalidation(&self, keys: impl IntoIterator<Item = PolicyCacheKey>) {
        self.stale_cache_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(keys);
    }

    pub(crate) fn take_deferred_invalidations(&mut self) -> Vec<PolicyCacheKey> {
        std::mem::take(
            self.stale_cache_keys
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

/// Business logic at the end of the chain.
#[async_trait]
pub trait ActivityHandler<A: Activity>: Send + Sync {
    /// Handles one activity.
    async fn handle(&self, context: &RequestContext, activity: A) -> AppResult<A::Output>;
}

/// Synchronous validator for one activity type.
pub trait Validator<A: Activity>: Send + Sync {
    /// Returns every failure message, empty when valid.
    fn validate(&self, activity: &A) -> Vec<String>;
}

/// One stage of the chain.
#[async_trait]
pub trait Behavior<A: Activity>: Send + Sync {
    /// Returns this behavior's position in the chain.
    fn stage(&self) -> PipelineStage;

    /// Runs the stage, calling `next` at most once.
    async fn handle(
        &self,
        context: &mut RequestContext,
        activity: A,
        next: Next<'_, A>,
    ) -> AppResult<A::Output>;
}

/// Remainder of the chain after the current stage.
pub struct Next<'a, A: Activity> {
    behaviors: &'a [Arc<dyn Behavior<A>>],
    handler: &'a dyn ActivityHandler<A>,
}

impl<A: Activity> Next<'_, A> {
    /// Runs the remaining stages and the handler.
    pub async fn run(self, context: &mut RequestContext, activity: A) -> AppResult<A::Output> {
        match self.behaviors.split_first() {
            Some((behavior, rest)) => {
                let next = Next {
                    behaviors: rest,
                    handler: self.handler,
                };
                behavior.handle(context, activity, next).await
            }
            None => self.handler.handle(context, activity).await,
        }
    }
}

/// Composed chain for one activity type.
pub struct Pipeline<A: Activity> {
    behaviors: Vec<Arc<dyn Behavior<A>>>,
    handler: Arc<dyn ActivityHandler<A>>,
}

impl<A: Activity> Pipeline<A> {
    /// Composes a chain, rejecting behaviors that are out of order or repeated.
    pub fn new(
        behaviors: Vec<Arc<dyn Behavior<A>>>,
        handler: Arc<dyn ActivityHandler<A>>,
    ) -> AppResult<Self> {
        let ordered = behaviors
            .windows(2)
            .all(|pair| pair[0].stage() < pair[1].stage());
        if !ordered {
            return Err(AppError::Internal(format!(
                "pipeline stages for '{}' are out of order",
                A::DESCRIPTOR.name
            )));
        }

        Ok(Self { behaviors, handler })
    }

    /// Returns the composed stages, outermost first.
    #[must_use]
    pub fn stages(&self) -> Vec<PipelineStage> {
        self.behaviors.iter().map(|behavior| behavior.stage()).collect()
    }

    /// Submits an activity and returns the handler's result or the first stage error.
    pub async fn send(&self, context: &mut RequestContext, activity: A) -> AppResult<A::Output> {
        Next {
            behaviors: self.behaviors.as_slice(),
            handler: self.handler.as_ref(),
        }
        .run(context, activity)
        .await
    }
}
