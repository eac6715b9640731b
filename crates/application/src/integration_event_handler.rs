use async_trait::async_trait;
use permita_core::AppResult;
use permita_domain::{ActivityCapabilities, ActivityDescriptor, ActivityKind, IntegrationEvent};
use serde_json::Value;
use tracing::info;

use crate::{
    Activity, ActivityHandler, ActivityOutput, AuthorizationSyncService, RequestContext,
    SyncSummary,
};

/// Notification carrying one inbound integration event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleIntegrationEvent {
    /// The received event.
    pub event: IntegrationEvent,
}

impl Activity for HandleIntegrationEvent {
    type Output = IntegrationEventOutcome;

    const DESCRIPTOR: ActivityDescriptor = ActivityDescriptor {
        name: "HandleIntegrationEvent",
        kind: ActivityKind::Notification,
        capabilities: ActivityCapabilities {
            auditable: false,
            authorizable: false,
            transactional: true,
            multi_tenant: false,
        },
        resource_types: &[],
    };

    fn audit_state(&self) -> Value {
        serde_json::to_value(&self.event).unwrap_or(Value::Null)
    }
}

/// Sync triggered by an event, `None` when the event required none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationEventOutcome {
    /// Event name.
    pub event: &'static str,
    /// Summary of the triggered sync.
    pub summary: Option<SyncSummary>,
}

impl ActivityOutput for IntegrationEventOutcome {
    fn performed_work(&self) -> bool {
        self.summary
            .as_ref()
            .is_some_and(SyncSummary::performed_work)
    }
}

/// Maps authority events onto sync calls.
#[derive(Clone)]
pub struct IntegrationEventHandler {
    sync: AuthorizationSyncService,
}

impl IntegrationEventHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(sync: AuthorizationSyncService) -> Self {
        Self { sync }
    }

    /// Runs the sync an event calls for.
    pub async fn handle_event(
        &self,
        event: &IntegrationEvent,
        context: &RequestContext,
    ) -> AppResult<IntegrationEventOutcome> {
        let summary = match event {
            IntegrationEvent::ActivityAddedToGroup { .. }
            | IntegrationEvent::ActivityRemovedFromGroup { .. } => {
                Some(self.sync.sync_activity_groups(context).await?)
            }
            IntegrationEvent::ActivityGroupDeleted {
                activity_group_name,
                ..
            } => {
                if self.sync.exists(context, activity_group_name).await? {
                    Some(self.sync.sync_activity_groups(context).await?)
                } else {
                    info!(
                        correlation_id = context.correlation_id(),
                        activity_group_name = activity_group_name.as_str(),
                        "activity group already absent, sync skipped"
                    );
                    None
                }
            }
            IntegrationEvent::ActivityGroupGrantGranted { user_id, .. }
            | IntegrationEvent::ActivityGroupGrantRevoked { user_id, .. } => Some(
                self.sync
                    .sync_activity_group_grants(context, user_id)
                    .await?,
            ),
        };

        Ok(IntegrationEventOutcome {
            event: event.name(),
            summary,
        })
    }
}

#[async_trait]
impl ActivityHandler<HandleIntegrationEvent> for IntegrationEventHandler {
    async fn handle(
        &self,
        context: &RequestContext,
        activity: HandleIntegrationEvent,
    ) -> AppResult<IntegrationEventOutcome> {
        self.handle_event(&activity.event, context).await
    }
}
