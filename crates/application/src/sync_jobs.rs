use async_trait::async_trait;
use permita_core::AppResult;
use permita_domain::{ActivityCapabilities, ActivityDescriptor, ActivityKind};
use serde_json::{Value, json};

use crate::{
    Activity, ActivityHandler, ActivityOutput, AuthorizationSyncService, RequestContext,
    SyncSummary,
};

const JOB_CAPABILITIES: ActivityCapabilities = ActivityCapabilities {
    auditable: true,
    authorizable: false,
    transactional: false,
    multi_tenant: false,
};

/// Result of a background job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutcome {
    /// Whether the job changed anything.
    pub work_performed: bool,
    /// Sync details.
    pub summary: SyncSummary,
}

impl From<SyncSummary> for JobOutcome {
    fn from(summary: SyncSummary) -> Self {
        Self {
            work_performed: summary.performed_work(),
            summary,
        }
    }
}

impl ActivityOutput for JobOutcome {
    fn audit_state(&self) -> Value {
        json!({
            "removed": self.summary.removed,
            "inserted": self.summary.inserted,
            "invalidated": self.summary.invalidated_keys.len(),
        })
    }

    fn performed_work(&self) -> bool {
        self.work_performed
    }
}

/// Reconciles every activity group with the authority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncActivityGroupsJob;

impl Activity for SyncActivityGroupsJob {
    type Output = JobOutcome;

    const DESCRIPTOR: ActivityDescriptor = ActivityDescriptor {
        name: "SyncActivityGroups",
        kind: ActivityKind::Job,
        capabilities: JOB_CAPABILITIES,
        resource_types: &[],
    };
}

/// Reconciles every user's activity group grants with the authority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncAllActivityGroupGrantsJob;

impl Activity for SyncAllActivityGroupGrantsJob {
    type Output = JobOutcome;

    const DESCRIPTOR: ActivityDescriptor = ActivityDescriptor {
        name: "SyncAllActivityGroupGrants",
        kind: ActivityKind::Job,
        capabilities: JOB_CAPABILITIES,
        resource_types: &[],
    };
}

/// Handles [`SyncActivityGroupsJob`].
#[derive(Clone)]
pub struct SyncActivityGroupsJobHandler {
    sync: AuthorizationSyncService,
}

impl SyncActivityGroupsJobHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(sync: AuthorizationSyncService) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl ActivityHandler<SyncActivityGroupsJob> for SyncActivityGroupsJobHandler {
    async fn handle(
        &self,
        context: &RequestContext,
        _activity: SyncActivityGroupsJob,
    ) -> AppResult<JobOutcome> {
        self.sync
            .sync_activity_groups(context)
            .await
            .map(JobOutcome::from)
    }
}

/// Handles [`SyncAllActivityGroupGrantsJob`].
#[derive(Clone)]
pub struct SyncAllActivityGroupGrantsJobHandler {
    sync: AuthorizationSyncService,
}

impl SyncAllActivityGroupGrantsJobHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(sync: AuthorizationSyncService) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl ActivityHandler<SyncAllActivityGroupGrantsJob> for SyncAllActivityGroupGrantsJobHandler {
    async fn handle(
        &self,
        context: &RequestContext,
        _activity: SyncAllActivityGroupGrantsJob,
    ) -> AppResult<JobOutcome> {
        self.sync
            .sync_all_activity_group_grants(context)
            .await
            .map(JobOutcome::from)
    }
}
