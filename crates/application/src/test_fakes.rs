use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use permita_core::{AppError, AppResult, TenantId, UserIdentity};
use permita_domain::{ActivityGroup, ActivityRef, Grant, GrantKey, GrantScope, GrantType};
use tokio::sync::Mutex;

use crate::{
    ActivityGroupReplacement, ActivityGroupRepository, ActivitySample, AuthorityClient,
    GrantReplacement, GrantRepository, InboundEvent, IntegrationEventSource, MessageBus,
    MetricsRecorder, OutboundMessage, OutboxMessage, OutboxRepository, PolicyCacheKey,
    PolicyDataCache, TransactionManager, TransactionOptions, UnitOfWork,
};

#[derive(Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub(crate) async fn push(&self, entry: impl Into<String>) {
        self.0.lock().await.push(entry.into());
    }

    pub(crate) async fn entries(&self) -> Vec<String> {
        self.0.lock().await.clone()
    }
}

pub(crate) fn tenant(value: &str) -> TenantId {
    if value == "*" {
        return TenantId::wildcard();
    }
    TenantId::new(value).unwrap_or_else(|_| TenantId::wildcard())
}

pub(crate) fn grant(user_id: &str, tenant_id: &str, grant_type: &str, qualifier: &str) -> Grant {
    Grant {
        user_id: user_id.to_owned(),
        full_name: format!("{user_id} name"),
        tenant_id: tenant(tenant_id),
        grant_type: grant_type.parse().unwrap_or(GrantType::Activity),
        qualifier: qualifier.to_owned(),
        expires_on: None,
        granted_by: "authority".to_owned(),
        granted_on: Utc
            .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default(),
        revoked_by: None,
        revoked_on: None,
    }
}

pub(crate) fn group(tenant_id: &str, name: &str, activities: &[&str]) -> ActivityGroup {
    ActivityGroup {
        tenant_id: tenant(tenant_id),
        name: name.to_owned(),
        activities: activities
            .iter()
            .map(|activity_name| ActivityRef {
                application_name: "permita".to_owned(),
                activity_name: (*activity_name).to_owned(),
            })
            .collect(),
    }
}

pub(crate) fn principal(subject: &str, tenant_id: &str) -> UserIdentity {
    match UserIdentity::new(subject, format!("{subject} name"), tenant(tenant_id)) {
        Ok(identity) => identity.with_access_token(format!("{subject}-token")),
        Err(error) => panic!("invalid principal in test: {error}"),
    }
}

#[derive(Default)]
pub(crate) struct FakeGrantRepository {
    pub(crate) grants: Mutex<Vec<Grant>>,
    pub(crate) history: Mutex<Vec<Grant>>,
    pub(crate) log: EventLog,
    pub(crate) reads: AtomicUsize,
}

impl FakeGrantRepository {
    pub(crate) fn with_grants(grants: Vec<Grant>) -> Self {
        Self {
            grants: Mutex::new(grants),
            ..Self::default()
        }
    }

    pub(crate) fn with_log(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }
}

#[async_trait]
impl GrantRepository for FakeGrantRepository {
    async fn save(&self, grant: Grant) -> AppResult<()> {
        let mut grants = self.grants.lock().await;
        if grants.iter().any(|existing| existing.key() == grant.key()) {
            return Err(AppError::Conflict(format!("grant '{}' already exists", grant.key())));
        }
        grants.push(grant);
        Ok(())
    }

    async fn delete(&self, grant: &Grant) -> AppResult<()> {
        grant.ensure_deletable(Utc::now())?;
        self.grants
            .lock()
            .await
            .retain(|existing| existing.key() != grant.key());
        self.history.lock().await.push(grant.clone());
        Ok(())
    }

    async fn exists(&self, key: &GrantKey) -> AppResult<bool> {
        let now = Utc::now();
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .any(|grant| &grant.key() == key && grant.is_active(now)))
    }

    async fn read(&self, key: &GrantKey) -> AppResult<Option<Grant>> {
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .find(|grant| &grant.key() == key)
            .cloned())
    }

    async fn read_all(&self, user_id: &str) -> AppResult<Vec<Grant>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .filter(|grant| grant.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn matching(&self, scope: &GrantScope, user_id: Option<&str>) -> AppResult<Vec<Grant>> {
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .filter(|grant| user_id.is_none_or(|user_id| grant.user_id == user_id))
            .filter(|grant| grant.scope().covers(scope))
            .cloned()
            .collect())
    }

    async fn replace_activity_group_grants_for_user(
        &self,
        user_id: &str,
        grants: Vec<Grant>,
        _options: &TransactionOptions,
    ) -> AppResult<GrantReplacement> {
        let mut stored = self.grants.lock().await;
        let before = stored.len();
        stored.retain(|grant| {
            !(grant.user_id == user_id && grant.grant_type == GrantType::ActivityGroup)
        });
        let removed = (before - stored.len()) as u64;
        let inserted = grants.len() as u64;
        stored.extend(grants);
        drop(stored);

        self.log.push(format!("commit grants:{user_id}")).await;

        Ok(GrantReplacement {
            removed,
            inserted,
            previous_user_ids: BTreeSet::from([user_id.to_owned()]),
        })
    }

    async fn replace_all_activity_group_grants(
        &self,
        grants: Vec<Grant>,
        _options: &TransactionOptions,
    ) -> AppResult<GrantReplacement> {
        let mut stored = self.grants.lock().await;
        let previous_user_ids = stored
            .iter()
            .filter(|grant| grant.grant_type == GrantType::ActivityGroup)
            .map(|grant| grant.user_id.clone())
            .collect::<BTreeSet<_>>();
        let before = stored.len();
        stored.retain(|grant| grant.grant_type != GrantType::ActivityGroup);
        let removed = (before - stored.len()) as u64;
        let inserted = grants.len() as u64;
        stored.extend(grants);
        drop(stored);

        self.log.push("commit all-grants").await;

        Ok(GrantReplacement {
            removed,
            inserted,
            previous_user_ids,
        })
    }
}

#[derive(Default)]
pub(crate) struct FakeActivityGroupRepository {
    pub(crate) groups: Mutex<Vec<ActivityGroup>>,
    pub(crate) log: EventLog,
    pub(crate) reads: AtomicUsize,
}

impl FakeActivityGroupRepository {
    pub(crate) fn with_groups(groups: Vec<ActivityGroup>) -> Self {
        Self {
            groups: Mutex::new(groups),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ActivityGroupRepository for FakeActivityGroupRepository {
    async fn list_activity_groups(&self) -> AppResult<Vec<ActivityGroup>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.groups.lock().await.clone())
    }

    async fn replace_activity_groups(
        &self,
        groups: Vec<ActivityGroup>,
        _options: &TransactionOptions,
    ) -> AppResult<ActivityGroupReplacement> {
        let mut stored = self.groups.lock().await;
        let removed = stored.len() as u64;
        let inserted = groups.len() as u64;
        *stored = groups;
        drop(stored);

        self.log.push("commit activity-groups").await;

        Ok(ActivityGroupReplacement { removed, inserted })
    }

    async fn activity_group_exists(&self, name: &str) -> AppResult<bool> {
        Ok(self
            .groups
            .lock()
            .await
            .iter()
            .any(|group| group.name == name))
    }
}

#[derive(Default)]
pub(crate) struct FakePolicyDataCache {
    pub(crate) user_grants: Mutex<HashMap<String, Vec<Grant>>>,
    pub(crate) activity_groups: Mutex<Option<Vec<ActivityGroup>>>,
    pub(crate) log: EventLog,
    pub(crate) unavailable: bool,
    pub(crate) failing_key: Option<PolicyCacheKey>,
}

impl FakePolicyDataCache {
    pub(crate) fn failing_on(key: PolicyCacheKey) -> Self {
        Self {
            failing_key: Some(key),
            ..Self::default()
        }
    }

    pub(crate) fn with_log(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub(crate) fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    fn check_available(&self) -> AppResult<()> {
        if self.unavailable {
            return Err(AppError::Internal("cache unavailable".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyDataCache for FakePolicyDataCache {
    async fn get_user_grants(&self, user_id: &str) -> AppResult<Option<Vec<Grant>>> {
        self.check_available()?;
        Ok(self.user_grants.lock().await.get(user_id).cloned())
    }

    async fn set_user_grants(&self, user_id: &str, grants: &[Grant]) -> AppResult<()> {
        self.check_available()?;
        self.user_grants
            .lock()
            .await
            .insert(user_id.to_owned(), grants.to_vec());
        Ok(())
    }

    async fn get_activity_groups(&self) -> AppResult<Option<Vec<ActivityGroup>>> {
        self.check_available()?;
        Ok(self.activity_groups.lock().await.clone())
    }

    async fn set_activity_groups(&self, groups: &[ActivityGroup]) -> AppResult<()> {
        self.check_available()?;
        *self.activity_groups.lock().await = Some(groups.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &PolicyCacheKey) -> AppResult<()> {
        self.check_available()?;
        if self.failing_key.as_ref() == Some(key) {
            return Err(AppError::Internal("cache node unreachable".to_owned()));
        }
        match key {
            PolicyCacheKey::UserGrants(user_id) => {
                self.user_grants.lock().await.remove(user_id);
            }
            PolicyCacheKey::ActivityGroups => {
                *self.activity_groups.lock().await = None;
            }
        }
        self.log.push(format!("invalidate {key}")).await;
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeAuthorityClient {
    pub(crate) activity_groups: Mutex<Vec<ActivityGroup>>,
    pub(crate) grants: Mutex<Vec<Grant>>,
    pub(crate) correlation_ids: Mutex<Vec<String>>,
    pub(crate) failing: bool,
}

impl FakeAuthorityClient {
    pub(crate) fn new(activity_groups: Vec<ActivityGroup>, grants: Vec<Grant>) -> Self {
        Self {
            activity_groups: Mutex::new(activity_groups),
            grants: Mutex::new(grants),
            ..Self::default()
        }
    }

    async fn record(&self, correlation_id: &str) -> AppResult<()> {
        self.correlation_ids
            .lock()
            .await
            .push(correlation_id.to_owned());
        if self.failing {
            return Err(AppError::Internal("authority unavailable".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthorityClient for FakeAuthorityClient {
    async fn fetch_activity_groups(&self, correlation_id: &str) -> AppResult<Vec<ActivityGroup>> {
        self.record(correlation_id).await?;
        Ok(self.activity_groups.lock().await.clone())
    }

    async fn fetch_user_activity_group_grants(
        &self,
        user_id: &str,
        correlation_id: &str,
    ) -> AppResult<Vec<Grant>> {
        self.record(correlation_id).await?;
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .filter(|grant| grant.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn fetch_all_activity_group_grants(
        &self,
        correlation_id: &str,
    ) -> AppResult<Vec<Grant>> {
        self.record(correlation_id).await?;
        Ok(self.grants.lock().await.clone())
    }
}

#[derive(Default)]
pub(crate) struct FakeMessageBus {
    pub(crate) published: Mutex<Vec<OutboundMessage>>,
    pub(crate) failing: bool,
}

#[async_trait]
impl MessageBus for FakeMessageBus {
    async fn publish(&self, message: &OutboundMessage) -> AppResult<()> {
        if self.failing {
            return Err(AppError::Internal("bus unavailable".to_owned()));
        }
        self.published.lock().await.push(message.clone());
        Ok(())
    }
}

/// Hands out its events once, then empty batches.
#[derive(Default)]
pub(crate) struct FakeIntegrationEventSource {
    pub(crate) waiting: Mutex<Vec<InboundEvent>>,
    pub(crate) acknowledged: Mutex<Vec<String>>,
}

impl FakeIntegrationEventSource {
    pub(crate) fn with_events(events: Vec<InboundEvent>) -> Self {
        Self {
            waiting: Mutex::new(events),
            ..Self::default()
        }
    }
}

#[async_trait]
impl IntegrationEventSource for FakeIntegrationEventSource {
    async fn receive(&self) -> AppResult<Vec<InboundEvent>> {
        Ok(std::mem::take(&mut *self.waiting.lock().await))
    }

    async fn acknowledge(&self, delivery_id: &str) -> AppResult<()> {
        self.acknowledged.lock().await.push(delivery_id.to_owned());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeOutboxRepository {
    pub(crate) messages: Mutex<Vec<OutboxMessage>>,
}

#[async_trait]
impl OutboxRepository for FakeOutboxRepository {
    async fn save_messages(&self, messages: Vec<OutboxMessage>) -> AppResult<()> {
        self.messages.lock().await.extend(messages);
        Ok(())
    }
}

/// Hands out units of work whose stores are the given fakes.
pub(crate) struct FakeTransactionManager {
    pub(crate) log: EventLog,
    pub(crate) grants: Arc<FakeGrantRepository>,
    pub(crate) activity_groups: Arc<FakeActivityGroupRepository>,
}

impl FakeTransactionManager {
    pub(crate) fn new(
        log: EventLog,
        grants: Arc<FakeGrantRepository>,
        activity_groups: Arc<FakeActivityGroupRepository>,
    ) -> Self {
        Self {
            log,
            grants,
            activity_groups,
        }
    }
}

struct FakeUnitOfWork {
    log: EventLog,
    grants: Arc<FakeGrantRepository>,
    activity_groups: Arc<FakeActivityGroupRepository>,
}

#[async_trait]
impl UnitOfWork for FakeUnitOfWork {
    fn grants(&self) -> Arc<dyn GrantRepository> {
        self.grants.clone()
    }

    fn activity_groups(&self) -> Arc<dyn ActivityGroupRepository> {
        self.activity_groups.clone()
    }

    async fn commit(&self) -> AppResult<()> {
        self.log.push("commit").await;
        Ok(())
    }

    async fn rollback(&self) -> AppResult<()> {
        self.log.push("rollback").await;
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for FakeTransactionManager {
    async fn begin(&self, options: &TransactionOptions) -> AppResult<Arc<dyn UnitOfWork>> {
        self.log
            .push(format!("begin {}", options.isolation.as_sql()))
            .await;
        Ok(Arc::new(FakeUnitOfWork {
            log: self.log.clone(),
            grants: self.grants.clone(),
            activity_groups: self.activity_groups.clone(),
        }))
    }
}

#[derive(Default)]
pub(crate) struct FakeMetricsRecorder {
    pub(crate) samples: std::sync::Mutex<Vec<ActivitySample>>,
    pub(crate) aggregates: std::sync::Mutex<Vec<bool>>,
}

impl FakeMetricsRecorder {
    pub(crate) fn samples(&self) -> Vec<ActivitySample> {
        self.samples
            .lock()
            .map(|samples| samples.clone())
            .unwrap_or_default()
    }

    pub(crate) fn aggregates(&self) -> Vec<bool> {
        self.aggregates
            .lock()
            .map(|aggregates| aggregates.clone())
            .unwrap_or_default()
    }
}

impl MetricsRecorder for FakeMetricsRecorder {
    fn record_activity(&self, sample: &ActivitySample) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.push(*sample);
        }
    }

    fn record_aggregate(&self, _duration: Duration, failed: bool) {
        if let Ok(mut aggregates) = self.aggregates.lock() {
            aggregates.push(failed);
        }
    }
}
