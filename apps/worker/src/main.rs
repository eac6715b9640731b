//! Permita authorization sync worker.

#![forbid(unsafe_code)]

mod settings;

use std::sync::Arc;
use std::time::Duration;

use permita_application::{
    Activity, AuthorizationSyncService, BuiltinPolicyEvaluator, HandleIntegrationEvent,
    IntegrationEventConsumer, IntegrationEventHandler, JobOutcome, Pipeline, PipelineBuilder,
    PolicyDataProvider, RequestContext, ServiceTokenCache, SyncActivityGroupsJob,
    SyncActivityGroupsJobHandler, SyncAllActivityGroupGrantsJob,
    SyncAllActivityGroupGrantsJobHandler, activity_catalog,
};
use permita_core::{AppError, AppResult};
use permita_infrastructure::{
    HttpAuthorityClient, HttpCredentialProvider, InMemoryMetricsRecorder, MIGRATOR,
    PostgresActivityGroupRepository, PostgresGrantRepository, PostgresOutboxRepository,
    PostgresTransactionManager, RedisIntegrationEventSource, RedisMessageBus,
    RedisPolicyDataCache,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::settings::WorkerSettings;

struct SyncPipelines {
    activity_groups: Pipeline<SyncActivityGroupsJob>,
    activity_group_grants: Pipeline<SyncAllActivityGroupGrantsJob>,
    integration_events: Pipeline<HandleIntegrationEvent>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let settings = WorkerSettings::from_env()?;
    let pool = connect_pool(settings.database_url.as_str()).await?;
    MIGRATOR
        .run(&pool)
        .await
        .map_err(|error| AppError::operation_failed("database", "migrate", error))?;

    let SyncPipelines {
        activity_groups,
        activity_group_grants,
        integration_events,
    } = build_pipelines(&settings, pool)?;

    let redis_client = redis::Client::open(settings.redis_url.as_str())
        .map_err(|error| AppError::operation_failed("redis", "open", error))?;
    let source = Arc::new(RedisIntegrationEventSource::new(
        redis_client,
        settings.integration_stream.clone(),
    ));
    source.ensure_consumer_group().await?;
    let consumer = IntegrationEventConsumer::new(source, integration_events);
    tokio::spawn(consume_integration_events(
        consumer,
        settings.integration_poll_interval,
    ));

    info!(
        authority = %settings.authority.base_url,
        application = %settings.authority.application_name,
        sync_interval_seconds = settings.sync_interval.as_secs(),
        integration_stream = settings.integration_stream.stream_key.as_str(),
        "permita-worker started"
    );

    let mut interval = tokio::time::interval(settings.sync_interval);
    loop {
        // The first tick completes immediately and doubles as the startup sync.
        interval.tick().await;
        run_job(&activity_groups, SyncActivityGroupsJob).await;
        run_job(&activity_group_grants, SyncAllActivityGroupGrantsJob).await;
    }
}

async fn consume_integration_events(consumer: IntegrationEventConsumer, idle: Duration) {
    loop {
        match consumer.consume_batch().await {
            Ok(0) => tokio::time::sleep(idle).await,
            Ok(_) => {}
            Err(error) => {
                warn!(
                    status = error.status_code().as_u16(),
                    error = %error,
                    "integration stream read failed"
                );
                tokio::time::sleep(idle).await;
            }
        }
    }
}

async fn run_job<A>(pipeline: &Pipeline<A>, job: A)
where
    A: Activity<Output = JobOutcome>,
{
    let correlation_id = Uuid::new_v4().to_string();
    let mut context = RequestContext::system(correlation_id.as_str());

    match pipeline.send(&mut context, job).await {
        Ok(outcome) => info!(
            job = A::DESCRIPTOR.name,
            correlation_id = %correlation_id,
            work_performed = outcome.work_performed,
            removed = outcome.summary.removed,
            inserted = outcome.summary.inserted,
            "sync job finished"
        ),
        // The pipeline's logging stage already recorded the failure.
        Err(error) => warn!(
            job = A::DESCRIPTOR.name,
            correlation_id = %correlation_id,
            status = error.status_code().as_u16(),
            "sync job will retry on the next tick"
        ),
    }
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::operation_failed("database", "connect", error))
}

fn build_pipelines(settings: &WorkerSettings, pool: PgPool) -> AppResult<SyncPipelines> {
    let redis_client = redis::Client::open(settings.redis_url.as_str())
        .map_err(|error| AppError::operation_failed("redis", "open", error))?;
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|error| AppError::operation_failed("http_client", "build", error))?;

    let credentials = Arc::new(HttpCredentialProvider::new(
        http_client.clone(),
        settings.credentials.clone(),
    ));
    let tokens = Arc::new(ServiceTokenCache::new(credentials, settings.token_cache));
    let authority = Arc::new(HttpAuthorityClient::new(
        http_client,
        tokens,
        settings.authority.clone(),
    ));

    let grants = Arc::new(PostgresGrantRepository::new(pool.clone()));
    let activity_groups = Arc::new(PostgresActivityGroupRepository::new(pool.clone()));
    let cache = Arc::new(RedisPolicyDataCache::new(
        redis_client.clone(),
        settings.cache_key_prefix.clone(),
        settings.policy_cache,
    ));

    let sync = AuthorizationSyncService::new(
        authority,
        grants.clone(),
        activity_groups.clone(),
        cache.clone(),
        settings.transaction,
    );
    let policy = PolicyDataProvider::new(
        grants,
        activity_groups,
        cache,
        Arc::new(BuiltinPolicyEvaluator),
        Arc::new(activity_catalog(settings.authority.application_name.as_str())),
    );
    let builder = PipelineBuilder::new(
        Arc::new(InMemoryMetricsRecorder::new()),
        Arc::new(RedisMessageBus::new(
            redis_client,
            settings.audit_stream_key.clone(),
        )),
        Arc::new(PostgresOutboxRepository::new(pool.clone())),
        Arc::new(PostgresTransactionManager::new(pool)),
        settings.transaction,
        policy,
    );

    Ok(SyncPipelines {
        activity_groups: builder.build::<SyncActivityGroupsJob>(
            SyncActivityGroupsJobHandler::new(sync.clone()),
            Vec::new(),
        )?,
        activity_group_grants: builder.build::<SyncAllActivityGroupGrantsJob>(
            SyncAllActivityGroupGrantsJobHandler::new(sync.clone()),
            Vec::new(),
        )?,
        integration_events: builder.build::<HandleIntegrationEvent>(
            IntegrationEventHandler::new(sync),
            Vec::new(),
        )?,
    })
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
