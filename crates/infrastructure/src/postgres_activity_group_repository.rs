use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use async_trait::async_trait;
use permita_application::{ActivityGroupReplacement, ActivityGroupRepository, TransactionOptions};
use permita_core::{AppError, AppResult, TenantId};
use permita_domain::{ActivityGroup, ActivityRef};
use sqlx::{FromRow, PgPool};

use crate::postgres_scope::{PgScope, SharedTransaction};

const RESOURCE: &str = "activity_group";

/// PostgreSQL-backed replica of the authority's activity groups.
#[derive(Clone)]
pub struct PostgresActivityGroupRepository {
    scope: PgScope,
}

impl PostgresActivityGroupRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            scope: PgScope::Pool(pool),
        }
    }

    pub(crate) fn joined(transaction: SharedTransaction) -> Self {
        Self {
            scope: PgScope::UnitOfWork(transaction),
        }
    }
}

#[derive(Debug, FromRow)]
struct ActivityGroupRow {
    tenant_id: String,
    name: String,
    application_name: Option<String>,
    activity_name: Option<String>,
}

fn failed(operation: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |error| AppError::operation_failed(RESOURCE, operation, error)
}

fn group_rows(rows: Vec<ActivityGroupRow>) -> AppResult<Vec<ActivityGroup>> {
    let mut groups: BTreeMap<(String, String), ActivityGroup> = BTreeMap::new();

    for row in rows {
        let group = match groups.entry((row.tenant_id.clone(), row.name.clone())) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(ActivityGroup {
                tenant_id: TenantId::new(row.tenant_id)?,
                name: row.name,
                activities: Vec::new(),
            }),
        };

        if let (Some(application_name), Some(activity_name)) =
            (row.application_name, row.activity_name)
        {
            group.activities.push(ActivityRef {
                application_name,
                activity_name,
            });
        }
    }

    Ok(groups.into_values().collect())
}

#[async_trait]
impl ActivityGroupRepository for PostgresActivityGroupRepository {
    async fn list_activity_groups(&self) -> AppResult<Vec<ActivityGroup>> {
        let mut scoped = self.scope.acquire(RESOURCE).await?;
        let rows = sqlx::query_as::<_, ActivityGroupRow>(
            r#"
            SELECT
                grp.tenant_id,
                grp.name,
                member.application_name,
                member.activity_name
            FROM activity_groups grp
            LEFT JOIN activity_group_activities member
                ON member.tenant_id = grp.tenant_id
               AND member.activity_group_name = grp.name
            ORDER BY grp.tenant_id, grp.name, member.application_name, member.activity_name
            "#,
        )
        .fetch_all(scoped.connection()?)
        .await
        .map_err(failed("list"))?;

        group_rows(rows)
    }

    async fn replace_activity_groups(
        &self,
        groups: Vec<ActivityGroup>,
        options: &TransactionOptions,
    ) -> AppResult<ActivityGroupReplacement> {
        let mut scoped = self.scope.acquire(RESOURCE).await?;
        let mut transaction = scoped.begin(Some(options), RESOURCE).await?;

        let removed = sqlx::query("DELETE FROM activity_groups")
            .execute(&mut *transaction)
            .await
            .map_err(failed("replace"))?
            .rows_affected();

        let mut inserted = 0;
        for group in &groups {
            inserted += sqlx::query(
                r#"
                INSERT INTO activity_groups (tenant_id, name)
                VALUES ($1, $2)
                ON CONFLICT (tenant_id, name) DO NOTHING
                "#,
            )
            .bind(group.tenant_id.as_str())
            .bind(group.name.as_str())
            .execute(&mut *transaction)
            .await
            .map_err(failed("insert_group"))?
            .rows_affected();

            for activity in &group.activities {
                sqlx::query(
                    r#"
                    INSERT INTO activity_group_activities (
                        tenant_id, activity_group_name, application_name, activity_name
                    )
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(group.tenant_id.as_str())
                .bind(group.name.as_str())
                .bind(activity.application_name.as_str())
                .bind(activity.activity_name.as_str())
                .execute(&mut *transaction)
                .await
                .map_err(failed("insert_activity"))?;
            }
        }

        transaction.commit().await.map_err(failed("replace"))?;

        Ok(ActivityGroupReplacement { removed, inserted })
    }

    async fn activity_group_exists(&self, name: &str) -> AppResult<bool> {
        let mut scoped = self.scope.acquire(RESOURCE).await?;
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM activity_groups WHERE name = $1)")
            .bind(name)
            .fetch_one(scoped.connection()?)
            .await
            .map_err(failed("exists"))
    }
}
