use std::collections::BTreeSet;

use sqlx::PgConnection;

use super::writes::insert_grant;
use super::*;

impl PostgresGrantRepository {
    pub(super) async fn replace_for_user_impl(
        &self,
        user_id: &str,
        grants: Vec<Grant>,
        options: &TransactionOptions,
    ) -> AppResult<GrantReplacement> {
        let mut scoped = self.scope.acquire(RESOURCE).await?;
        let mut transaction = scoped.begin(Some(options), RESOURCE).await?;

        let previous = sqlx::query_scalar::<_, String>(
            r#"
            DELETE FROM grants
            WHERE user_id = $1 AND grant_type = 'ActivityGroup'
            RETURNING user_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *transaction)
        .await
        .map_err(failed("replace_user_activity_group_grants"))?;

        let inserted = insert_all(&mut transaction, &grants).await?;

        transaction
            .commit()
            .await
            .map_err(failed("replace_user_activity_group_grants"))?;

        Ok(replacement(previous, inserted))
    }

    pub(super) async fn replace_all_impl(
        &self,
        grants: Vec<Grant>,
        options: &TransactionOptions,
    ) -> AppResult<GrantReplacement> {
        let mut scoped = self.scope.acquire(RESOURCE).await?;
        let mut transaction = scoped.begin(Some(options), RESOURCE).await?;

        let previous = sqlx::query_scalar::<_, String>(
            r#"
            DELETE FROM grants
            WHERE grant_type = 'ActivityGroup'
            RETURNING user_id
            "#,
        )
        .fetch_all(&mut *transaction)
        .await
        .map_err(failed("replace_all_activity_group_grants"))?;

        let inserted = insert_all(&mut transaction, &grants).await?;

        transaction
            .commit()
            .await
            .map_err(failed("replace_all_activity_group_grants"))?;

        Ok(replacement(previous, inserted))
    }
}

async fn insert_all(connection: &mut PgConnection, grants: &[Grant]) -> AppResult<u64> {
    let mut inserted = 0;
    for grant in grants {
        grant.validate()?;
        inserted += insert_grant(&mut *connection, grant, true)
            .await
            .map_err(failed("insert_activity_group_grant"))?;
    }
    Ok(inserted)
}

fn replacement(previous: Vec<String>, inserted: u64) -> GrantReplacement {
    GrantReplacement {
        removed: u64::try_from(previous.len()).unwrap_or(u64::MAX),
        inserted,
        previous_user_ids: previous.into_iter().collect::<BTreeSet<_>>(),
    }
}
