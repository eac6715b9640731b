use sqlx::PgConnection;

use super::*;

pub(super) async fn insert_grant(
    connection: &mut PgConnection,
    grant: &Grant,
    on_conflict_do_nothing: bool,
) -> Result<u64, sqlx::Error> {
    let statement = if on_conflict_do_nothing {
        r#"
        INSERT INTO grants (
            user_id, full_name, tenant_id, grant_type, qualifier,
            expires_on, granted_by, granted_on, revoked_by, revoked_on
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (user_id, tenant_id, grant_type, qualifier) DO NOTHING
        "#
    } else {
        r#"
        INSERT INTO grants (
            user_id, full_name, tenant_id, grant_type, qualifier,
            expires_on, granted_by, granted_on, revoked_by, revoked_on
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#
    };

    let result = sqlx::query(statement)
        .bind(grant.user_id.as_str())
        .bind(grant.full_name.as_str())
        .bind(grant.tenant_id.as_str())
        .bind(grant.grant_type.as_str())
        .bind(grant.qualifier.as_str())
        .bind(grant.expires_on)
        .bind(grant.granted_by.as_str())
        .bind(grant.granted_on)
        .bind(grant.revoked_by.as_deref())
        .bind(grant.revoked_on)
        .execute(connection)
        .await?;

    Ok(result.rows_affected())
}

impl PostgresGrantRepository {
    pub(super) async fn save_impl(&self, grant: Grant) -> AppResult<()> {
        grant.validate()?;

        let mut scoped = self.scope.acquire(RESOURCE).await?;
        match insert_grant(scoped.connection()?, &grant, false).await {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error) => Err(AppError::Conflict(format!(
                "grant '{}' already exists",
                grant.key()
            ))),
            Err(error) => Err(AppError::operation_failed(RESOURCE, "save", error)),
        }
    }

    pub(super) async fn delete_impl(&self, grant: &Grant) -> AppResult<()> {
        grant.ensure_deletable(Utc::now())?;

        let mut scoped = self.scope.acquire(RESOURCE).await?;
        let mut transaction = scoped.begin(None, RESOURCE).await?;

        sqlx::query(
            r#"
            INSERT INTO grant_history (
                user_id, full_name, tenant_id, grant_type, qualifier,
                expires_on, granted_by, granted_on, revoked_by, revoked_on
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(grant.user_id.as_str())
        .bind(grant.full_name.as_str())
        .bind(grant.tenant_id.as_str())
        .bind(grant.grant_type.as_str())
        .bind(grant.qualifier.as_str())
        .bind(grant.expires_on)
        .bind(grant.granted_by.as_str())
        .bind(grant.granted_on)
        .bind(grant.revoked_by.as_deref())
        .bind(grant.revoked_on)
        .execute(&mut *transaction)
        .await
        .map_err(failed("record_history"))?;

        let deleted = sqlx::query(
            r#"
            DELETE FROM grants
            WHERE user_id = $1 AND tenant_id = $2 AND grant_type = $3 AND qualifier = $4
            "#,
        )
        .bind(grant.user_id.as_str())
        .bind(grant.tenant_id.as_str())
        .bind(grant.grant_type.as_str())
        .bind(grant.qualifier.as_str())
        .execute(&mut *transaction)
        .await
        .map_err(failed("delete"))?
        .rows_affected();

        if deleted == 0 {
            // Dropping the transaction (or savepoint) rolls back the history row.
            return Err(AppError::NotFound(format!(
                "grant '{}' does not exist",
                grant.key()
            )));
        }

        transaction.commit().await.map_err(failed("delete"))?;

        Ok(())
    }
}
