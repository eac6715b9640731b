use permita_core::WILDCARD;
use permita_domain::qualifier_candidates;

use super::*;

const GRANT_COLUMNS: &str = "user_id, full_name, tenant_id, grant_type, qualifier, expires_on, \
     granted_by, granted_on, revoked_by, revoked_on";

/// Stored values that would match a requested position, `None` when the request is `*`.
fn position_candidates(requested: &str) -> Option<Vec<String>> {
    (requested != WILDCARD).then(|| vec![WILDCARD.to_owned(), requested.to_owned()])
}

impl PostgresGrantRepository {
    pub(super) async fn read_impl(&self, key: &GrantKey) -> AppResult<Option<Grant>> {
        let mut scoped = self.scope.acquire(RESOURCE).await?;
        let row = sqlx::query_as::<_, GrantRow>(&format!(
            r#"
            SELECT {GRANT_COLUMNS}
            FROM grants
            WHERE user_id = $1 AND tenant_id = $2 AND grant_type = $3 AND qualifier = $4
            "#
        ))
        .bind(key.user_id.as_str())
        .bind(key.tenant_id.as_str())
        .bind(key.grant_type.as_str())
        .bind(key.qualifier.as_str())
        .fetch_optional(scoped.connection()?)
        .await
        .map_err(failed("read"))?;

        row.map(Grant::try_from).transpose()
    }

    pub(super) async fn exists_impl(&self, key: &GrantKey) -> AppResult<bool> {
        let mut scoped = self.scope.acquire(RESOURCE).await?;
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM grants
                WHERE user_id = $1
                  AND tenant_id = $2
                  AND grant_type = $3
                  AND qualifier = $4
                  AND revoked_on IS NULL
                  AND (expires_on IS NULL OR expires_on > now())
            )
            "#,
        )
        .bind(key.user_id.as_str())
        .bind(key.tenant_id.as_str())
        .bind(key.grant_type.as_str())
        .bind(key.qualifier.as_str())
        .fetch_one(scoped.connection()?)
        .await
        .map_err(failed("exists"))
    }

    pub(super) async fn read_all_impl(&self, user_id: &str) -> AppResult<Vec<Grant>> {
        let mut scoped = self.scope.acquire(RESOURCE).await?;
        let rows = sqlx::query_as::<_, GrantRow>(&format!(
            r#"
            SELECT {GRANT_COLUMNS}
            FROM grants
            WHERE user_id = $1
            ORDER BY tenant_id, grant_type, qualifier
            "#
        ))
        .bind(user_id)
        .fetch_all(scoped.connection()?)
        .await
        .map_err(failed("read_all"))?;

        into_grants(rows)
    }

    pub(super) async fn matching_impl(
        &self,
        scope: &GrantScope,
        user_id: Option<&str>,
    ) -> AppResult<Vec<Grant>> {
        let tenants = position_candidates(scope.tenant_id.as_str());
        let grant_types = position_candidates(scope.grant_type.as_str());
        let qualifiers = (scope.qualifier != WILDCARD)
            .then(|| qualifier_candidates(scope.qualifier.as_str()));
        let mut scoped = self.scope.acquire(RESOURCE).await?;

        let rows = sqlx::query_as::<_, GrantRow>(&format!(
            r#"
            SELECT {GRANT_COLUMNS}
            FROM grants
            WHERE ($1::TEXT IS NULL OR user_id = $1)
              AND ($2::TEXT[] IS NULL OR tenant_id = ANY($2))
              AND ($3::TEXT[] IS NULL OR grant_type = ANY($3))
              AND ($4::TEXT[] IS NULL OR qualifier = ANY($4))
            ORDER BY user_id, tenant_id, grant_type, qualifier
            "#
        ))
        .bind(user_id)
        .bind(tenants)
        .bind(grant_types)
        .bind(qualifiers)
        .fetch_all(scoped.connection()?)
        .await
        .map_err(failed("matching"))?;

        into_grants(rows)
    }
}
