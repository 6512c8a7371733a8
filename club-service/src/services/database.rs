//! PostgreSQL implementation of the store traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::{postgres::PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::stores::{AuditLogStore, RefreshRedemption, RefreshTokenStore, UserStore};
use crate::models::{AuditEntry, AuditFilter, AuditStats, RefreshToken, UserAccount};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_error(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!(e))
}

/// `WHERE` clause shared by every audit read.
fn push_audit_filter(qb: &mut QueryBuilder<'_, Postgres>, organization_id: Uuid, filter: &AuditFilter) {
    qb.push(" WHERE organization_id = ").push_bind(organization_id);
    if let Some(user_id) = filter.user_id {
        qb.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(action) = filter.action {
        qb.push(" AND action = ").push_bind(action.as_str());
    }
    if let Some(entity_type) = &filter.entity_type {
        qb.push(" AND entity_type = ").push_bind(entity_type.clone());
    }
    if let Some(entity_id) = &filter.entity_id {
        qb.push(" AND entity_id = ").push_bind(entity_id.clone());
    }
    if let Some(ip_address) = &filter.ip_address {
        qb.push(" AND ip_address = ").push_bind(ip_address.clone());
    }
    if let Some(start) = filter.start_date {
        qb.push(" AND created_at >= ").push_bind(start);
    }
    if let Some(end) = filter.end_date {
        qb.push(" AND created_at <= ").push_bind(end);
    }
}

#[async_trait]
impl UserStore for Database {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserAccount>, AppError> {
        sqlx::query_as::<_, UserAccount>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<UserAccount>, AppError> {
        sqlx::query_as::<_, UserAccount>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn insert_user(&self, user: &UserAccount) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, organization_id, email, password_hash, first_name, last_name,
                               role, status, last_login_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.id)
        .bind(user.organization_id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Email already registered"))
            }
            e => db_error(e),
        })?;
        Ok(())
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET last_login_at = $2, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for Database {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, issued_at, expires_at,
                                        revoked, revoked_at, user_agent, ip_address)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .bind(token.revoked)
        .bind(token.revoked_at)
        .bind(&token.user_agent)
        .bind(&token.ip_address)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn redeem_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshRedemption, AppError> {
        // The conditional update is the single point of serialization: only one
        // concurrent caller can flip `revoked` from false.
        let redeemed = sqlx::query_as::<_, RefreshToken>(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = $2
            WHERE token_hash = $1 AND revoked = FALSE AND expires_at > $2
            RETURNING *
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        if let Some(token) = redeemed {
            return Ok(RefreshRedemption::Redeemed(token));
        }

        let existing = sqlx::query_as::<_, RefreshToken>(
            "SELECT * FROM refresh_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(match existing {
            None => RefreshRedemption::Unknown,
            Some(token) if token.revoked => RefreshRedemption::Revoked,
            Some(_) => RefreshRedemption::Expired,
        })
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = $2 WHERE user_id = $1 AND revoked = FALSE",
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuditLogStore for Database {
    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, organization_id, user_id, user_email, user_role, action,
                                    entity_type, entity_id, old_values, new_values, http_method,
                                    request_url, ip_address, user_agent, success, error_message,
                                    description, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(entry.id)
        .bind(entry.organization_id)
        .bind(entry.user_id)
        .bind(&entry.user_email)
        .bind(entry.user_role.as_str())
        .bind(entry.action.as_str())
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.old_values)
        .bind(&entry.new_values)
        .bind(&entry.http_method)
        .bind(&entry.request_url)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.success)
        .bind(&entry.error_message)
        .bind(&entry.description)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn find_audit_entries(
        &self,
        organization_id: Uuid,
        filter: &AuditFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<AuditEntry>, i64), AppError> {
        let mut count_q = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_logs");
        push_audit_filter(&mut count_q, organization_id, filter);
        let (total,) = count_q
            .build_query_as::<(i64,)>()
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        let mut data_q = QueryBuilder::<Postgres>::new("SELECT * FROM audit_logs");
        push_audit_filter(&mut data_q, organization_id, filter);
        data_q
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let entries = data_q
            .build_query_as::<AuditEntry>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        Ok((entries, total))
    }

    async fn find_audit_entry(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<AuditEntry>, AppError> {
        sqlx::query_as::<_, AuditEntry>(
            "SELECT * FROM audit_logs WHERE id = $1 AND organization_id = $2",
        )
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn export_audit_entries(
        &self,
        organization_id: Uuid,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM audit_logs");
        push_audit_filter(&mut qb, organization_id, filter);
        qb.push(" ORDER BY created_at ASC");

        qb.build_query_as::<AuditEntry>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn audit_stats(
        &self,
        organization_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<AuditStats, AppError> {
        let rows = sqlx::query_as::<_, (String, String, String, bool, i64)>(
            r#"
            SELECT action, entity_type, user_email, success, COUNT(*)
            FROM audit_logs
            WHERE organization_id = $1 AND created_at >= $2
            GROUP BY action, entity_type, user_email, success
            "#,
        )
        .bind(organization_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut stats = AuditStats::default();
        for (action, entity_type, user_email, success, count) in rows {
            stats.accumulate(&action, &entity_type, &user_email, success, count);
        }
        Ok(stats)
    }

    async fn purge_audit_entries(
        &self,
        organization_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result =
            sqlx::query("DELETE FROM audit_logs WHERE organization_id = $1 AND created_at < $2")
                .bind(organization_id)
                .bind(cutoff)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}
