//! Persistence seams. `Database` implements them on PostgreSQL, `InMemoryStore` in
//! process memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{AuditEntry, AuditFilter, AuditStats, RefreshToken, UserAccount};

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserAccount>, AppError>;
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<UserAccount>, AppError>;
    /// Fails with `AppError::Conflict` when the email is already taken.
    async fn insert_user(&self, user: &UserAccount) -> Result<(), AppError>;
    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError>;
    async fn health_check(&self) -> Result<(), AppError>;
}

/// Result of presenting a refresh secret for rotation.
#[derive(Debug, Clone)]
pub enum RefreshRedemption {
    /// The token was valid and is now revoked; the caller may issue its successor.
    Redeemed(RefreshToken),
    Unknown,
    Revoked,
    Expired,
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError>;

    /// Atomically revoke the token with this digest if it is still valid at `now`.
    /// Of any number of concurrent redemptions of one token, at most one observes
    /// `Redeemed`.
    async fn redeem_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshRedemption, AppError>;

    /// Revoke every outstanding token of the user, returning how many were revoked.
    async fn revoke_all_for_user(&self, user_id: Uuid, now: DateTime<Utc>)
        -> Result<u64, AppError>;

    /// Delete tokens whose expiry has passed, revoked or not.
    async fn delete_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

/// Append-only audit trail. Reads are always scoped to one organization.
#[async_trait]
pub trait AuditLogStore: Send + Sync {
    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), AppError>;

    /// Newest first, with the total number of matches before pagination.
    async fn find_audit_entries(
        &self,
        organization_id: Uuid,
        filter: &AuditFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<AuditEntry>, i64), AppError>;

    async fn find_audit_entry(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<AuditEntry>, AppError>;

    /// Every match, oldest first.
    async fn export_audit_entries(
        &self,
        organization_id: Uuid,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, AppError>;

    async fn audit_stats(
        &self,
        organization_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<AuditStats, AppError>;

    /// Delete the organization's entries created before `cutoff`.
    async fn purge_audit_entries(
        &self,
        organization_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError>;
}
