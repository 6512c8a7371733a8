use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::stores::{AuditLogStore, RefreshRedemption, RefreshTokenStore, UserStore};
use crate::models::{AuditEntry, AuditFilter, AuditStats, RefreshToken, UserAccount};

/// Process-local store for tests and single-node development.
///
/// Each collection sits behind one mutex, so refresh redemption is a check-and-set
/// under that lock.
#[derive(Default)]
pub struct InMemoryStore {
    users: Mutex<HashMap<Uuid, UserAccount>>,
    refresh_tokens: Mutex<HashMap<String, RefreshToken>>,
    audit_entries: Mutex<Vec<AuditEntry>>,
    fail_audit_writes: Mutex<bool>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, name: &str) -> Result<MutexGuard<'a, T>, AppError> {
    mutex
        .lock()
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("{} mutex poisoned: {}", name, e)))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent audit append fail, to exercise persistence-failure paths.
    pub fn set_fail_audit_writes(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_audit_writes.lock() {
            *flag = fail;
        }
    }

    pub fn refresh_token_by_hash(&self, token_hash: &str) -> Option<RefreshToken> {
        self.refresh_tokens
            .lock()
            .ok()
            .and_then(|tokens| tokens.get(token_hash).cloned())
    }

    pub fn refresh_tokens_for_user(&self, user_id: Uuid) -> Vec<RefreshToken> {
        self.refresh_tokens
            .lock()
            .map(|tokens| {
                tokens
                    .values()
                    .filter(|t| t.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All audit entries across organizations, in insertion order.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit_entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserAccount>, AppError> {
        let users = lock(&self.users, "users")?;
        Ok(users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<UserAccount>, AppError> {
        Ok(lock(&self.users, "users")?.get(&id).cloned())
    }

    async fn insert_user(&self, user: &UserAccount) -> Result<(), AppError> {
        let mut users = lock(&self.users, "users")?;
        if users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Email already registered"
            )));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        if let Some(user) = lock(&self.users, "users")?.get_mut(&id) {
            user.last_login_at = Some(at);
            user.updated_at = at;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryStore {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError> {
        lock(&self.refresh_tokens, "refresh_tokens")?.insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn redeem_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshRedemption, AppError> {
        let mut tokens = lock(&self.refresh_tokens, "refresh_tokens")?;
        let Some(token) = tokens.get_mut(token_hash) else {
            return Ok(RefreshRedemption::Unknown);
        };

        if token.revoked {
            return Ok(RefreshRedemption::Revoked);
        }
        if token.is_expired_at(now) {
            return Ok(RefreshRedemption::Expired);
        }

        token.revoked = true;
        token.revoked_at = Some(now);
        Ok(RefreshRedemption::Redeemed(token.clone()))
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut tokens = lock(&self.refresh_tokens, "refresh_tokens")?;
        let mut revoked = 0;
        for token in tokens
            .values_mut()
            .filter(|t| t.user_id == user_id && !t.revoked)
        {
            token.revoked = true;
            token.revoked_at = Some(now);
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn delete_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut tokens = lock(&self.refresh_tokens, "refresh_tokens")?;
        let before = tokens.len();
        tokens.retain(|_, t| !t.is_expired_at(now));
        Ok((before - tokens.len()) as u64)
    }
}

#[async_trait]
impl AuditLogStore for InMemoryStore {
    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), AppError> {
        if *lock(&self.fail_audit_writes, "fail_audit_writes")? {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "audit_logs is unavailable"
            )));
        }
        lock(&self.audit_entries, "audit_entries")?.push(entry.clone());
        Ok(())
    }

    async fn find_audit_entries(
        &self,
        organization_id: Uuid,
        filter: &AuditFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<AuditEntry>, i64), AppError> {
        let entries = lock(&self.audit_entries, "audit_entries")?;
        let mut matches: Vec<&AuditEntry> = entries
            .iter()
            .filter(|e| e.organization_id == organization_id && filter.matches(e))
            .collect();
        // Stable sort keeps insertion order for equal timestamps; reverse for newest first.
        matches.sort_by_key(|e| e.created_at);
        matches.reverse();

        let total = matches.len() as i64;
        let page = matches
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn find_audit_entry(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<AuditEntry>, AppError> {
        Ok(lock(&self.audit_entries, "audit_entries")?
            .iter()
            .find(|e| e.id == id && e.organization_id == organization_id)
            .cloned())
    }

    async fn export_audit_entries(
        &self,
        organization_id: Uuid,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, AppError> {
        let entries = lock(&self.audit_entries, "audit_entries")?;
        let mut matches: Vec<AuditEntry> = entries
            .iter()
            .filter(|e| e.organization_id == organization_id && filter.matches(e))
            .cloned()
            .collect();
        matches.sort_by_key(|e| e.created_at);
        Ok(matches)
    }

    async fn audit_stats(
        &self,
        organization_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<AuditStats, AppError> {
        let entries = lock(&self.audit_entries, "audit_entries")?;
        let mut stats = AuditStats::default();
        for entry in entries
            .iter()
            .filter(|e| e.organization_id == organization_id && e.created_at >= since)
        {
            stats.accumulate(
                entry.action.as_str(),
                &entry.entity_type,
                &entry.user_email,
                entry.success,
                1,
            );
        }
        Ok(stats)
    }

    async fn purge_audit_entries(
        &self,
        organization_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut entries = lock(&self.audit_entries, "audit_entries")?;
        let before = entries.len();
        entries.retain(|e| !(e.organization_id == organization_id && e.created_at < cutoff));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClientInfo;
    use chrono::Duration;

    fn token(user_id: Uuid, secret: &str, ttl: Duration) -> RefreshToken {
        RefreshToken::new(user_id, secret, ttl, &ClientInfo::default())
    }

    #[tokio::test]
    async fn redemption_is_single_use() {
        let store = InMemoryStore::new();
        let t = token(Uuid::new_v4(), "secret", Duration::days(30));
        store.insert_refresh_token(&t).await.unwrap();

        let now = Utc::now();
        assert!(matches!(
            store.redeem_refresh_token(&t.token_hash, now).await.unwrap(),
            RefreshRedemption::Redeemed(_)
        ));
        assert!(matches!(
            store.redeem_refresh_token(&t.token_hash, now).await.unwrap(),
            RefreshRedemption::Revoked
        ));
        assert!(matches!(
            store.redeem_refresh_token("missing", now).await.unwrap(),
            RefreshRedemption::Unknown
        ));
    }

    #[tokio::test]
    async fn expired_token_is_not_redeemed() {
        let store = InMemoryStore::new();
        let t = token(Uuid::new_v4(), "secret", Duration::seconds(-1));
        store.insert_refresh_token(&t).await.unwrap();

        assert!(matches!(
            store.redeem_refresh_token(&t.token_hash, Utc::now()).await.unwrap(),
            RefreshRedemption::Expired
        ));
        assert!(!store.refresh_token_by_hash(&t.token_hash).unwrap().revoked);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let live = token(user, "live", Duration::days(1));
        let dead = token(user, "dead", Duration::seconds(-5));
        let mut dead_revoked = token(user, "dead-revoked", Duration::seconds(-5));
        dead_revoked.revoked = true;
        for t in [&live, &dead, &dead_revoked] {
            store.insert_refresh_token(t).await.unwrap();
        }

        let removed = store.delete_expired_refresh_tokens(Utc::now()).await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.refresh_token_by_hash(&live.token_hash).is_some());
    }

    #[tokio::test]
    async fn revoke_all_counts_outstanding_tokens() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        store.insert_refresh_token(&token(user, "a", Duration::days(1))).await.unwrap();
        store.insert_refresh_token(&token(user, "b", Duration::days(1))).await.unwrap();
        store
            .insert_refresh_token(&token(Uuid::new_v4(), "other", Duration::days(1)))
            .await
            .unwrap();

        assert_eq!(store.revoke_all_for_user(user, Utc::now()).await.unwrap(), 2);
        assert_eq!(store.revoke_all_for_user(user, Utc::now()).await.unwrap(), 0);
        assert!(store.refresh_tokens_for_user(user).iter().all(|t| t.revoked));
    }
}
