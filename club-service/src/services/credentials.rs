//! Credential lifecycle: login, registration, refresh-token rotation, logout and the
//! expired-token sweep.

use chrono::{Duration, Utc};
use metrics::counter;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::audit::{AuditRecorder, RequestMetadata};
use super::error::CredentialError;
use super::jwt::JwtService;
use super::stores::{RefreshRedemption, RefreshTokenStore, UserStore};
use crate::models::{AuditAction, ClientInfo, Principal, RefreshToken, Role, UserAccount};
use crate::utils::{hash_password, verify_against_dummy, verify_password, Password, PasswordHashString};

/// Token pair returned by login, registration and refresh.
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub principal: Principal,
}

/// Fields for a new account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub organization_id: Uuid,
    pub email: String,
    pub password: Password,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

#[derive(Clone)]
pub struct CredentialIssuer {
    users: Arc<dyn UserStore>,
    tokens: Arc<dyn RefreshTokenStore>,
    jwt: JwtService,
    recorder: AuditRecorder,
    refresh_token_ttl: Duration,
}

impl CredentialIssuer {
    pub fn new(
        users: Arc<dyn UserStore>,
        tokens: Arc<dyn RefreshTokenStore>,
        jwt: JwtService,
        recorder: AuditRecorder,
        refresh_token_expiry_days: i64,
    ) -> Self {
        Self {
            users,
            tokens,
            jwt,
            recorder,
            refresh_token_ttl: Duration::days(refresh_token_expiry_days),
        }
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        request: &RequestMetadata,
    ) -> Result<TokenResponse, CredentialError> {
        let email = email.trim().to_lowercase();
        let password = Password::new(password.to_string());

        let Some(account) = self.users.find_user_by_email(&email).await? else {
            verify_against_dummy(&password);
            tracing::warn!(ip = ?request.ip_address, "Login attempt for unknown email");
            return Err(self.reject(CredentialError::AuthFailed, "unknown_email"));
        };

        let hash = PasswordHashString::new(account.password_hash.clone());
        if verify_password(&password, &hash).is_err() {
            tracing::warn!(user_id = %account.id, "Login failed: wrong password");
            self.recorder.spawn_security_event(
                account,
                AuditAction::FailedLogin,
                request.clone(),
                Some("Invalid credentials".to_string()),
            );
            return Err(self.reject(CredentialError::AuthFailed, "wrong_password"));
        }

        if !account.is_active() {
            tracing::warn!(user_id = %account.id, status = account.status.as_str(), "Login failed: account not active");
            let message = format!("Account is {}", account.status.as_str());
            self.recorder.spawn_security_event(
                account,
                AuditAction::FailedLogin,
                request.clone(),
                Some(message),
            );
            return Err(self.reject(CredentialError::AuthFailed, "inactive_account"));
        }

        self.users.record_login(account.id, Utc::now()).await?;
        let tokens = self.issue_token_pair(&account, &ClientInfo::from(request)).await?;

        self.recorder
            .record_security_event(&account, AuditAction::Login, request, None)
            .await;
        tracing::info!(user_id = %account.id, organization_id = %account.organization_id, "User logged in");

        Ok(tokens)
    }

    pub async fn register(
        &self,
        new_account: NewAccount,
        request: &RequestMetadata,
    ) -> Result<TokenResponse, CredentialError> {
        let email = new_account.email.trim().to_lowercase();
        if self.users.find_user_by_email(&email).await?.is_some() {
            return Err(CredentialError::EmailAlreadyRegistered);
        }

        let password_hash = hash_password(&new_account.password)?;
        let account = UserAccount::new(
            new_account.organization_id,
            email,
            password_hash.into_string(),
            new_account.first_name,
            new_account.last_name,
            new_account.role,
        );

        self.users.insert_user(&account).await?;
        tracing::info!(user_id = %account.id, organization_id = %account.organization_id, "User registered");

        self.issue_token_pair(&account, &ClientInfo::from(request)).await
    }

    /// Rotate a refresh token: the presented token is revoked and a new pair issued.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        request: &RequestMetadata,
    ) -> Result<TokenResponse, CredentialError> {
        let token_hash = RefreshToken::hash_token(refresh_token);

        let parent = match self.tokens.redeem_refresh_token(&token_hash, Utc::now()).await? {
            RefreshRedemption::Redeemed(token) => token,
            RefreshRedemption::Unknown => {
                return Err(self.reject(CredentialError::TokenInvalid, "token_invalid"))
            }
            RefreshRedemption::Revoked => {
                tracing::warn!(ip = ?request.ip_address, "Revoked refresh token presented");
                return Err(self.reject(CredentialError::TokenRevoked, "token_revoked"));
            }
            RefreshRedemption::Expired => {
                return Err(self.reject(CredentialError::TokenExpired, "token_expired"))
            }
        };

        let account = match self.users.find_user_by_id(parent.user_id).await? {
            Some(account) if account.is_active() => account,
            _ => {
                tracing::warn!(user_id = %parent.user_id, "Refresh for missing or inactive account");
                return Err(self.reject(CredentialError::TokenInvalid, "account_unavailable"));
            }
        };

        let tokens = self.issue_token_pair(&account, &ClientInfo::from(request)).await?;
        tracing::info!(user_id = %account.id, parent_token_id = %parent.id, "Refresh token rotated");
        Ok(tokens)
    }

    /// Revoke every outstanding refresh token of the principal. Access tokens already
    /// issued stay valid until they expire.
    pub async fn logout(&self, principal: &Principal) -> Result<u64, CredentialError> {
        let revoked = self
            .tokens
            .revoke_all_for_user(principal.id, Utc::now())
            .await?;
        tracing::info!(user_id = %principal.id, revoked, "User logged out");
        Ok(revoked)
    }

    /// Delete refresh tokens whose expiry has passed, revoked or not.
    pub async fn sweep_expired(&self) -> Result<u64, CredentialError> {
        let removed = self.tokens.delete_expired_refresh_tokens(Utc::now()).await?;
        counter!("refresh_tokens_swept_total").increment(removed);
        if removed > 0 {
            tracing::info!(removed, "Expired refresh tokens swept");
        }
        Ok(removed)
    }

    async fn issue_token_pair(
        &self,
        account: &UserAccount,
        client: &ClientInfo,
    ) -> Result<TokenResponse, CredentialError> {
        let principal = account.principal();
        let access_token = self.jwt.generate_access_token(&principal)?;

        let secret = generate_random_token();
        let refresh = RefreshToken::new(account.id, &secret, self.refresh_token_ttl, client);
        self.tokens.insert_refresh_token(&refresh).await?;

        Ok(TokenResponse {
            access_token,
            refresh_token: secret,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
            principal,
        })
    }

    /// Count the rejection under the error's public label; `detail` only reaches logs.
    fn reject(&self, err: CredentialError, detail: &'static str) -> CredentialError {
        counter!("auth_failures_total", "reason" => err.reason()).increment(1);
        tracing::debug!(reason = err.reason(), detail, "Credential rejected");
        err
    }
}

/// 32 random bytes, hex-encoded.
fn generate_random_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}
