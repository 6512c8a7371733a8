//! Audit trail entry: one immutable record per audited request.

use axum::http::Method;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{postgres::PgRow, FromRow, Row};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{user::decode_code, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    SoftDelete,
    Restore,
    Login,
    Logout,
    FailedLogin,
    PasswordChange,
    Cancel,
    Renew,
    Suspend,
    Reactivate,
    Other,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::SoftDelete => "SOFT_DELETE",
            AuditAction::Restore => "RESTORE",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
            AuditAction::FailedLogin => "FAILED_LOGIN",
            AuditAction::PasswordChange => "PASSWORD_CHANGE",
            AuditAction::Cancel => "CANCEL",
            AuditAction::Renew => "RENEW",
            AuditAction::Suspend => "SUSPEND",
            AuditAction::Reactivate => "REACTIVATE",
            AuditAction::Other => "OTHER",
        }
    }

    /// Verb phrase used in entry descriptions.
    pub fn past_tense(&self) -> &'static str {
        match self {
            AuditAction::Create => "created",
            AuditAction::Update => "updated",
            AuditAction::Delete => "deleted",
            AuditAction::SoftDelete => "soft deleted",
            AuditAction::Restore => "restored",
            AuditAction::Login => "logged in",
            AuditAction::Logout => "logged out",
            AuditAction::FailedLogin => "failed to login",
            AuditAction::PasswordChange => "changed password",
            AuditAction::Cancel => "cancelled",
            AuditAction::Renew => "renewed",
            AuditAction::Suspend => "suspended",
            AuditAction::Reactivate => "reactivated",
            AuditAction::Other => "performed action on",
        }
    }

    /// Default action for an HTTP verb when the route declares none.
    pub fn from_method(method: &Method) -> Self {
        match *method {
            Method::POST => AuditAction::Create,
            Method::PUT | Method::PATCH => AuditAction::Update,
            Method::DELETE => AuditAction::Delete,
            _ => AuditAction::Other,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CREATE" => Ok(AuditAction::Create),
            "UPDATE" => Ok(AuditAction::Update),
            "DELETE" => Ok(AuditAction::Delete),
            "SOFT_DELETE" => Ok(AuditAction::SoftDelete),
            "RESTORE" => Ok(AuditAction::Restore),
            "LOGIN" => Ok(AuditAction::Login),
            "LOGOUT" => Ok(AuditAction::Logout),
            "FAILED_LOGIN" => Ok(AuditAction::FailedLogin),
            "PASSWORD_CHANGE" => Ok(AuditAction::PasswordChange),
            "CANCEL" => Ok(AuditAction::Cancel),
            "RENEW" => Ok(AuditAction::Renew),
            "SUSPEND" => Ok(AuditAction::Suspend),
            "REACTIVATE" => Ok(AuditAction::Reactivate),
            "OTHER" => Ok(AuditAction::Other),
            _ => Err(format!("Invalid audit action: {}", s)),
        }
    }
}

/// Audit log entry. `organization_id` is always the actor's organization at
/// capture time.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub user_email: String,
    pub user_role: Role,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub http_method: Option<String>,
    pub request_url: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub description: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AuditEntry {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            user_id: row.try_get("user_id")?,
            user_email: row.try_get("user_email")?,
            user_role: decode_code(row, "user_role")?,
            action: decode_code(row, "action")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            old_values: row.try_get("old_values")?,
            new_values: row.try_get("new_values")?,
            http_method: row.try_get("http_method")?,
            request_url: row.try_get("request_url")?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            success: row.try_get("success")?,
            error_message: row.try_get("error_message")?,
            description: row.try_get("description")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Optional filters for audit queries. Every query is also scoped to one
/// organization by the store.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub ip_address: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.user_id.map_or(true, |id| entry.user_id == id)
            && self.action.map_or(true, |a| entry.action == a)
            && self
                .entity_type
                .as_ref()
                .map_or(true, |t| &entry.entity_type == t)
            && self
                .entity_id
                .as_ref()
                .map_or(true, |id| entry.entity_id.as_ref() == Some(id))
            && self
                .ip_address
                .as_ref()
                .map_or(true, |ip| entry.ip_address.as_ref() == Some(ip))
            && self.start_date.map_or(true, |from| entry.created_at >= from)
            && self.end_date.map_or(true, |to| entry.created_at <= to)
    }
}

/// Aggregate counts over an organization's recent audit entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditStats {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub by_action: BTreeMap<String, i64>,
    pub by_entity_type: BTreeMap<String, i64>,
    pub by_user: BTreeMap<String, i64>,
}

impl AuditStats {
    /// Fold `count` entries sharing the same action, entity type, actor and outcome.
    pub fn accumulate(
        &mut self,
        action: &str,
        entity_type: &str,
        user_email: &str,
        success: bool,
        count: i64,
    ) {
        self.total += count;
        if success {
            self.success += count;
        } else {
            self.failed += count;
        }
        *self.by_action.entry(action.to_string()).or_default() += count;
        *self.by_entity_type.entry(entity_type.to_string()).or_default() += count;
        if !user_email.is_empty() {
            *self.by_user.entry(user_email.to_string()).or_default() += count;
        }
    }
}
