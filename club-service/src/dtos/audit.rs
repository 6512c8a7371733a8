use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::models::{AuditAction, AuditEntry, AuditFilter, AuditStats};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 1000;

/// Query for `GET /audit-logs` and `GET /audit-logs/export`.
#[derive(Debug, Default, Deserialize)]
pub struct AuditLogQuery {
    pub user_id: Option<Uuid>,
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub ip_address: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditLogQuery {
    pub fn filter(&self) -> Result<AuditFilter, AppError> {
        let action = self
            .action
            .as_deref()
            .map(AuditAction::from_str)
            .transpose()
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?;

        Ok(AuditFilter {
            user_id: self.user_id,
            action,
            entity_type: self.entity_type.clone(),
            entity_id: self.entity_id.clone(),
            ip_address: self.ip_address.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
        })
    }

    /// Page size clamped to `1..=1000`, default 50.
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[derive(Debug, Deserialize)]
pub struct HoursQuery {
    #[serde(default = "default_hours")]
    pub hours: i64,
}

fn default_hours() -> i64 {
    24
}

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    30
}

#[derive(Debug, Deserialize, Validate)]
pub struct PurgeRequest {
    #[validate(range(
        min = 1,
        max = 36500,
        message = "retention_days must be between 1 and 36500"
    ))]
    pub retention_days: i64,
}

#[derive(Debug, Serialize)]
pub struct AuditLogPage {
    pub data: Vec<AuditEntry>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct AuditStatsResponse {
    #[serde(flatten)]
    pub stats: AuditStats,
    pub period_days: i64,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub deleted: u64,
    pub cutoff_date: DateTime<Utc>,
    pub retention_days: i64,
}
