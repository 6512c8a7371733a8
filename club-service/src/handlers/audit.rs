//! Organization-scoped audit trail queries, export and retention purge.

use chrono::{DateTime, Duration, Utc};
use service_core::{
    axum::{
        extract::{Path, Query, State},
        Json,
    },
    error::AppError,
};
use uuid::Uuid;

use crate::{
    dtos::audit::{
        AuditLogPage, AuditLogQuery, AuditStatsResponse, DaysQuery, HoursQuery, PurgeRequest,
        PurgeResponse, MAX_PAGE_SIZE,
    },
    models::{AuditAction, AuditEntry, AuditFilter, Role},
    services::TenantScopedRequest,
    utils::ValidatedJson,
    AppState,
};

const READ_ROLES: &[Role] = &[Role::Admin, Role::Coach];
const ADMIN_ONLY: &[Role] = &[Role::Admin];

const USER_HISTORY_LIMIT: i64 = 100;
const RECENT_LIMIT: i64 = 100;

/// `now - window`, or 400 when the window does not fit the calendar.
fn window_start(window: Option<Duration>, param: &str) -> Result<DateTime<Utc>, AppError> {
    window
        .and_then(|w| Utc::now().checked_sub_signed(w))
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("{} is out of range", param)))
}

fn require_role(scope: &TenantScopedRequest, roles: &[Role]) -> Result<(), AppError> {
    if scope.principal.has_any_role(roles) {
        return Ok(());
    }
    tracing::warn!(
        user_id = %scope.principal.id,
        role = %scope.principal.role,
        route = %scope.route,
        "Audit access denied for role"
    );
    Err(AppError::Forbidden(anyhow::anyhow!("Insufficient permissions")))
}

/// GET /audit-logs
pub async fn list_audit_logs(
    State(state): State<AppState>,
    scope: TenantScopedRequest,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<AuditLogPage>, AppError> {
    require_role(&scope, READ_ROLES)?;

    let filter = query.filter()?;
    let (limit, offset) = (query.limit(), query.offset());
    let (data, total) = state
        .audit_store
        .find_audit_entries(scope.organization_id, &filter, limit, offset)
        .await?;

    Ok(Json(AuditLogPage {
        data,
        total,
        limit,
        offset,
    }))
}

/// GET /audit-logs/:id
pub async fn get_audit_log(
    State(state): State<AppState>,
    scope: TenantScopedRequest,
    Path(id): Path<Uuid>,
) -> Result<Json<AuditEntry>, AppError> {
    require_role(&scope, READ_ROLES)?;

    state
        .audit_store
        .find_audit_entry(scope.organization_id, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Audit log not found")))
}

/// GET /audit-logs/entity/:entity_type/:entity_id
pub async fn entity_history(
    State(state): State<AppState>,
    scope: TenantScopedRequest,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    require_role(&scope, READ_ROLES)?;

    let filter = AuditFilter {
        entity_type: Some(entity_type),
        entity_id: Some(entity_id),
        ..Default::default()
    };
    let (entries, _) = state
        .audit_store
        .find_audit_entries(scope.organization_id, &filter, MAX_PAGE_SIZE, 0)
        .await?;
    Ok(Json(entries))
}

/// GET /audit-logs/user/:user_id
pub async fn user_activity(
    State(state): State<AppState>,
    scope: TenantScopedRequest,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    require_role(&scope, READ_ROLES)?;

    let filter = AuditFilter {
        user_id: Some(user_id),
        ..Default::default()
    };
    let (entries, _) = state
        .audit_store
        .find_audit_entries(scope.organization_id, &filter, USER_HISTORY_LIMIT, 0)
        .await?;
    Ok(Json(entries))
}

/// GET /audit-logs/recent?hours=24
pub async fn recent_activity(
    State(state): State<AppState>,
    scope: TenantScopedRequest,
    Query(query): Query<HoursQuery>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    require_role(&scope, READ_ROLES)?;

    let filter = AuditFilter {
        start_date: Some(window_start(Duration::try_hours(query.hours.max(1)), "hours")?),
        ..Default::default()
    };
    let (entries, _) = state
        .audit_store
        .find_audit_entries(scope.organization_id, &filter, RECENT_LIMIT, 0)
        .await?;
    Ok(Json(entries))
}

/// GET /audit-logs/failed-logins?hours=24
pub async fn failed_logins(
    State(state): State<AppState>,
    scope: TenantScopedRequest,
    Query(query): Query<HoursQuery>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    require_role(&scope, ADMIN_ONLY)?;

    let filter = AuditFilter {
        action: Some(AuditAction::FailedLogin),
        start_date: Some(window_start(Duration::try_hours(query.hours.max(1)), "hours")?),
        ..Default::default()
    };
    let (entries, _) = state
        .audit_store
        .find_audit_entries(scope.organization_id, &filter, MAX_PAGE_SIZE, 0)
        .await?;
    Ok(Json(entries))
}

/// GET /audit-logs/stats?days=30
pub async fn audit_stats(
    State(state): State<AppState>,
    scope: TenantScopedRequest,
    Query(query): Query<DaysQuery>,
) -> Result<Json<AuditStatsResponse>, AppError> {
    require_role(&scope, ADMIN_ONLY)?;

    let period_days = query.days.max(1);
    let since = window_start(Duration::try_days(period_days), "days")?;
    let stats = state
        .audit_store
        .audit_stats(scope.organization_id, since)
        .await?;
    Ok(Json(AuditStatsResponse { stats, period_days }))
}

/// GET /audit-logs/export
///
/// Full matching set in chronological order for compliance exports.
pub async fn export_audit_logs(
    State(state): State<AppState>,
    scope: TenantScopedRequest,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    require_role(&scope, ADMIN_ONLY)?;

    let filter = query.filter()?;
    let entries = state
        .audit_store
        .export_audit_entries(scope.organization_id, &filter)
        .await?;
    tracing::info!(
        organization_id = %scope.organization_id,
        user_id = %scope.principal.id,
        count = entries.len(),
        "Audit logs exported"
    );
    Ok(Json(entries))
}

/// POST /audit-logs/purge
pub async fn purge_audit_logs(
    State(state): State<AppState>,
    scope: TenantScopedRequest,
    ValidatedJson(req): ValidatedJson<PurgeRequest>,
) -> Result<Json<PurgeResponse>, AppError> {
    require_role(&scope, ADMIN_ONLY)?;

    let cutoff_date = window_start(Duration::try_days(req.retention_days), "retention_days")?;
    let deleted = state
        .audit_store
        .purge_audit_entries(scope.organization_id, cutoff_date)
        .await?;
    tracing::info!(
        organization_id = %scope.organization_id,
        user_id = %scope.principal.id,
        deleted,
        retention_days = req.retention_days,
        "Audit logs purged"
    );

    Ok(Json(PurgeResponse {
        deleted,
        cutoff_date,
        retention_days: req.retention_days,
    }))
}
