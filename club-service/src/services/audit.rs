//! Audit capture: turns one audited request into one immutable [`AuditEntry`].

use axum::http::Method;
use chrono::Utc;
use metrics::counter;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use super::stores::AuditLogStore;
use crate::config::RoutePolicy;
use crate::models::{AuditAction, AuditEntry, ClientInfo, Principal, UserAccount};
use crate::utils::redact_value;

/// Transport details recorded with every entry.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    pub http_method: Option<String>,
    pub request_url: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}

impl From<&RequestMetadata> for ClientInfo {
    fn from(meta: &RequestMetadata) -> Self {
        ClientInfo {
            user_agent: meta.user_agent.clone(),
            ip_address: meta.ip_address.clone(),
        }
    }
}

/// Everything known about an audited request before the handler runs.
#[derive(Debug, Clone)]
pub struct AuditCapture<'a> {
    pub principal: &'a Principal,
    pub route: &'a str,
    pub policy: &'a RoutePolicy,
    pub method: &'a Method,
    /// URL path without the query string.
    pub path: &'a str,
    pub path_params: &'a [(String, String)],
    pub request_body: Option<&'a Value>,
    pub request: &'a RequestMetadata,
}

#[derive(Debug, Clone)]
pub enum AuditOutcome {
    Success { response: Option<Value> },
    Failure { message: String },
}

#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditLogStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditLogStore>) -> Self {
        Self { store }
    }

    pub fn build_entry(&self, capture: &AuditCapture<'_>, outcome: AuditOutcome) -> AuditEntry {
        let principal = capture.principal;
        let action = capture
            .policy
            .action_override
            .unwrap_or_else(|| AuditAction::from_method(capture.method));
        let entity_type = capture
            .policy
            .entity_type_override
            .clone()
            .unwrap_or_else(|| entity_type_from_path(capture.path));
        let description = describe(&principal.email, action, &entity_type);
        let param_id = capture
            .path_params
            .iter()
            .find(|(k, _)| k == "id")
            .map(|(_, v)| v.clone());
        let request_values = capture.request_body.and_then(redact_value);

        let mut metadata = Map::new();
        metadata.insert("route".to_string(), Value::String(capture.route.to_string()));
        if let Some(request_id) = &capture.request.request_id {
            metadata.insert("request_id".to_string(), Value::String(request_id.clone()));
        }

        let (entity_id, new_values, success, error_message, description) = match outcome {
            AuditOutcome::Success { response } => (
                param_id.or_else(|| response.as_ref().and_then(id_field)),
                request_values.or_else(|| response.as_ref().and_then(redact_value)),
                true,
                None,
                description,
            ),
            AuditOutcome::Failure { message } => (
                param_id,
                request_values,
                false,
                Some(message),
                format!("Failed: {}", description),
            ),
        };

        AuditEntry {
            id: Uuid::new_v4(),
            organization_id: principal.organization_id,
            user_id: principal.id,
            user_email: principal.email.clone(),
            user_role: principal.role,
            action,
            entity_type,
            entity_id,
            old_values: None,
            new_values,
            http_method: capture.request.http_method.clone(),
            request_url: capture.request.request_url.clone(),
            ip_address: capture.request.ip_address.clone(),
            user_agent: capture.request.user_agent.clone(),
            success,
            error_message,
            description,
            metadata: Value::Object(metadata),
            created_at: Utc::now(),
        }
    }

    /// Build and persist the entry for one audited request. Persistence failures are
    /// logged and counted, never returned.
    pub async fn record(&self, capture: &AuditCapture<'_>, outcome: AuditOutcome) {
        let entry = self.build_entry(capture, outcome);
        self.persist(entry).await;
    }

    /// Credential events written by the issuer itself: the account is the actor and
    /// the target.
    pub async fn record_security_event(
        &self,
        account: &UserAccount,
        action: AuditAction,
        request: &RequestMetadata,
        error_message: Option<String>,
    ) {
        let mut metadata = Map::new();
        metadata.insert("event".to_string(), Value::String("security".to_string()));
        if let Some(request_id) = &request.request_id {
            metadata.insert("request_id".to_string(), Value::String(request_id.clone()));
        }

        let entry = AuditEntry {
            id: Uuid::new_v4(),
            organization_id: account.organization_id,
            user_id: account.id,
            user_email: account.email.clone(),
            user_role: account.role,
            action,
            entity_type: "User".to_string(),
            entity_id: Some(account.id.to_string()),
            old_values: None,
            new_values: Some(json!({ "email": account.email })),
            http_method: request.http_method.clone(),
            request_url: request.request_url.clone(),
            ip_address: request.ip_address.clone(),
            user_agent: request.user_agent.clone(),
            success: error_message.is_none(),
            error_message,
            description: describe(&account.email, action, "User"),
            metadata: Value::Object(metadata),
            created_at: Utc::now(),
        };

        self.persist(entry).await;
    }

    /// Same as [`record_security_event`](Self::record_security_event) but persisted on a
    /// background task, so the caller's response does not wait on the store.
    pub fn spawn_security_event(
        &self,
        account: UserAccount,
        action: AuditAction,
        request: RequestMetadata,
        error_message: Option<String>,
    ) {
        let recorder = self.clone();
        tokio::spawn(async move {
            recorder
                .record_security_event(&account, action, &request, error_message)
                .await;
        });
    }

    async fn persist(&self, entry: AuditEntry) {
        let outcome = if entry.success { "success" } else { "failure" };
        match self.store.append_audit_entry(&entry).await {
            Ok(()) => {
                counter!("audit_entries_total", "outcome" => outcome).increment(1);
                tracing::debug!(
                    audit_id = %entry.id,
                    organization_id = %entry.organization_id,
                    action = %entry.action,
                    entity_type = %entry.entity_type,
                    success = entry.success,
                    "Audit entry recorded"
                );
            }
            Err(e) => {
                counter!("audit_persist_failures_total").increment(1);
                tracing::error!(
                    error = %e,
                    organization_id = %entry.organization_id,
                    action = %entry.action,
                    entity_type = %entry.entity_type,
                    "Failed to persist audit entry"
                );
            }
        }
    }
}

/// `"{email} {past tense} {entity type}"`, e.g. `coach@club.test created Course`.
pub fn describe(email: &str, action: AuditAction, entity_type: &str) -> String {
    format!("{} {} {}", email, action.past_tense(), entity_type)
}

/// Entity type guessed from the first non-`api` path segment: capitalized, trailing
/// character dropped (`/api/courses/12` gives `Course`).
pub fn entity_type_from_path(path: &str) -> String {
    let Some(segment) = path
        .split('/')
        .find(|s| !s.is_empty() && *s != "api")
    else {
        return "Unknown".to_string();
    };

    let mut chars = segment.chars();
    let Some(first) = chars.next() else {
        return "Unknown".to_string();
    };
    let rest: Vec<char> = chars.collect();
    let middle = rest.len().saturating_sub(1);

    first
        .to_uppercase()
        .chain(rest.into_iter().take(middle))
        .collect()
}

fn id_field(response: &Value) -> Option<String> {
    match response.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
