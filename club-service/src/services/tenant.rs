//! Tenant context resolution and the payload tenant check.
//!
//! The caller's organization comes only from the verified [`Principal`]. The check then
//! scans the captured request payload for organization references and rejects any that
//! point elsewhere.

use serde_json::{Map, Value};
use service_core::error::AppError;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::config::RoutePolicy;
use crate::models::Principal;

/// Key spellings a client may use to reference an organization, in check order.
pub const SCOPING_KEYS: [&str; 4] = ["organization_id", "organizationId", "organization.id", "orgId"];

const NESTED_KEY: &str = "organization.id";
const BRACKET_KEY: &str = "organization[id]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadLocation {
    Body,
    Params,
    Query,
}

impl PayloadLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadLocation::Body => "body",
            PayloadLocation::Params => "params",
            PayloadLocation::Query => "query",
        }
    }
}

impl fmt::Display for PayloadLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TenantError {
    #[error("Access denied: Cannot access resources from another organization ({location}.{key})")]
    Mismatch {
        location: PayloadLocation,
        key: &'static str,
    },

    #[error("Request payload was not captured")]
    PayloadMissing,

    #[error("Tenant context not found")]
    ContextMissing,
}

impl From<TenantError> for AppError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::Mismatch { .. } => AppError::Forbidden(anyhow::anyhow!(err.to_string())),
            TenantError::PayloadMissing => AppError::InternalError(anyhow::anyhow!(err)),
            TenantError::ContextMissing => AppError::AuthError(anyhow::anyhow!(err.to_string())),
        }
    }
}

/// Request inputs as the client sent them, captured once before any handler runs.
#[derive(Debug, Clone, Default)]
pub struct RequestPayload {
    /// Parsed JSON body; `None` when the body is empty or not JSON.
    pub body: Option<Value>,
    pub path_params: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

impl RequestPayload {
    pub fn path_param(&self, name: &str) -> Option<&str> {
        lookup(&self.path_params, name)
    }
}

/// Per-request tenant scope handed to handlers.
#[derive(Debug, Clone)]
pub struct TenantScopedRequest {
    pub organization_id: Uuid,
    pub principal: Principal,
    /// `"<METHOD> <pattern>"` of the matched route.
    pub route: String,
    pub policy: RoutePolicy,
}

/// Derive the tenant scope from the verified principal. Nothing client-supplied is read.
pub fn resolve_tenant_context(
    principal: &Principal,
    route: String,
    policy: RoutePolicy,
) -> TenantScopedRequest {
    TenantScopedRequest {
        organization_id: principal.organization_id,
        principal: principal.clone(),
        route,
        policy,
    }
}

/// Reject the request if body, path params or query (checked in that order) reference
/// an organization other than `organization_id`. Stops at the first mismatch.
pub fn check_tenant_access(
    organization_id: Uuid,
    payload: &RequestPayload,
) -> Result<(), TenantError> {
    if let Some(Value::Object(body)) = &payload.body {
        for key in SCOPING_KEYS {
            if let Some(value) = body_value(body, key) {
                if json_references_other(value, organization_id) {
                    return Err(TenantError::Mismatch {
                        location: PayloadLocation::Body,
                        key,
                    });
                }
            }
        }
    }

    for (location, pairs) in [
        (PayloadLocation::Params, &payload.path_params),
        (PayloadLocation::Query, &payload.query),
    ] {
        for key in SCOPING_KEYS {
            if let Some(value) = flat_value(pairs, key) {
                if str_references_other(value, organization_id) {
                    return Err(TenantError::Mismatch { location, key });
                }
            }
        }
    }

    Ok(())
}

fn body_value<'a>(body: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if key == NESTED_KEY {
        body.get("organization")
            .and_then(|org| org.as_object())
            .and_then(|org| org.get("id"))
    } else {
        body.get(key)
    }
}

fn flat_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    lookup(pairs, key).or_else(|| {
        if key == NESTED_KEY {
            lookup(pairs, BRACKET_KEY)
        } else {
            None
        }
    })
}

fn lookup<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

// `null` and "" count as absent. Anything that is not the caller's organization id,
// including non-UUID values, is a mismatch.
fn json_references_other(value: &Value, organization_id: Uuid) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => str_references_other(s, organization_id),
        _ => true,
    }
}

fn str_references_other(value: &str, organization_id: Uuid) -> bool {
    let value = value.trim();
    if value.is_empty() {
        return false;
    }
    Uuid::parse_str(value).map_or(true, |id| id != organization_id)
}
