//! Per-route policy table.
//!
//! Every route mounted behind the security pipeline is identified by
//! `"<METHOD> <pattern>"`, e.g. `"POST /courses/:id/cancel"`. The table is built once at
//! startup and shared read-only; routes without an entry get [`RoutePolicy::default`].

use axum::http::Method;
use std::collections::HashMap;

use crate::models::AuditAction;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutePolicy {
    /// Skip the payload tenant check.
    pub tenant_check_exempt: bool,
    /// Never write an audit entry for this route.
    pub audit_exempt: bool,
    pub action_override: Option<AuditAction>,
    pub entity_type_override: Option<String>,
}

static DEFAULT_POLICY: RoutePolicy = RoutePolicy {
    tenant_check_exempt: false,
    audit_exempt: false,
    action_override: None,
    entity_type_override: None,
};

impl RoutePolicy {
    pub fn tenant_check_exempt(mut self) -> Self {
        self.tenant_check_exempt = true;
        self
    }

    pub fn audit_exempt(mut self) -> Self {
        self.audit_exempt = true;
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action_override = Some(action);
        self
    }

    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type_override = Some(entity_type.into());
        self
    }
}

/// HEAD is answered by the GET handler, so it shares the GET route's policy.
pub fn route_key(method: &Method, pattern: &str) -> String {
    let method = if method == Method::HEAD { &Method::GET } else { method };
    format!("{} {}", method, pattern)
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    policies: HashMap<String, RoutePolicy>,
}

impl RouteTable {
    /// Builder seeded with the policies of the routes this crate mounts itself.
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
            .route(
                Method::POST,
                "/logout",
                RoutePolicy::default()
                    .action(AuditAction::Logout)
                    .entity_type("User"),
            )
            .route(Method::GET, "/me", RoutePolicy::default().audit_exempt())
            .route(Method::GET, "/audit-logs", read_only())
            .route(Method::GET, "/audit-logs/recent", read_only())
            .route(Method::GET, "/audit-logs/failed-logins", read_only())
            .route(Method::GET, "/audit-logs/stats", read_only())
            .route(
                Method::GET,
                "/audit-logs/entity/:entity_type/:entity_id",
                read_only(),
            )
            .route(Method::GET, "/audit-logs/user/:user_id", read_only())
            .route(Method::GET, "/audit-logs/:id", read_only())
            .route(
                Method::GET,
                "/audit-logs/export",
                RoutePolicy::default()
                    .action(AuditAction::Other)
                    .entity_type("AuditLog"),
            )
            .route(
                Method::POST,
                "/audit-logs/purge",
                RoutePolicy::default()
                    .action(AuditAction::Delete)
                    .entity_type("AuditLog"),
            )
    }

    pub fn policy(&self, route: &str) -> &RoutePolicy {
        self.policies.get(route).unwrap_or(&DEFAULT_POLICY)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

fn read_only() -> RoutePolicy {
    RoutePolicy::default().audit_exempt()
}

#[derive(Debug, Default)]
pub struct RouteTableBuilder {
    policies: HashMap<String, RoutePolicy>,
}

impl RouteTableBuilder {
    /// Declare the policy for one route. A later declaration for the same route replaces
    /// the earlier one.
    pub fn route(mut self, method: Method, pattern: &str, policy: RoutePolicy) -> Self {
        self.policies.insert(route_key(&method, pattern), policy);
        self
    }

    pub fn build(self) -> RouteTable {
        tracing::debug!(routes = self.policies.len(), "Route table built");
        RouteTable {
            policies: self.policies,
        }
    }
}
