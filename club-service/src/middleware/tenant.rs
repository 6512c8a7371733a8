use metrics::counter;
use service_core::{
    axum::{
        async_trait,
        extract::{FromRequestParts, MatchedPath, Request, State},
        http::request::Parts,
        middleware::Next,
        response::Response,
    },
    error::AppError,
};
use std::sync::Arc;

use crate::{
    config::route_key,
    models::Principal,
    services::{
        check_tenant_access, resolve_tenant_context, RequestPayload, TenantError,
        TenantScopedRequest,
    },
    AppState,
};

/// Resolve the caller's tenant scope and reject any request whose payload names another
/// organization. Runs after authentication and before the handler.
pub async fn tenant_guard_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(principal) = request.extensions().get::<Principal>().cloned() else {
        return Ok(next.run(request).await);
    };

    let pattern = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let route = route_key(request.method(), &pattern);
    let policy = state.routes.policy(&route).clone();
    let scope = resolve_tenant_context(&principal, route, policy);

    if !scope.policy.tenant_check_exempt {
        let payload = request
            .extensions()
            .get::<Arc<RequestPayload>>()
            .ok_or(TenantError::PayloadMissing)?;

        if let Err(err) = check_tenant_access(scope.organization_id, payload) {
            if let TenantError::Mismatch { location, key } = &err {
                counter!("tenant_mismatch_total", "location" => location.as_str()).increment(1);
                tracing::warn!(
                    user_id = %principal.id,
                    organization_id = %scope.organization_id,
                    route = %scope.route,
                    location = %location,
                    key = %key,
                    "Cross-tenant access attempt blocked"
                );
            }
            return Err(err.into());
        }
    }

    request.extensions_mut().insert(scope);
    Ok(next.run(request).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantScopedRequest
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantScopedRequest>()
            .cloned()
            .ok_or_else(|| TenantError::ContextMissing.into())
    }
}
