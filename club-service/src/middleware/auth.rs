use metrics::counter;
use service_core::{
    axum::{
        async_trait,
        extract::{FromRequestParts, Request, State},
        http::{header, request::Parts, Extensions, HeaderMap, Method, Uri},
        middleware::Next,
        response::Response,
    },
    error::AppError,
    middleware::{rate_limit::client_ip, tracing::RequestId},
};

use crate::{models::Principal, services::RequestMetadata, AppState};

/// Require a valid bearer access token and expose the caller as a [`Principal`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty());

    let Some(token) = token else {
        counter!("auth_failures_total", "reason" => "missing_token").increment(1);
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Missing or invalid Authorization header"
        )));
    };

    let claims = state.jwt.validate_access_token(token).map_err(|e| {
        tracing::debug!(error = %e, "Access token rejected");
        counter!("auth_failures_total", "reason" => "invalid_access_token").increment(1);
        AppError::Unauthorized(anyhow::anyhow!("Invalid or expired token"))
    })?;

    req.extensions_mut().insert(claims.principal());

    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Authentication required")))
    }
}

/// Transport details of the current request as the audit trail records them.
pub fn request_metadata(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    extensions: &Extensions,
) -> RequestMetadata {
    let request_id = extensions
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .or_else(|| {
            headers
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });

    RequestMetadata {
        http_method: Some(method.to_string()),
        request_url: Some(uri.to_string()),
        ip_address: client_ip(headers, extensions).map(|ip| ip.to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        request_id,
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestMetadata
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(request_metadata(
            &parts.method,
            &parts.uri,
            &parts.headers,
            &parts.extensions,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::axum::http::HeaderValue;

    #[test]
    fn metadata_prefers_forwarded_ip_and_request_id_extension() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("club-app/2.1"));
        headers.insert("x-request-id", HeaderValue::from_static("from-header"));
        let mut extensions = Extensions::new();
        extensions.insert(RequestId("from-extension".to_string()));

        let uri: Uri = "/courses?page=2".parse().unwrap();
        let meta = request_metadata(&Method::POST, &uri, &headers, &extensions);

        assert_eq!(meta.http_method.as_deref(), Some("POST"));
        assert_eq!(meta.request_url.as_deref(), Some("/courses?page=2"));
        assert_eq!(meta.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(meta.user_agent.as_deref(), Some("club-app/2.1"));
        assert_eq!(meta.request_id.as_deref(), Some("from-extension"));
    }

    #[test]
    fn metadata_without_headers_is_sparse() {
        let uri: Uri = "/me".parse().unwrap();
        let meta = request_metadata(&Method::GET, &uri, &HeaderMap::new(), &Extensions::new());
        assert!(meta.ip_address.is_none());
        assert!(meta.user_agent.is_none());
        assert!(meta.request_id.is_none());
    }
}
