use serde_json::Value;
use service_core::axum::{
    body::{to_bytes, Body, HttpBody},
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::auth::request_metadata;
use crate::{
    config::route_key,
    models::Principal,
    services::{AuditCapture, AuditOutcome, RequestPayload},
    AppState,
};

/// Responses larger than this, or of unknown length, are streamed through and audited
/// from their status alone.
pub const MAX_CAPTURED_RESPONSE_BYTES: u64 = 256 * 1024;

/// Record one audit entry per authenticated, non-exempt request once the handler has
/// produced its response. Runs outside payload capture, so body rejections are audited
/// too. The response reaches the client unchanged.
pub async fn audit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(principal) = request.extensions().get::<Principal>().cloned() else {
        return next.run(request).await;
    };

    let pattern = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let route = route_key(request.method(), &pattern);
    let policy = state.routes.policy(&route).clone();
    if policy.audit_exempt {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let metadata = request_metadata(
        request.method(),
        request.uri(),
        request.headers(),
        request.extensions(),
    );

    let response = next.run(request).await;
    let (mut parts, body) = response.into_parts();
    // Absent when the body was rejected before it could be captured.
    let payload = parts
        .extensions
        .remove::<Arc<RequestPayload>>()
        .unwrap_or_default();
    let capture = AuditCapture {
        principal: &principal,
        route: &route,
        policy: &policy,
        method: &method,
        path: &path,
        path_params: &payload.path_params,
        request_body: payload.body.as_ref(),
        request: &metadata,
    };

    let capturable = body
        .size_hint()
        .exact()
        .is_some_and(|len| len <= MAX_CAPTURED_RESPONSE_BYTES);
    if !capturable {
        state
            .recorder
            .record(&capture, classify(parts.status, &[]))
            .await;
        return Response::from_parts(parts, body);
    }

    match to_bytes(body, MAX_CAPTURED_RESPONSE_BYTES as usize).await {
        Ok(bytes) => {
            state
                .recorder
                .record(&capture, classify(parts.status, &bytes))
                .await;
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(e) => {
            tracing::error!(error = %e, route = %route, "Failed to buffer response for audit");
            state
                .recorder
                .record(
                    &capture,
                    AuditOutcome::Failure {
                        message: "Response body could not be read".to_string(),
                    },
                )
                .await;
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::empty())
        }
    }
}

fn classify(status: StatusCode, body: &[u8]) -> AuditOutcome {
    let json = serde_json::from_slice::<Value>(body).ok();
    if status.as_u16() < 400 {
        return AuditOutcome::Success { response: json };
    }

    let message = json
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    AuditOutcome::Failure { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_keeps_json_response() {
        match classify(StatusCode::CREATED, br#"{"id":"c-1"}"#) {
            AuditOutcome::Success { response } => assert_eq!(response, Some(json!({"id": "c-1"}))),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn failure_message_prefers_error_field() {
        match classify(StatusCode::FORBIDDEN, br#"{"error":"Access denied"}"#) {
            AuditOutcome::Failure { message } => assert_eq!(message, "Access denied"),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn failure_without_json_uses_reason_phrase() {
        match classify(StatusCode::NOT_FOUND, b"nope") {
            AuditOutcome::Failure { message } => assert_eq!(message, "Not Found"),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn uncaptured_failure_falls_back_to_reason_phrase() {
        match classify(StatusCode::PAYLOAD_TOO_LARGE, &[]) {
            AuditOutcome::Failure { message } => assert_eq!(message, "Payload Too Large"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(matches!(
            classify(StatusCode::OK, &[]),
            AuditOutcome::Success { response: None }
        ));
    }
}
