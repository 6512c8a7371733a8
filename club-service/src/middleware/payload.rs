//! Captures the request body, path params and query once so the tenant guard and the
//! audit recorder read the same values the client sent. The capture rides on the request
//! for handlers and on the response for the audit layer, which runs outside this one.

use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde_json::Value;
use service_core::{
    axum::{
        body::Body,
        extract::{FromRequestParts, RawPathParams, Request, State},
        middleware::Next,
        response::Response,
    },
    error::AppError,
};
use std::sync::Arc;

use crate::{services::RequestPayload, AppState};

pub async fn capture_payload_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let limit = state.config.security.max_request_body_bytes;
    let (mut parts, body) = request.into_parts();

    let bytes = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return Err(AppError::PayloadTooLarge(format!(
                "Request body exceeds {} bytes",
                limit
            )));
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read request body");
            return Err(AppError::BadRequest(anyhow::anyhow!("Unreadable request body")));
        }
    };

    let query = match parts.uri.query() {
        Some(q) => serde_urlencoded::from_str::<Vec<(String, String)>>(q)
            .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Malformed query string")))?,
        None => Vec::new(),
    };

    let path_params = match RawPathParams::from_request_parts(&mut parts, &state).await {
        Ok(params) => params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        Err(_) => Vec::new(),
    };

    let payload = RequestPayload {
        body: parse_json_body(&bytes),
        path_params,
        query,
    };
    let payload = Arc::new(payload);
    parts.extensions.insert(payload.clone());

    let mut response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    response.extensions_mut().insert(payload);
    Ok(response)
}

/// Empty or non-JSON bodies carry no keys.
fn parse_json_body(bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    serde_json::from_slice(bytes).ok()
}
