use service_core::{
    axum::{
        extract::State,
        http::{header, StatusCode},
        response::{IntoResponse, Response},
    },
    error::AppError,
};

use crate::AppState;

pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => AppError::ServiceUnavailable.into_response(),
    }
}
