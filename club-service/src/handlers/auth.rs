use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::auth::{LoginRequest, LogoutResponse, RefreshRequest, RegisterRequest},
    models::{Principal, Role},
    services::{NewAccount, RequestMetadata},
    utils::{Password, ValidatedJson},
    AppState,
};

/// POST /login
pub async fn login(
    State(state): State<AppState>,
    request: RequestMetadata,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state
        .issuer
        .login(&req.email, &req.password, &request)
        .await?;
    Ok((StatusCode::OK, Json(res)))
}

/// POST /register
pub async fn register(
    State(state): State<AppState>,
    request: RequestMetadata,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let new_account = NewAccount {
        organization_id: req.organization_id,
        email: req.email,
        password: Password::new(req.password),
        first_name: req.first_name,
        last_name: req.last_name,
        role: Role::Member,
    };

    let res = state.issuer.register(new_account, &request).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

/// POST /refresh
pub async fn refresh(
    State(state): State<AppState>,
    request: RequestMetadata,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.issuer.refresh(&req.refresh_token, &request).await?;
    Ok((StatusCode::OK, Json(res)))
}

/// POST /logout
///
/// Revokes every refresh token of the caller. The presented access token stays valid
/// until it expires.
pub async fn logout(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<impl IntoResponse, AppError> {
    let revoked = state.issuer.logout(&principal).await?;
    Ok((
        StatusCode::OK,
        Json(LogoutResponse {
            message: "Logged out".to_string(),
            revoked,
        }),
    ))
}

/// GET /me
pub async fn me(principal: Principal) -> Json<Principal> {
    Json(principal)
}
