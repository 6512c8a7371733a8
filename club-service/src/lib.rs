//! club-service: tenant isolation, audit trail and credential lifecycle for the club
//! platform.
//!
//! Business modules mount their routes through [`build_router`]; every route merged
//! there runs behind authentication, payload capture, audit recording and the tenant
//! guard, in that order.

pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use metrics_exporter_prometheus::PrometheusHandle;
use service_core::axum::{
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::{ClubConfig, RouteTable};
use crate::services::{
    AuditLogStore, AuditRecorder, CredentialIssuer, JwtService, RefreshTokenStore, UserStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: ClubConfig,
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn RefreshTokenStore>,
    pub audit_store: Arc<dyn AuditLogStore>,
    pub jwt: JwtService,
    pub issuer: CredentialIssuer,
    pub recorder: AuditRecorder,
    pub routes: Arc<RouteTable>,
    pub metrics: Option<PrometheusHandle>,
    pub login_rate_limiter: IpRateLimiter,
}

impl AppState {
    pub fn new(
        config: ClubConfig,
        users: Arc<dyn UserStore>,
        tokens: Arc<dyn RefreshTokenStore>,
        audit_store: Arc<dyn AuditLogStore>,
        routes: RouteTable,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, AppError> {
        let jwt = JwtService::new(&config.jwt);
        let recorder = AuditRecorder::new(audit_store.clone());
        let issuer = CredentialIssuer::new(
            users.clone(),
            tokens.clone(),
            jwt.clone(),
            recorder.clone(),
            config.jwt.refresh_token_expiry_days,
        );
        let login_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
        )?;

        Ok(Self {
            config,
            users,
            tokens,
            audit_store,
            jwt,
            issuer,
            recorder,
            routes: Arc::new(routes),
            metrics,
            login_rate_limiter,
        })
    }
}

/// Assemble the service router. `business_routes` are mounted next to the core's own
/// protected routes and share their middleware stack.
pub fn build_router(state: AppState, business_routes: Router<AppState>) -> Result<Router, AppError> {
    let login_route = Router::new()
        .route("/login", post(handlers::auth::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    // route_layer: the last one added runs first, giving auth, audit, payload, tenant.
    let protected_routes = Router::new()
        .route("/logout", post(handlers::auth::logout))
        .route("/me", get(handlers::auth::me))
        .route("/audit-logs", get(handlers::audit::list_audit_logs))
        .route("/audit-logs/recent", get(handlers::audit::recent_activity))
        .route("/audit-logs/failed-logins", get(handlers::audit::failed_logins))
        .route("/audit-logs/stats", get(handlers::audit::audit_stats))
        .route("/audit-logs/export", get(handlers::audit::export_audit_logs))
        .route("/audit-logs/purge", post(handlers::audit::purge_audit_logs))
        .route(
            "/audit-logs/entity/:entity_type/:entity_id",
            get(handlers::audit::entity_history),
        )
        .route("/audit-logs/user/:user_id", get(handlers::audit::user_activity))
        .route("/audit-logs/:id", get(handlers::audit::get_audit_log))
        .merge(business_routes)
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::tenant_guard_middleware,
        ))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::capture_payload_middleware,
        ))
        .route_layer(from_fn_with_state(state.clone(), middleware::audit_middleware))
        .route_layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    let origins = &state.config.security.allowed_origins;
    // Wildcard is only accepted outside prod; see ClubConfig::validate.
    let allowed_origins = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .map(|o| {
                    o.parse::<HeaderValue>().map_err(|e| {
                        AppError::ConfigError(anyhow::anyhow!("Invalid CORS origin '{}': {}", o, e))
                    })
                })
                .collect::<Result<Vec<HeaderValue>, AppError>>()?,
        )
    };

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/register", post(handlers::auth::register))
        .route("/refresh", post(handlers::auth::refresh))
        .merge(login_route)
        .merge(protected_routes)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    header::HeaderName::from_static(REQUEST_ID_HEADER),
                ]),
        );

    Ok(app)
}
