//! Shared setup for club-service integration tests: the full router over an in-memory
//! store, two seeded organizations and a stub business module.

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use club_service::{
    build_router,
    config::{
        ClubConfig, DatabaseConfig, Environment, JwtConfig, MaintenanceConfig, RateLimitConfig,
        RoutePolicy, RouteTable, SecurityConfig,
    },
    models::{AuditAction, AuditEntry, Role, UserAccount},
    services::{InMemoryStore, TenantScopedRequest, UserStore},
    utils::{hash_password, Password},
    AppState,
};
use serde_json::{json, Value};
use service_core::error::AppError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub const PASSWORD: &str = "correct-horse-battery";
pub const MAX_BODY_BYTES: usize = 16 * 1024;
/// Size of the roster export, above what the audit layer buffers.
pub const ROSTER_BYTES: usize = 300 * 1024;

pub const ADMIN_A: &str = "admin@alpha.club";
pub const COACH_A: &str = "coach@alpha.club";
pub const MEMBER_A: &str = "member@alpha.club";
pub const ADMIN_B: &str = "admin@bravo.club";

pub fn test_config() -> ClubConfig {
    ClubConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "club-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        jwt: JwtConfig {
            secret: "integration-test-secret-integration-test".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 30,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            max_request_body_bytes: MAX_BODY_BYTES,
        },
        rate_limit: RateLimitConfig {
            login_attempts: 5,
            login_window_seconds: 900,
        },
        maintenance: MaintenanceConfig {
            refresh_token_sweep_interval_seconds: 3600,
        },
    }
}

/// Counts how often the stub business handlers actually ran.
#[derive(Clone, Default)]
pub struct CourseCalls(Arc<AtomicUsize>);

impl CourseCalls {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn course_routes(calls: CourseCalls) -> Router<AppState> {
    let create = {
        let calls = calls.clone();
        move |scope: TenantScopedRequest, Json(body): Json<Value>| async move {
            calls.hit();
            (
                StatusCode::CREATED,
                Json(json!({
                    "id": Uuid::new_v4().to_string(),
                    "organization_id": scope.organization_id,
                    "received": body,
                })),
            )
        }
    };

    let list_for_org = {
        let calls = calls.clone();
        move |Path(organization_id): Path<String>| async move {
            calls.hit();
            Json(json!({ "organization_id": organization_id, "courses": [] }))
        }
    };

    let list = {
        let calls = calls.clone();
        move |_scope: TenantScopedRequest| async move {
            calls.hit();
            Json(json!({ "courses": [] }))
        }
    };

    let remove = {
        let calls = calls.clone();
        move |Path(_id): Path<String>| async move {
            calls.hit();
            AppError::NotFound(anyhow::anyhow!("Course not found")).into_response()
        }
    };

    let renew = {
        let calls = calls.clone();
        move |Path(id): Path<String>| async move {
            calls.hit();
            Json(json!({ "id": id, "renewed": true }))
        }
    };

    let roster = {
        let calls = calls.clone();
        move |_scope: TenantScopedRequest| async move {
            calls.hit();
            Json(json!({ "roster": "r".repeat(ROSTER_BYTES) }))
        }
    };

    let sync = move |State(_state): State<AppState>| async move {
        calls.hit();
        Json(json!({ "synced": true }))
    };

    Router::new()
        .route("/courses", post(create).get(list))
        .route("/courses/roster", post(roster))
        .route("/courses/:id", delete(remove))
        .route("/courses/:id/renew", post(renew))
        .route("/organizations/:organization_id/courses", get(list_for_org))
        .route("/federation/sync", post(sync))
}

fn route_table() -> RouteTable {
    RouteTable::builder()
        .route(
            Method::POST,
            "/courses/:id/renew",
            RoutePolicy::default()
                .action(AuditAction::Renew)
                .entity_type("Subscription"),
        )
        .route(
            Method::POST,
            "/federation/sync",
            RoutePolicy::default().tenant_check_exempt(),
        )
        .route(Method::GET, "/courses", RoutePolicy::default().audit_exempt())
        .build()
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub org_a: Uuid,
    pub org_b: Uuid,
    pub course_calls: CourseCalls,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();

        for (org, email, role) in [
            (org_a, ADMIN_A, Role::Admin),
            (org_a, COACH_A, Role::Coach),
            (org_a, MEMBER_A, Role::Member),
            (org_b, ADMIN_B, Role::Admin),
        ] {
            seed_user(&store, org, email, role).await;
        }

        let state = AppState::new(
            test_config(),
            store.clone(),
            store.clone(),
            store.clone(),
            route_table(),
            None,
        )
        .expect("state");

        let course_calls = CourseCalls::default();
        let router = build_router(state.clone(), course_routes(course_calls.clone()))
            .expect("router");

        Self {
            router,
            state,
            store,
            org_a,
            org_b,
            course_calls,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.expect("oneshot")
    }

    /// Log in through the HTTP surface and return the token response body.
    pub async fn login(&self, email: &str) -> Value {
        let res = self
            .send(json_request(
                Method::POST,
                "/login",
                None,
                Some(json!({ "email": email, "password": PASSWORD })),
            ))
            .await;
        assert_eq!(res.status(), StatusCode::OK, "login for {} failed", email);
        body_json(res).await
    }

    pub async fn access_token(&self, email: &str) -> String {
        self.login(email).await["access_token"]
            .as_str()
            .expect("access_token")
            .to_string()
    }

    /// Entries with `action`, polling until `expected` of them exist. Failed logins are
    /// persisted off the response path.
    pub async fn wait_for_action(&self, action: AuditAction, expected: usize) -> Vec<AuditEntry> {
        let matching = || -> Vec<AuditEntry> {
            self.store
                .audit_entries()
                .into_iter()
                .filter(|e| e.action == action)
                .collect()
        };
        for _ in 0..50 {
            let entries = matching();
            if entries.len() >= expected {
                return entries;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        matching()
    }

    /// Audit entries whose entity type is not `User`, i.e. everything except the
    /// issuer's own login events.
    pub fn request_entries(&self) -> Vec<AuditEntry> {
        self.store
            .audit_entries()
            .into_iter()
            .filter(|e| e.entity_type != "User")
            .collect()
    }
}

pub async fn seed_user(store: &InMemoryStore, organization_id: Uuid, email: &str, role: Role) -> UserAccount {
    let hash = hash_password(&Password::new(PASSWORD.to_string())).expect("hash");
    let account = UserAccount::new(
        organization_id,
        email.to_string(),
        hash.into_string(),
        "Test".to_string(),
        role.as_str().to_string(),
        role,
    );
    store.insert_user(&account).await.expect("seed user");
    account
}

pub fn json_request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).expect("request")
}

pub async fn body_json(res: Response) -> Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .expect("body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("json body")
}

/// An entry dated `days_ago` days back, for retention tests.
pub fn aged_entry(organization_id: Uuid, days_ago: i64) -> AuditEntry {
    AuditEntry {
        id: Uuid::new_v4(),
        organization_id,
        user_id: Uuid::new_v4(),
        user_email: "archived@club.test".to_string(),
        user_role: Role::Coach,
        action: AuditAction::Update,
        entity_type: "Course".to_string(),
        entity_id: None,
        old_values: None,
        new_values: None,
        http_method: Some("PUT".to_string()),
        request_url: Some("/courses".to_string()),
        ip_address: None,
        user_agent: None,
        success: true,
        error_message: None,
        description: "archived@club.test updated Course".to_string(),
        metadata: json!({}),
        created_at: Utc::now() - Duration::days(days_ago),
    }
}
