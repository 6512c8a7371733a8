mod common;

use axum::http::{Method, StatusCode};
use club_service::{
    models::AuditAction,
    services::AuditLogStore,
    utils::REDACTION_MARKER,
};
use common::{
    aged_entry, body_json, json_request, TestApp, ADMIN_A, ADMIN_B, COACH_A, MAX_BODY_BYTES,
    MEMBER_A, ROSTER_BYTES,
};
use serde_json::json;

#[tokio::test]
async fn successful_mutation_records_one_entry() {
    let app = TestApp::spawn().await;
    let token = app.access_token(COACH_A).await;

    let res = app
        .send(json_request(
            Method::POST,
            "/courses",
            Some(&token),
            Some(json!({ "name": "U14 Defenders" })),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let course_id = body_json(res).await["id"].as_str().unwrap().to_string();

    let entries = app.request_entries();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert!(entry.success);
    assert_eq!(entry.organization_id, app.org_a);
    assert_eq!(entry.user_email, COACH_A);
    assert_eq!(entry.action, AuditAction::Create);
    assert_eq!(entry.entity_type, "Course");
    assert_eq!(entry.entity_id.as_deref(), Some(course_id.as_str()));
    assert_eq!(entry.description, format!("{} created Course", COACH_A));
    assert_eq!(entry.new_values, Some(json!({ "name": "U14 Defenders" })));
    assert_eq!(entry.metadata["route"], "POST /courses");
}

#[tokio::test]
async fn failed_call_records_failure_entry() {
    let app = TestApp::spawn().await;
    let token = app.access_token(COACH_A).await;

    let res = app
        .send(json_request(Method::DELETE, "/courses/c-42", Some(&token), None))
        .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let entries = app.request_entries();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert!(!entry.success);
    assert_eq!(entry.action, AuditAction::Delete);
    assert_eq!(entry.entity_id.as_deref(), Some("c-42"));
    assert_eq!(entry.error_message.as_deref(), Some("Course not found"));
    assert!(entry.description.starts_with("Failed: "));
}

#[tokio::test]
async fn sensitive_fields_are_redacted_in_the_trail_only() {
    let app = TestApp::spawn().await;
    let token = app.access_token(COACH_A).await;

    let res = app
        .send(json_request(
            Method::POST,
            "/courses",
            Some(&token),
            Some(json!({ "name": "U16", "password": "hunter2" })),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(body_json(res).await["received"]["password"], "hunter2");

    let entries = app.request_entries();
    let stored = entries[0].new_values.as_ref().unwrap();
    assert_eq!(stored["password"], REDACTION_MARKER);
    assert_eq!(stored["name"], "U16");
}

#[tokio::test]
async fn tenant_mismatch_records_one_failure() {
    let app = TestApp::spawn().await;
    let token = app.access_token(COACH_A).await;

    let res = app
        .send(json_request(
            Method::POST,
            "/courses",
            Some(&token),
            Some(json!({ "organization_id": app.org_b.to_string() })),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let entries = app.request_entries();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].success);
    assert_eq!(entries[0].organization_id, app.org_a);
    assert!(entries[0]
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("(body.organization_id)"));
}

#[tokio::test]
async fn exempt_routes_record_nothing() {
    let app = TestApp::spawn().await;
    let token = app.access_token(ADMIN_A).await;

    for uri in ["/me", "/courses", "/audit-logs", "/audit-logs/stats", "/audit-logs/recent"] {
        for method in [Method::GET, Method::HEAD] {
            let res = app
                .send(json_request(method.clone(), uri, Some(&token), None))
                .await;
            assert_eq!(res.status(), StatusCode::OK, "{} {}", method, uri);
        }
    }
    assert!(app.request_entries().is_empty());
}

#[tokio::test]
async fn route_overrides_set_action_and_entity() {
    let app = TestApp::spawn().await;
    let token = app.access_token(COACH_A).await;

    let res = app
        .send(json_request(Method::POST, "/courses/c-7/renew", Some(&token), None))
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let entries = app.request_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::Renew);
    assert_eq!(entries[0].entity_type, "Subscription");
    assert_eq!(entries[0].entity_id.as_deref(), Some("c-7"));
}

#[tokio::test]
async fn audit_persist_failure_does_not_fail_the_request() {
    let app = TestApp::spawn().await;
    let token = app.access_token(COACH_A).await;
    app.store.set_fail_audit_writes(true);

    let res = app
        .send(json_request(
            Method::POST,
            "/courses",
            Some(&token),
            Some(json!({ "name": "U8" })),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    assert!(app.request_entries().is_empty());
}

#[tokio::test]
async fn reads_are_scoped_and_role_gated() {
    let app = TestApp::spawn().await;
    let coach = app.access_token(COACH_A).await;
    let member = app.access_token(MEMBER_A).await;
    let admin_b = app.access_token(ADMIN_B).await;

    app.send(json_request(
        Method::POST,
        "/courses",
        Some(&coach),
        Some(json!({ "name": "U10" })),
    ))
    .await;

    let res = app
        .send(json_request(Method::GET, "/audit-logs?entity_type=Course", Some(&coach), None))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let page = body_json(res).await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["limit"], 50);
    let entry_id = page["data"][0]["id"].as_str().unwrap().to_string();

    let res = app
        .send(json_request(Method::GET, "/audit-logs", Some(&member), None))
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = app
        .send(json_request(Method::GET, "/audit-logs/stats", Some(&coach), None))
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = app
        .send(json_request(Method::GET, "/audit-logs?entity_type=Course", Some(&admin_b), None))
        .await;
    assert_eq!(body_json(res).await["total"], 0);

    let res = app
        .send(json_request(
            Method::GET,
            &format!("/audit-logs/{}", entry_id),
            Some(&admin_b),
            None,
        ))
        .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = app
        .send(json_request(
            Method::GET,
            &format!("/audit-logs/{}", entry_id),
            Some(&coach),
            None,
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn stats_and_failed_logins_for_admins() {
    let app = TestApp::spawn().await;
    let admin = app.access_token(ADMIN_A).await;

    app.send(json_request(
        Method::POST,
        "/login",
        None,
        Some(json!({ "email": COACH_A, "password": "wrong-password" })),
    ))
    .await;
    app.wait_for_action(AuditAction::FailedLogin, 1).await;

    let res = app
        .send(json_request(Method::GET, "/audit-logs/failed-logins", Some(&admin), None))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let failed = body_json(res).await;
    assert_eq!(failed.as_array().map(Vec::len), Some(1));
    assert_eq!(failed[0]["user_email"], COACH_A);

    let res = app
        .send(json_request(Method::GET, "/audit-logs/stats?days=7", Some(&admin), None))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let stats = body_json(res).await;
    assert_eq!(stats["period_days"], 7);
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["failed"], 1);
    assert_eq!(stats["by_action"]["LOGIN"], 1);
    assert_eq!(stats["by_action"]["FAILED_LOGIN"], 1);
}

#[tokio::test]
async fn export_is_chronological_and_audited() {
    let app = TestApp::spawn().await;
    let admin = app.access_token(ADMIN_A).await;
    for name in ["first", "second"] {
        app.send(json_request(
            Method::POST,
            "/courses",
            Some(&admin),
            Some(json!({ "name": name })),
        ))
        .await;
    }

    let res = app
        .send(json_request(Method::GET, "/audit-logs/export?entity_type=Course", Some(&admin), None))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let exported = body_json(res).await;
    assert_eq!(exported[0]["new_values"]["name"], "first");
    assert_eq!(exported[1]["new_values"]["name"], "second");

    let export_entries: Vec<_> = app
        .request_entries()
        .into_iter()
        .filter(|e| e.entity_type == "AuditLog")
        .collect();
    assert_eq!(export_entries.len(), 1);
    assert_eq!(export_entries[0].action, AuditAction::Other);

    let coach = app.access_token(COACH_A).await;
    let res = app
        .send(json_request(Method::GET, "/audit-logs/export", Some(&coach), None))
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn purge_deletes_only_old_entries_of_own_organization() {
    let app = TestApp::spawn().await;
    let admin = app.access_token(ADMIN_A).await;

    app.store.append_audit_entry(&aged_entry(app.org_a, 400)).await.unwrap();
    app.store.append_audit_entry(&aged_entry(app.org_a, 10)).await.unwrap();
    app.store.append_audit_entry(&aged_entry(app.org_b, 400)).await.unwrap();

    let res = app
        .send(json_request(
            Method::POST,
            "/audit-logs/purge",
            Some(&admin),
            Some(json!({ "retention_days": 365 })),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["deleted"], 1);
    assert_eq!(body["retention_days"], 365);
    assert!(body["cutoff_date"].is_string());

    let remaining = app.store.audit_entries();
    assert!(remaining
        .iter()
        .any(|e| e.organization_id == app.org_b && e.user_email == "archived@club.test"));
    assert_eq!(
        remaining
            .iter()
            .filter(|e| e.organization_id == app.org_a && e.user_email == "archived@club.test")
            .count(),
        1
    );

    let res = app
        .send(json_request(
            Method::POST,
            "/audit-logs/purge",
            Some(&admin),
            Some(json!({ "retention_days": 0 })),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn out_of_range_windows_are_bad_requests() {
    let app = TestApp::spawn().await;
    let coach = app.access_token(COACH_A).await;
    let admin = app.access_token(ADMIN_A).await;
    let huge = i64::MAX;

    let res = app
        .send(json_request(
            Method::GET,
            &format!("/audit-logs/recent?hours={}", huge),
            Some(&coach),
            None,
        ))
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    for uri in [
        format!("/audit-logs/failed-logins?hours={}", huge),
        format!("/audit-logs/stats?days={}", huge),
    ] {
        let res = app.send(json_request(Method::GET, &uri, Some(&admin), None)).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{}", uri);
    }

    // The service keeps answering afterwards.
    let res = app
        .send(json_request(Method::GET, "/audit-logs/recent?hours=24", Some(&coach), None))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn purge_rejects_retention_beyond_the_calendar() {
    let app = TestApp::spawn().await;
    let admin = app.access_token(ADMIN_A).await;
    app.store.append_audit_entry(&aged_entry(app.org_a, 400)).await.unwrap();

    let res = app
        .send(json_request(
            Method::POST,
            "/audit-logs/purge",
            Some(&admin),
            Some(json!({ "retention_days": 1_000_000_000_i64 })),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    assert!(app
        .store
        .audit_entries()
        .iter()
        .any(|e| e.user_email == "archived@club.test"));
    let purge_entries: Vec<_> = app
        .request_entries()
        .into_iter()
        .filter(|e| e.entity_type == "AuditLog")
        .collect();
    assert_eq!(purge_entries.len(), 1);
    assert!(!purge_entries[0].success);
}

#[tokio::test]
async fn oversized_request_body_is_audited_as_failure() {
    let app = TestApp::spawn().await;
    let token = app.access_token(COACH_A).await;

    let res = app
        .send(json_request(
            Method::POST,
            "/courses",
            Some(&token),
            Some(json!({ "notes": "x".repeat(MAX_BODY_BYTES + 1) })),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.course_calls.count(), 0);

    let entries = app.request_entries();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].success);
    assert_eq!(entries[0].action, AuditAction::Create);
    assert!(entries[0]
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("exceeds"));
    assert!(entries[0].new_values.is_none());
}

#[tokio::test]
async fn large_responses_pass_through_and_are_audited_by_status() {
    let app = TestApp::spawn().await;
    let token = app.access_token(COACH_A).await;

    let res = app
        .send(json_request(Method::POST, "/courses/roster", Some(&token), None))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["roster"].as_str().map(str::len), Some(ROSTER_BYTES));

    let entries = app.request_entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].success);
    assert!(entries[0].new_values.is_none());
    assert_eq!(entries[0].entity_type, "Course");
}
