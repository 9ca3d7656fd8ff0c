//! Request pipeline behaviour seen from the outside: error bodies, auth
//! stages, request ids, panics, timeouts and counters.
mod common;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::{Router, http::StatusCode, routing::get};
use sales_api::{
    error::AppError,
    middleware::pipeline,
    services::{
        auth::{
            jwt::SystemClock,
            policy::{Bindings, Policy, PolicyEngine, PolicyError, Query},
        },
        user::Role,
    },
};
use serde_json::{Value, json};

use common::{TestApp, get as get_req, send};

#[tokio::test]
async fn health_is_public() {
    let app = TestApp::new().await;
    let (status, _, body) = app.send(get_req("/api/v1/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn missing_bearer_is_unauthorized() {
    let app = TestApp::new().await;
    let (status, _, body) = app.send(get_req("/api/v1/test/auth", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Unauthorized" }));
}

#[tokio::test]
async fn garbage_bearer_is_unauthorized() {
    let app = TestApp::new().await;
    let (status, _, body) = app
        .send(get_req("/api/v1/test/auth", Some("not-a-jwt")))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Unauthorized" }));
}

#[tokio::test]
async fn admin_reaches_admin_only_route() {
    let app = TestApp::new().await;
    let token = app.token_for(&app.admin);

    let (status, _, body) = app
        .send(get_req("/api/v1/test/auth", Some(&token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sub"], app.admin.id.to_string());
    assert_eq!(body["iss"], common::ISSUER);
}

#[tokio::test]
async fn plain_user_is_denied_admin_only_route() {
    let app = TestApp::new().await;
    let token = app.token_for(&app.user);

    let (status, _, body) = app
        .send(get_req("/api/v1/test/auth", Some(&token)))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Unauthorized" }));
}

#[tokio::test]
async fn subject_reads_own_record_but_not_others() {
    let app = TestApp::new().await;
    let token = app.token_for(&app.user);

    let own = format!("/api/v1/users/{}", app.user.id);
    let (status, _, body) = app.send(get_req(&own, Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "user@example.com");
    assert!(body.get("credential").is_none());

    let other = format!("/api/v1/users/{}", app.admin.id);
    let (status, _, _) = app.send(get_req(&other, Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_reads_any_record() {
    let app = TestApp::new().await;
    let token = app.token_for(&app.admin);

    let uri = format!("/api/v1/users/{}", app.user.id);
    let (status, _, body) = app.send(get_req(&uri, Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], app.user.id.to_string());

    let missing = format!("/api/v1/users/{}", uuid::Uuid::new_v4());
    let (status, _, body) = app.send(get_req(&missing, Some(&token))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "user not found" }));

    let (status, _, body) = app
        .send(get_req("/api/v1/users/not-a-uuid", Some(&token)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "invalid user id: not-a-uuid" }));
}

#[tokio::test]
async fn create_user_validates_and_detects_duplicates() {
    let app = TestApp::new().await;
    let token = app.token_for(&app.admin);

    let bad = json!({
        "name": "",
        "email": "nope",
        "roles": ["USER"],
        "password": "gophers!",
        "password_confirm": "gophers!",
    });
    let (status, _, body) = app
        .send(common::json("POST", "/api/v1/users", &token, bad))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "data validation error");
    let fields: Vec<&str> = body["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["email", "name"]);

    let good = json!({
        "name": "New Gopher",
        "email": "new@example.com",
        "roles": ["USER"],
        "department": "sales",
        "password": "gophers!",
        "password_confirm": "gophers!",
    });
    let (status, _, body) = app
        .send(common::json("POST", "/api/v1/users", &token, good.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["roles"], json!(["USER"]));
    assert_eq!(body["enabled"], true);

    let (status, _, body) = app
        .send(common::json("POST", "/api/v1/users", &token, good))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body, json!({ "error": "email is not unique" }));
}

#[tokio::test]
async fn subject_updates_own_record() {
    let app = TestApp::new().await;
    let token = app.token_for(&app.user);

    let uri = format!("/api/v1/users/{}", app.user.id);
    let (status, _, body) = app
        .send(common::json("PUT", &uri, &token, json!({ "department": "ops" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["department"], "ops");
    assert_eq!(body["name"], "User Gopher");
}

#[tokio::test]
async fn password_change_without_matching_confirmation_is_rejected() {
    let app = TestApp::new().await;
    let token = app.token_for(&app.user);

    let uri = format!("/api/v1/users/{}", app.user.id);
    let body = json!({ "password": "new-secret", "password_confirm": "other-secret" });
    let (status, _, body) = app.send(common::json("PUT", &uri, &token, body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "data validation error");
    assert_eq!(body["fields"][0]["field"], "password_confirm");
    assert_eq!(body["fields"][0]["error"], "does not match password");
}

#[tokio::test]
async fn user_cannot_promote_themselves() {
    let app = TestApp::new().await;
    let token = app.token_for(&app.user);

    let uri = format!("/api/v1/users/{}", app.user.id);
    let (status, _, body) = app
        .send(common::json("PUT", &uri, &token, json!({ "roles": ["ADMIN"] })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Unauthorized" }));

    let (status, _, _) = app
        .send(common::json("PUT", &uri, &token, json!({ "enabled": false })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let stored = app.state.users.query_by_id(app.user.id).await.unwrap();
    assert_eq!(stored.roles, vec![Role::User]);
    assert!(stored.enabled);
}

#[tokio::test]
async fn admin_changes_roles() {
    let app = TestApp::new().await;
    let token = app.token_for(&app.admin);

    let uri = format!("/api/v1/users/{}", app.user.id);
    let (status, _, body) = app
        .send(common::json(
            "PUT",
            &uri,
            &token,
            json!({ "roles": ["ADMIN", "USER"] }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["roles"], json!(["ADMIN", "USER"]));
}

#[tokio::test]
async fn malformed_json_is_a_request_error() {
    let app = TestApp::new().await;
    let token = app.token_for(&app.admin);

    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/api/v1/users")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let (status, _, body) = app.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = TestApp::new().await;
    let (status, _, body) = app.send(get_req("/api/v2/nothing", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "route not found" }));
}

#[tokio::test]
async fn request_id_is_echoed_or_generated() {
    let app = TestApp::new().await;

    let req = axum::http::Request::builder()
        .uri("/api/v1/health")
        .header("x-request-id", "trace-1234")
        .body(axum::body::Body::empty())
        .unwrap();
    let (_, headers, _) = app.send(req).await;
    assert_eq!(headers["x-request-id"], "trace-1234");

    let (_, headers, _) = app.send(get_req("/api/v1/health", None)).await;
    let generated = headers["x-request-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(generated).is_ok());
}

async fn boom() -> &'static str {
    panic!("ledger index out of range")
}

#[tokio::test]
async fn panic_becomes_opaque_500_and_is_counted() {
    let app = TestApp::new().await;
    let router = pipeline::apply(
        Router::new().route("/boom", get(boom)),
        &app.state,
    );

    let (status, _, body) = send(&router, get_req("/boom", None)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Internal Server Error" }));

    let snapshot = app.state.metrics.snapshot();
    assert_eq!(snapshot.requests, 1);
    assert_eq!(snapshot.errors, 1);
    assert_eq!(snapshot.panics, 1);
    assert!(!app.state.shutdown.is_triggered());
}

#[tokio::test]
async fn every_request_is_counted_and_only_failures_as_errors() {
    let app = TestApp::new().await;
    app.send(get_req("/api/v1/health", None)).await;
    app.send(get_req("/api/v1/test/auth", None)).await;

    let snapshot = app.state.metrics.snapshot();
    assert_eq!(snapshot.requests, 2);
    assert_eq!(snapshot.errors, 1);
    assert_eq!(snapshot.panics, 0);
}

#[tokio::test]
async fn shutdown_error_starts_process_shutdown() {
    let app = TestApp::new().await;
    let router = pipeline::apply(
        Router::new().route(
            "/integrity",
            get(|| async { Err::<(), _>(AppError::shutdown("ledger checksum mismatch")) }),
        ),
        &app.state,
    );

    let (status, _, body) = send(&router, get_req("/integrity", None)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Internal Server Error" }));
    assert!(app.state.shutdown.is_triggered());
}

#[tokio::test]
async fn slow_handler_hits_the_request_timeout() {
    let app = TestApp::build(
        Policy::embedded().unwrap(),
        Arc::new(SystemClock),
        Duration::from_millis(50),
    )
    .await;
    let router = pipeline::apply(
        Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ),
        &app.state,
    );

    let (status, _, body) = send(&router, get_req("/slow", None)).await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(body, json!({ "error": "request timed out" }));
}

#[tokio::test]
async fn timed_out_request_is_still_counted() {
    let app = TestApp::build(
        Policy::embedded().unwrap(),
        Arc::new(SystemClock),
        Duration::from_millis(50),
    )
    .await;
    let router = pipeline::apply(
        Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ),
        &app.state,
    );

    let (status, _, _) = send(&router, get_req("/slow", None)).await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);

    let snapshot = app.state.metrics.snapshot();
    assert_eq!(snapshot.requests, 1);
    assert_eq!(snapshot.errors, 1);
    assert_eq!(snapshot.panics, 0);
}

/// Answers every query with a fixed result per rule and records what it saw.
#[derive(Default)]
struct Recording {
    answers: HashMap<String, Vec<Bindings>>,
    seen: Mutex<Vec<String>>,
}

impl Recording {
    fn answer(mut self, rule: &str, x: Option<bool>) -> Self {
        let rows = match x {
            Some(x) => vec![Bindings::from([("x".to_string(), Value::Bool(x))])],
            None => Vec::new(),
        };
        self.answers.insert(rule.to_string(), rows);
        self
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PolicyEngine for Recording {
    async fn evaluate(&self, query: &Query, _input: Value) -> Result<Vec<Bindings>, PolicyError> {
        self.seen.lock().unwrap().push(query.rule.clone());
        self.answers
            .get(&query.rule)
            .cloned()
            .ok_or_else(|| PolicyError::EvaluationFailed(format!("no answer for {query}")))
    }
}

#[tokio::test]
async fn authorization_never_runs_when_authentication_fails() {
    let engine = Arc::new(
        Recording::default()
            .answer("auth", None)
            .answer("ruleAdminOnly", Some(true)),
    );
    let app = TestApp::with_policy(Policy::new(engine.clone())).await;
    let token = app.token_for(&app.admin);

    let (status, _, _) = app
        .send(get_req("/api/v1/test/auth", Some(&token)))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(engine.seen(), vec!["auth".to_string()]);
}

#[tokio::test]
async fn authentication_then_authorization_in_order() {
    let engine = Arc::new(
        Recording::default()
            .answer("auth", Some(true))
            .answer("ruleAdminOnly", Some(true)),
    );
    let app = TestApp::with_policy(Policy::new(engine.clone())).await;
    let token = app.token_for(&app.user);

    let (status, _, _) = app
        .send(get_req("/api/v1/test/auth", Some(&token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        engine.seen(),
        vec!["auth".to_string(), "ruleAdminOnly".to_string()]
    );
}

#[tokio::test]
async fn broken_policy_is_a_500_not_a_401() {
    let engine = Arc::new(Recording::default().answer("auth", Some(true)));
    let app = TestApp::with_policy(Policy::new(engine)).await;
    let token = app.token_for(&app.admin);

    let (status, _, body) = app
        .send(get_req("/api/v1/test/auth", Some(&token)))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Internal Server Error" }));
}
