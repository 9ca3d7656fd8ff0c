//! Shared setup for the HTTP-level tests: fixture keys, an in-memory user
//! store with one admin and one plain user, and the full router.
#![allow(dead_code)]

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Request, StatusCode},
};
use sales_api::{
    app::build_router,
    repos::user_repo::MemoryUserRepo,
    services::{
        auth::{
            AuthService,
            jwt::{Clock, SystemClock, TokenService},
            keystore::KeyRing,
            policy::Policy,
        },
        user::{NewUser, Role, User, UserService, role_names},
    },
    state::AppState,
};
use serde_json::Value;
use tower::ServiceExt;

pub const ISSUER: &str = "service project";
pub const KID_A: &str = "54bb2165-71e1-41a6-af3e-7da4a0e1e2c1";
pub const KID_B: &str = "0f3c9a52-8d0e-4c1f-9b7a-6e2d4a1c5b90";
pub const PASSWORD: &str = "gophers!";

pub fn keys_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/keys")
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub admin: User,
    pub user: User,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_policy(Policy::embedded().unwrap()).await
    }

    pub async fn with_policy(policy: Policy) -> Self {
        Self::build(policy, Arc::new(SystemClock), Duration::from_secs(5)).await
    }

    pub async fn build(policy: Policy, clock: Arc<dyn Clock>, request_timeout: Duration) -> Self {
        let keys = Arc::new(KeyRing::from_dir(keys_dir()).unwrap());
        let auth = Arc::new(AuthService::new(
            TokenService::new(keys, clock, 60),
            policy,
            ISSUER,
            KID_A,
            Duration::from_secs(3600),
        ));
        let users = Arc::new(UserService::new(Arc::new(MemoryUserRepo::new()), 4));

        let admin = users
            .create(new_user("Admin Gopher", "admin@example.com", vec![Role::Admin, Role::User]))
            .await
            .unwrap();
        let user = users
            .create(new_user("User Gopher", "user@example.com", vec![Role::User]))
            .await
            .unwrap();

        let state = AppState::new(auth, users, request_timeout);
        let router = build_router(state.clone());

        Self {
            state,
            router,
            admin,
            user,
        }
    }

    pub fn token_for(&self, user: &User) -> String {
        self.state
            .auth
            .generate_active_token(&user.id.to_string(), &role_names(&user.roles))
            .unwrap()
    }

    pub async fn send(&self, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        send(&self.router, req).await
    }
}

pub fn new_user(name: &str, email: &str, roles: Vec<Role>) -> NewUser {
    NewUser {
        name: name.to_string(),
        email: email.to_string(),
        roles,
        department: None,
        password: PASSWORD.to_string(),
    }
}

pub fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn json(method: &str, uri: &str, bearer: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {bearer}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn send(router: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let res = router.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}
