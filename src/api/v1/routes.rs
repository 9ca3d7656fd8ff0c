/*
 * Responsibility
 * - v1 の URL 構造を定義
 * - 認証・認可が必要な範囲は rule ごとに Router を分けて protect() を掛け、merge する
 */
use axum::{
    Router,
    routing::{get, post},
};

use crate::api::v1::handlers::{
    health::health,
    test_auth::test_auth,
    token::token,
    users::{create_user, get_user, update_user},
};
use crate::middleware::auth::protect;
use crate::services::auth::policy::Rule;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/health", get(health))
        .route("/token/{kid}", get(token));

    let admin_only = protect(
        Router::new()
            .route("/users", post(create_user))
            .route("/test/auth", get(test_auth)),
        state.clone(),
        Rule::AdminOnly,
    );

    let admin_or_subject = protect(
        Router::new().route("/users/{user_id}", get(get_user).put(update_user)),
        state,
        Rule::AdminOrSubject,
    );

    public.merge(admin_only).merge(admin_or_subject)
}
