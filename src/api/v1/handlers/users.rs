/*
 * Responsibility
 * - /users 系 handler (create / get / update)
 * - Path/Json を extractor で受け、DTO validation → service 呼び出し
 * - 認可は route 側 (ruleAdminOnly / ruleAdminOrSubject) で済んでいる前提
 * - roles / enabled の変更だけは ADMIN に限る (本人でも不可)
 */
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    api::v1::{
        dto::users::{CreateUserRequest, UpdateUserRequest, UserResponse},
        extractors::{AuthCtxExtractor, ValidatedJson},
    },
    error::AppError,
    services::user::Role,
    state::AppState,
};

pub async fn create_user(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = state.users.create(req.into()).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    let user_id = parse_user_id(&user_id)?;
    let user = state.users.query_by_id(user_id).await?;
    Ok(Json(user.into()))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    AuthCtxExtractor(ctx): AuthCtxExtractor,
    ValidatedJson(req): ValidatedJson<UpdateUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user_id = parse_user_id(&user_id)?;
    // ruleAdminOrSubject lets a user edit their own profile, not their access.
    if req.changes_access() && !ctx.claims().has_role(Role::Admin.as_str()) {
        return Err(AppError::auth(format!(
            "subject {} may not change roles or enabled",
            ctx.subject()
        )));
    }
    let user = state.users.update(user_id, req.into()).await?;
    Ok(Json(user.into()))
}

fn parse_user_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw)
        .map_err(|_| AppError::request(StatusCode::BAD_REQUEST, format!("invalid user id: {raw}")))
}
