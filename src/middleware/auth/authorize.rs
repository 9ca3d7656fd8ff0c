//! Authorization stage: runs one named rule against the verified claims.
//!
//! Requires the authentication stage to have run first. Without an `AuthCtx`
//! the request is refused and no rule is evaluated.
use axum::{
    extract::{Request, State, rejection::RawPathParamsRejection, RawPathParams},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::api::v1::extractors::AuthCtx;
use crate::error::AppError;
use crate::middleware::{context::RequestCtx, pipeline::remaining_budget};
use crate::services::auth::policy::{PolicyError, Rule};
use crate::state::AppState;

/// Path parameter holding the user being acted on.
pub const USER_ID_PARAM: &str = "user_id";

#[derive(Clone)]
pub struct AuthorizeState {
    pub app: AppState,
    pub rule: Rule,
}

pub async fn authorize(
    State(state): State<AuthorizeState>,
    params: Result<RawPathParams, RawPathParamsRejection>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(ctx) = req.extensions().get::<AuthCtx>().cloned() else {
        return Err(AppError::auth("authorization attempted without authentication"));
    };

    let user_id = params
        .ok()
        .and_then(|params| {
            params
                .iter()
                .find(|(name, _)| *name == USER_ID_PARAM)
                .map(|(_, value)| value.to_string())
        })
        .unwrap_or_default();

    let budget = remaining_budget(state.app.request_timeout, req.extensions().get::<RequestCtx>());

    match state
        .app
        .auth
        .authorize(ctx.claims(), state.rule, &user_id, budget)
        .await
    {
        Ok(()) => Ok(next.run(req).await),
        Err(PolicyError::Denied) => {
            warn!(rule = %state.rule, subject = %ctx.subject(), "authorization denied");
            Err(AppError::auth(format!("{} denied", state.rule)))
        }
        Err(err) => Err(AppError::Policy(err)),
    }
}
