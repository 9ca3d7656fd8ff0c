//! Authentication stage: bearer token → verified claims → `AuthCtx`.
//!
//! Signature and validity window are checked by the token verifier, then the
//! `auth` policy rule runs. Any failure ends the request here with an
//! `AuthError`; a broken rule set is a 500 instead.
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::api::v1::extractors::AuthCtx;
use crate::error::AppError;
use crate::middleware::{context::RequestCtx, pipeline::remaining_budget};
use crate::services::auth::{
    AuthenticateError,
    jwt::TokenError,
    policy::PolicyError,
};
use crate::state::AppState;

pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let budget = remaining_budget(state.request_timeout, req.extensions().get::<RequestCtx>());
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let claims = match state.auth.authenticate(authorization, budget).await {
        Ok(claims) => claims,
        Err(AuthenticateError::Policy(err @ PolicyError::EvaluationFailed(_))) => {
            return Err(AppError::Policy(err));
        }
        Err(err @ AuthenticateError::Token(TokenError::UnsupportedAlgorithm(_))) => {
            warn!(error = %err, suspicious = true, "token with a rejected signing algorithm");
            return Err(AppError::auth(err));
        }
        Err(err) => {
            warn!(error = %err, "authentication failed");
            return Err(AppError::auth(err));
        }
    };

    // middleware → extractor への受け渡し
    req.extensions_mut().insert(AuthCtx::new(claims));

    Ok(next.run(req).await)
}
