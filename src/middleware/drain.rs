//! Forced-shutdown guard: once the grace period is over, requests still in
//! flight are dropped and answered with 503.
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::server::Shutdown;

pub async fn drain(State(shutdown): State<Shutdown>, req: Request, next: Next) -> Response {
    if shutdown.is_forced() {
        return unavailable();
    }

    tokio::select! {
        res = next.run(req) => res,
        _ = shutdown.forced() => unavailable(),
    }
}

fn unavailable() -> Response {
    AppError::request(StatusCode::SERVICE_UNAVAILABLE, "service is shutting down").into_response()
}
