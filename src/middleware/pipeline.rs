//! Request pipeline: the ordered list of cross-cutting stages every route runs
//! through. Outermost first:
//!
//! 1. request id: `x-request-id` generated when missing, echoed on the response
//! 2. trace/log: `request` span, start/completion lines (sees the final status)
//! 3. error translation: logs 5xx, records status, acts on shutdown errors
//! 4. metrics: request / error / panic counters (sees 408 and 503 too)
//! 5. drain: cancels in-flight requests on forced shutdown
//! 6. timeout: whole-request budget, reported as 408
//! 7. panic recovery: panic -> `InternalFault`
//!
//! Authentication and authorization are route-specific and sit inside all of
//! these (see `middleware::auth::protect`).
use std::time::Duration;

use axum::{
    Router,
    error_handling::HandleErrorLayer,
    extract::DefaultBodyLimit,
    http::{HeaderName, StatusCode},
    middleware,
};
use tower::{BoxError, ServiceBuilder, timeout::TimeoutLayer};
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
};

use crate::error::AppError;
use crate::middleware::{context::RequestCtx, drain, errors, metrics, panics, trace};
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request body limit: 1 MiB.
pub const BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Apply the pipeline to a fully routed `Router`.
pub fn apply(router: Router, state: &AppState) -> Router {
    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);

    let layers = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(
            request_id_header.clone(),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header))
        .layer(middleware::from_fn(trace::trace))
        .layer(middleware::from_fn_with_state(
            state.shutdown.clone(),
            errors::translate,
        ))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            metrics::track,
        ))
        .layer(middleware::from_fn_with_state(
            state.shutdown.clone(),
            drain::drain,
        ))
        // Make the service error `Infallible` by turning it into an AppError.
        .layer(HandleErrorLayer::new(timeout_error))
        .layer(TimeoutLayer::new(state.request_timeout))
        .layer(CatchPanicLayer::custom(panics::recover));

    router
        .layer(layers)
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
}

async fn timeout_error(err: BoxError) -> AppError {
    if err.is::<tower::timeout::error::Elapsed>() {
        AppError::request(StatusCode::REQUEST_TIMEOUT, "request timed out")
    } else {
        AppError::InternalFault(err.to_string())
    }
}

/// Budget a stage may still spend on this request.
pub fn remaining_budget(total: Duration, ctx: Option<&RequestCtx>) -> Duration {
    ctx.map(|c| c.remaining(total)).unwrap_or(total)
}
