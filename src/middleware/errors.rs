//! Error-translation stage.
//!
//! Every `AppError` leaves its handler or stage as a rendered response with the
//! error attached (`PendingError`). This stage is where that error is looked
//! at once more on the way out: 5xx-class errors are logged with full detail,
//! the final status is recorded in the Request Context and a shutdown-class
//! error starts the process shutdown.
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::error;

use crate::error::PendingError;
use crate::middleware::context::RequestCtx;
use crate::server::Shutdown;

pub async fn translate(State(shutdown): State<Shutdown>, req: Request, next: Next) -> Response {
    let ctx = req.extensions().get::<RequestCtx>().cloned();

    let mut res = next.run(req).await;

    if let Some(PendingError(err)) = res.extensions_mut().remove::<PendingError>() {
        let status = res.status();
        if status.is_server_error() {
            match ctx.as_ref() {
                Some(ctx) => error!(trace_id = %ctx.trace_id(), status = status.as_u16(), error = %err, "request failed"),
                None => error!(status = status.as_u16(), error = %err, "request failed"),
            }
        }

        if err.is_shutdown() {
            shutdown.trigger(err.to_string());
        }
    }

    if let Some(ctx) = ctx {
        ctx.set_status(res.status());
    }

    res
}
