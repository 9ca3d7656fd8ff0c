//! Trace/log stage (outermost of the per-request stages).
//!
//! Takes the request id set by `SetRequestIdLayer` as the trace id, opens the
//! `request` span every later log line runs in, and logs start and completion.
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::middleware::{context::RequestCtx, pipeline::REQUEST_ID_HEADER};

pub async fn trace(mut req: Request, next: Next) -> Response {
    let trace_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let ctx = RequestCtx::new(trace_id.as_str());
    req.extensions_mut().insert(ctx.clone());

    let method = req.method().clone();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());

    let span = info_span!("request", trace_id = %trace_id);

    async move {
        info!(method = %method, path = %path, remote_addr = %remote_addr, "request started");

        let res = next.run(req).await;

        let status = ctx.status().unwrap_or(res.status());
        info!(
            method = %method,
            path = %path,
            remote_addr = %remote_addr,
            statuscode = status.as_u16(),
            since = ?ctx.elapsed(),
            "request completed"
        );
        res
    }
    .instrument(span)
    .await
}
