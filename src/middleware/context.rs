//! Request Context: created by the trace stage, carried in request extensions.
use std::{
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use axum::http::StatusCode;

#[derive(Debug, Clone)]
pub struct RequestCtx {
    trace_id: Arc<str>,
    started: Instant,
    status: Arc<OnceLock<StatusCode>>,
}

impl RequestCtx {
    pub fn new(trace_id: impl Into<Arc<str>>) -> Self {
        Self {
            trace_id: trace_id.into(),
            started: Instant::now(),
            status: Arc::new(OnceLock::new()),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// What is left of `budget` for this request.
    pub fn remaining(&self, budget: Duration) -> Duration {
        budget.saturating_sub(self.elapsed())
    }

    /// Record the final status. The first write wins.
    pub fn set_status(&self, status: StatusCode) -> bool {
        self.status.set(status).is_ok()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status.get().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_written_once() {
        let ctx = RequestCtx::new("abc");
        let seen_by_logger = ctx.clone();

        assert!(ctx.set_status(StatusCode::CREATED));
        assert!(!ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(seen_by_logger.status(), Some(StatusCode::CREATED));
    }

    #[test]
    fn remaining_budget_never_underflows() {
        let ctx = RequestCtx::new("abc");
        assert_eq!(ctx.remaining(Duration::ZERO), Duration::ZERO);
        assert!(ctx.remaining(Duration::from_secs(60)) <= Duration::from_secs(60));
    }
}
