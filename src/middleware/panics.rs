//! Panic-recovery stage: the only place a panic becomes an error.
use std::any::Any;

use axum::response::{IntoResponse, Response};

use crate::error::AppError;

/// `CatchPanicLayer::custom` handler. The panic location and backtrace were
/// already logged by the process panic hook; the payload travels on in the
/// error.
pub fn recover(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "panic with a non-string payload".to_string()
    };

    AppError::InternalFault(message).into_response()
}
