/*
 * Responsibility
 * - アプリ共通の AppError 定義 (closed taxonomy)
 * - classify(): validation > request > auth > internal の固定優先度で分類
 * - IntoResponse は status + JSON body を作り、AppError 自体も response extension に載せる
 *   ログ出力と shutdown 判定は middleware::errors が一箇所で行う
 */
use std::{fmt, sync::Arc};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::repos::error::RepoError;
use crate::services::auth::{
    jwt::TokenError,
    password::HashingError,
    policy::PolicyError,
};
use crate::services::user::UserError;

pub const VALIDATION_MESSAGE: &str = "data validation error";
pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized";
pub const INTERNAL_MESSAGE: &str = "Internal Server Error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub error: String,
}

/// Per-field validation failures, sorted by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(pub Vec<FieldError>);

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for fe in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", fe.field, fe.error)?;
            first = false;
        }
        Ok(())
    }
}

impl From<validator::ValidationErrors> for FieldErrors {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<FieldError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                let field = field.to_string();
                errs.iter().map(move |e| FieldError {
                    field: field.clone(),
                    error: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string()),
                })
            })
            .collect();
        fields.sort_by(|a, b| a.field.cmp(&b.field).then_with(|| a.error.cmp(&b.error)));
        Self(fields)
    }
}

/// Wire shape of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldError>>,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("data validation error: {0}")]
    Validation(FieldErrors),

    /// Client-caused condition with an explicit status.
    #[error("{message}")]
    Request { status: StatusCode, message: String },

    /// Authentication or authorization denial. The reason is for logs only.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error(transparent)]
    Policy(PolicyError),

    #[error(transparent)]
    Hashing(#[from] HashingError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    /// A recovered panic.
    #[error("internal fault: {0}")]
    InternalFault(String),

    /// The process must stop accepting traffic.
    #[error("shutdown requested: {0}")]
    Shutdown(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<AppError>,
    },
}

/// Client-visible classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass<'a> {
    Validation(&'a FieldErrors),
    Request { status: StatusCode, message: &'a str },
    Auth,
    Internal,
}

impl AppError {
    pub fn request(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Request {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(resource: &str) -> Self {
        Self::request(StatusCode::NOT_FOUND, format!("{resource} not found"))
    }

    pub fn auth(reason: impl fmt::Display) -> Self {
        Self::Auth(reason.to_string())
    }

    pub fn shutdown(reason: impl Into<String>) -> Self {
        Self::Shutdown(reason.into())
    }

    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error under any `Context` wrappers.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn classify(&self) -> ErrorClass<'_> {
        match self.root() {
            AppError::Validation(fields) => ErrorClass::Validation(fields),
            AppError::Request { status, message } => ErrorClass::Request {
                status: *status,
                message,
            },
            AppError::Auth(_) | AppError::Policy(PolicyError::Denied) => ErrorClass::Auth,
            AppError::Policy(PolicyError::EvaluationFailed(_))
            | AppError::Hashing(_)
            | AppError::Token(_)
            | AppError::Repo(_)
            | AppError::InternalFault(_)
            | AppError::Shutdown(_) => ErrorClass::Internal,
            AppError::Context { .. } => ErrorClass::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.classify() {
            ErrorClass::Validation(_) => StatusCode::BAD_REQUEST,
            ErrorClass::Request { status, .. } => status,
            ErrorClass::Auth => StatusCode::UNAUTHORIZED,
            ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorResponse {
        match self.classify() {
            ErrorClass::Validation(fields) => ErrorResponse {
                error: VALIDATION_MESSAGE.to_string(),
                fields: Some(fields.0.clone()),
            },
            ErrorClass::Request { message, .. } => ErrorResponse {
                error: message.to_string(),
                fields: None,
            },
            ErrorClass::Auth => ErrorResponse {
                error: UNAUTHORIZED_MESSAGE.to_string(),
                fields: None,
            },
            ErrorClass::Internal => ErrorResponse {
                error: INTERNAL_MESSAGE.to_string(),
                fields: None,
            },
        }
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self.root(), AppError::Shutdown(_))
    }

    pub fn is_panic(&self) -> bool {
        matches!(self.root(), AppError::InternalFault(_))
    }

    /// Final response for this error.
    pub fn render(&self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

/// An error on its way out to the translation stage.
#[derive(Debug, Clone)]
pub struct PendingError(pub Arc<AppError>);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // The translation stage picks the error back up for logging.
        let mut res = self.render();
        res.extensions_mut().insert(PendingError(Arc::new(self)));
        res
    }
}

impl From<PolicyError> for AppError {
    fn from(e: PolicyError) -> Self {
        AppError::Policy(e)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.into())
    }
}

impl From<UserError> for AppError {
    fn from(e: UserError) -> Self {
        match e {
            UserError::NotFound => AppError::not_found("user"),
            UserError::DuplicateEmail => {
                AppError::request(StatusCode::CONFLICT, "email is not unique")
            }
            UserError::AuthenticationFailed => AppError::auth("authentication failed"),
            UserError::Hashing(e) => AppError::Hashing(e),
            UserError::Task(e) => AppError::InternalFault(e.to_string()),
            UserError::Repo(e) => AppError::Repo(e),
        }
    }
}
