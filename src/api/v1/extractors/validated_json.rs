//! JSON body + `validator` checks, with failures shaped as `AppError`.
use axum::{
    Json,
    extract::{FromRequest, Request},
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::AppError;

/// Like `Json<T>`, but runs `T::validate()` and reports both malformed
/// bodies and field failures through the error taxonomy.
#[derive(Debug)]
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::request(rejection.status(), rejection.body_text()))?;
        value.validate()?;
        Ok(Self(value))
    }
}
