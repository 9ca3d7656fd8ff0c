//! GET /test/auth: echoes the verified claims. Admin only.
use axum::Json;

use crate::{api::v1::extractors::AuthCtxExtractor, services::auth::jwt::Claims};

pub async fn test_auth(AuthCtxExtractor(ctx): AuthCtxExtractor) -> Json<Claims> {
    Json(ctx.claims().clone())
}
