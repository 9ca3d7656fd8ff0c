/*
 * Responsibility
 * - GET /token/{kid}
 * - Basic 認証 (email:password) → user 認証 → {kid} の鍵で署名した token を返す
 * - kid が未登録なのは設定ミス扱い (500)。認証失敗は 401
 */
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
};
use base64::{Engine, engine::general_purpose::STANDARD};

use crate::{
    api::v1::dto::token::TokenResponse, error::AppError, services::user::role_names,
    state::AppState,
};

pub async fn token(
    State(state): State<AppState>,
    Path(kid): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, AppError> {
    let (email, password) = basic_credentials(&headers).ok_or_else(|| {
        AppError::request(
            StatusCode::UNAUTHORIZED,
            "must provide email and password in Basic auth",
        )
    })?;

    let user = state.users.authenticate(&email, &password).await?;

    let token = state
        .auth
        .generate_token(&kid, &user.id.to_string(), &role_names(&user.roles))
        .map_err(|e| AppError::from(e).context(format!("generating token with kid {kid}")))?;

    Ok(Json(TokenResponse { token }))
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (email, password) = decoded.split_once(':')?;
    Some((email.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn parses_basic_credentials() {
        let encoded = STANDARD.encode("admin@example.com:gophers:with:colons");
        let creds = basic_credentials(&with_auth(&format!("Basic {encoded}")));
        assert_eq!(
            creds,
            Some((
                "admin@example.com".to_string(),
                "gophers:with:colons".to_string()
            ))
        );
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        assert_eq!(basic_credentials(&HeaderMap::new()), None);
        assert_eq!(basic_credentials(&with_auth("Bearer abc")), None);
        assert_eq!(basic_credentials(&with_auth("Basic !!!")), None);
        let no_colon = STANDARD.encode("just-an-email");
        assert_eq!(basic_credentials(&with_auth(&format!("Basic {no_colon}"))), None);
    }
}
