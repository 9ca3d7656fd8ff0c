/*
 * Responsibility
 * - Handler から見える「認証済みコンテキスト」の型
 * - authenticate middleware が検証して request extensions に格納し、handler はこの型だけを受け取る
 *
 * Notes
 * - token 検証と policy 評価は middleware/services 側の責務
 */
use std::sync::Arc;

use crate::services::auth::jwt::Claims;

/// 認証済みのリクエストに付与されるコンテキスト
///
/// - `claims` は署名・有効期限・authentication rule をすべて通過したもの
#[derive(Debug, Clone)]
pub struct AuthCtx {
    claims: Arc<Claims>,
}

impl AuthCtx {
    pub fn new(claims: Claims) -> Self {
        Self {
            claims: Arc::new(claims),
        }
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    pub fn roles(&self) -> &[String] {
        &self.claims.roles
    }
}
