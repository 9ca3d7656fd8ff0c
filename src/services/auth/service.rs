use std::time::Duration;

use thiserror::Error;

use crate::services::auth::{
    jwt::{Claims, TokenError, TokenService},
    keystore::KeyRing,
    policy::{Policy, PolicyError, Rule},
};

#[derive(Debug, Error)]
pub enum AuthenticateError {
    #[error("expected authorization header format: Bearer <token>")]
    MissingBearer,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Token issuance plus the two policy-backed checks the pipeline runs.
#[derive(Debug)]
pub struct AuthService {
    tokens: TokenService,
    policy: Policy,
    issuer: String,
    active_kid: String,
    ttl: Duration,
}

impl AuthService {
    pub fn new(
        tokens: TokenService,
        policy: Policy,
        issuer: impl Into<String>,
        active_kid: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            tokens,
            policy,
            issuer: issuer.into(),
            active_kid: active_kid.into(),
            ttl,
        }
    }

    pub fn keys(&self) -> &KeyRing {
        self.tokens.keys()
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn active_kid(&self) -> &str {
        &self.active_kid
    }

    /// Sign a token for `subject` with the key `kid`.
    pub fn generate_token(
        &self,
        kid: &str,
        subject: &str,
        roles: &[String],
    ) -> Result<String, TokenError> {
        self.tokens
            .issue(subject, roles, &self.issuer, kid, self.ttl)
    }

    /// Same as `generate_token` with the configured active key.
    pub fn generate_active_token(
        &self,
        subject: &str,
        roles: &[String],
    ) -> Result<String, TokenError> {
        self.generate_token(&self.active_kid, subject, roles)
    }

    /// Verify an `Authorization` header value and run the authentication rule.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        budget: Duration,
    ) -> Result<Claims, AuthenticateError> {
        let token = bearer_token(authorization).ok_or(AuthenticateError::MissingBearer)?;

        // The policy sees the same key the signature was checked with, even if
        // the key ring is reloaded meanwhile.
        let (claims, pair) = self.tokens.verify_with_key(token)?;

        self.policy
            .evaluate_authentication(pair.public_key_pem(), token, &self.issuer, budget)
            .await?;

        Ok(claims)
    }

    /// Run `rule` for verified `claims` acting on `user_id` (empty when the
    /// route has no user in its path).
    pub async fn authorize(
        &self,
        claims: &Claims,
        rule: Rule,
        user_id: &str,
        budget: Duration,
    ) -> Result<(), PolicyError> {
        self.policy
            .evaluate_authorization(rule, &claims.roles, &claims.sub, user_id, budget)
            .await
    }
}

fn bearer_token(header: Option<&str>) -> Option<&str> {
    let (scheme, token) = header?.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty() && !token.contains(' ')).then_some(token)
}
