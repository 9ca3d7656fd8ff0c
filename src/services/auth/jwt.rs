//! Signed identity tokens (RS-family JWT) with `kid`-based key selection.
//!
//! Issuance signs with the private half of the active key and writes its `kid`
//! into the header. Verification reads the header first, refuses anything that
//! is not an RSA signature, resolves the public key by `kid`, checks the
//! signature and finally the validity window against an injected `Clock`.
use std::{fmt, sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::services::auth::keystore::{KeyError, KeyPair, KeyRing};

/// Source of "now". Tests swap in a fixed clock to move through a token's lifetime.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Signature algorithms a verifier will accept.
///
/// Anything else (HS*, ES*, EdDSA, `none`) is refused before a key is even
/// looked up, so a public key can never be used as an HMAC secret.
pub fn accepted_algorithm(name: &str) -> Option<Algorithm> {
    match name {
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        "PS256" => Some(Algorithm::PS256),
        "PS384" => Some(Algorithm::PS384),
        "PS512" => Some(Algorithm::PS512),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("token header has no kid")]
    MissingKeyId,
    #[error("unknown key id: {0}")]
    UnknownKey(String),
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("token ttl must be positive")]
    InvalidTtl,
    #[error(transparent)]
    Key(KeyError),
    #[error("signing token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

impl From<KeyError> for TokenError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::UnknownKey(kid) => Self::UnknownKey(kid),
            other => Self::Key(other),
        }
    }
}

/// Token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Claims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// The part of the JOSE header needed before any key is chosen.
///
/// `alg` stays a raw string so names jsonwebtoken does not know (`none`) still
/// surface as `UnsupportedAlgorithm` instead of a parse failure.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(default)]
    pub kid: Option<String>,
}

impl TokenHeader {
    pub fn parse(token: &str) -> Result<Self, TokenError> {
        let mut parts = token.split('.');
        let (Some(header), Some(_), Some(_), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed("expected three segments".into()));
        };

        let raw = URL_SAFE_NO_PAD
            .decode(header)
            .map_err(|e| TokenError::Malformed(format!("header encoding: {e}")))?;
        serde_json::from_slice(&raw).map_err(|e| TokenError::Malformed(format!("header json: {e}")))
    }
}

pub struct TokenService {
    keys: Arc<KeyRing>,
    clock: Arc<dyn Clock>,
    leeway_seconds: i64,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("keys", &self.keys)
            .field("leeway_seconds", &self.leeway_seconds)
            .finish()
    }
}

impl TokenService {
    pub fn new(keys: Arc<KeyRing>, clock: Arc<dyn Clock>, leeway_seconds: u64) -> Self {
        Self {
            keys,
            clock,
            leeway_seconds: i64::try_from(leeway_seconds).unwrap_or(i64::MAX),
        }
    }

    pub fn keys(&self) -> &KeyRing {
        &self.keys
    }

    /// Sign a new token for `subject` with the key `kid`.
    pub fn issue(
        &self,
        subject: &str,
        roles: &[String],
        issuer: &str,
        kid: &str,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        if ttl.is_zero() {
            return Err(TokenError::InvalidTtl);
        }
        let key = self.keys.signing_key(kid)?;

        // Round sub-second ttls up so `exp` is strictly after `iat`.
        let ttl_seconds = ttl
            .as_secs()
            .checked_add(u64::from(ttl.subsec_nanos() > 0))
            .and_then(|secs| i64::try_from(secs).ok())
            .ok_or(TokenError::InvalidTtl)?;
        let iat = self.clock.now().timestamp();
        let exp = iat.checked_add(ttl_seconds).ok_or(TokenError::InvalidTtl)?;

        let claims = Claims {
            iss: issuer.to_string(),
            sub: subject.to_string(),
            iat,
            exp,
            roles: roles.to_vec(),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.typ = Some("JWT".to_string());
        header.kid = Some(kid.to_string());

        jsonwebtoken::encode(&header, &claims, &key).map_err(|e| {
            error!(error = %e, kid, "failed to sign JWT");
            TokenError::Signing(e)
        })
    }

    /// Verify signature and validity window, returning the claims.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_with_key(token).map(|(claims, _)| claims)
    }

    /// Like `verify`, also handing back the key pair the signature was checked
    /// against.
    pub fn verify_with_key(&self, token: &str) -> Result<(Claims, Arc<KeyPair>), TokenError> {
        let header = TokenHeader::parse(token)?;
        let alg = accepted_algorithm(&header.alg)
            .ok_or_else(|| TokenError::UnsupportedAlgorithm(header.alg.clone()))?;
        let kid = header.kid.ok_or(TokenError::MissingKeyId)?;
        let pair = self.keys.get(&kid)?;

        // Time is checked below against our own clock.
        let mut validation = Validation::new(alg);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims = jsonwebtoken::decode::<Claims>(token, pair.public_key(), &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                _ => TokenError::Malformed(e.to_string()),
            })?
            .claims;

        self.check_window(&claims)?;
        Ok((claims, pair))
    }

    fn check_window(&self, claims: &Claims) -> Result<(), TokenError> {
        if claims.exp <= claims.iat {
            return Err(TokenError::Malformed("exp must be after iat".into()));
        }

        let now = self.clock.now().timestamp();
        if now.saturating_add(self.leeway_seconds) < claims.iat {
            return Err(TokenError::NotYetValid);
        }
        if now.saturating_sub(self.leeway_seconds) > claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(())
    }
}
