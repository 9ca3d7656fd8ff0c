//! Factory: build `AuthService` from application `Config`.
use std::{sync::Arc, time::Duration};

use thiserror::Error;

use crate::config::Config;
use crate::services::auth::{
    AuthService,
    jwt::{SystemClock, TokenService},
    keystore::{KeyError, KeyRing},
    policy::{Policy, PolicyError},
};

#[derive(Debug, Error)]
pub enum AuthSetupError {
    #[error("loading keys: {0}")]
    Keys(#[from] KeyError),
    #[error("active key {kid} cannot sign: {source}")]
    ActiveKey {
        kid: String,
        #[source]
        source: KeyError,
    },
    #[error("loading policy: {0}")]
    Policy(#[from] PolicyError),
}

pub fn build_auth_service(config: &Config) -> Result<Arc<AuthService>, AuthSetupError> {
    let keys = Arc::new(KeyRing::from_dir(&config.auth_keys_dir)?);

    // Fail at startup, not on the first login.
    keys.signing_key(&config.auth_active_kid)
        .map_err(|source| AuthSetupError::ActiveKey {
            kid: config.auth_active_kid.clone(),
            source,
        })?;

    let tokens = TokenService::new(
        keys,
        Arc::new(SystemClock),
        config.access_token_leeway_seconds,
    );
    let policy = Policy::embedded()?;

    let auth = AuthService::new(
        tokens,
        policy,
        &config.auth_issuer,
        &config.auth_active_kid,
        Duration::from_secs(config.access_token_ttl_seconds),
    );

    Ok(Arc::new(auth))
}
