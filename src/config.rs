/*
 * Responsibility
 * - 環境変数や設定の読み込み (PORT, DATABASE_URL, Auth 設定, timeout など)
 * - 設定値のバリデーション (不足・不正なら起動失敗)
 */
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::services::auth::password::DEFAULT_COST;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(value: Option<&str>) -> Self {
        match value
            .unwrap_or("development")
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Admin account created at startup when absent.
#[derive(Clone, PartialEq, Eq)]
pub struct SeedAdmin {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for SeedAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedAdmin")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,
    pub database_url: Option<String>,

    pub auth_issuer: String,
    pub auth_keys_dir: PathBuf,
    pub auth_active_kid: String,
    pub access_token_ttl_seconds: u64,
    pub access_token_leeway_seconds: u64,
    pub password_hash_cost: u32,

    pub request_timeout: Duration,
    pub shutdown_grace: Duration,

    pub seed_admin: Option<SeedAdmin>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            get(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let port: u16 = parse_or(&get, "PORT", 3000)?;
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        let app_env = AppEnv::parse(get("APP_ENV").as_deref());
        let database_url = get("DATABASE_URL").filter(|v| !v.trim().is_empty());

        let auth_issuer = required("AUTH_ISSUER")?;
        let auth_keys_dir = PathBuf::from(required("AUTH_KEYS_DIR")?);
        let auth_active_kid = required("AUTH_ACTIVE_KID")?;

        let access_token_ttl_seconds: u64 = parse_or(&get, "ACCESS_TOKEN_TTL_SECONDS", 3600)?;
        if access_token_ttl_seconds == 0 {
            return Err(ConfigError::Invalid("ACCESS_TOKEN_TTL_SECONDS"));
        }
        let access_token_leeway_seconds = parse_or(&get, "ACCESS_TOKEN_LEEWAY_SECONDS", 60)?;

        let password_hash_cost: u32 = parse_or(&get, "PASSWORD_HASH_COST", DEFAULT_COST)?;
        if !(4..=31).contains(&password_hash_cost) {
            return Err(ConfigError::Invalid("PASSWORD_HASH_COST"));
        }

        let request_timeout_seconds: u64 = parse_or(&get, "REQUEST_TIMEOUT_SECONDS", 30)?;
        if request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("REQUEST_TIMEOUT_SECONDS"));
        }
        let shutdown_grace_seconds: u64 = parse_or(&get, "SHUTDOWN_GRACE_SECONDS", 20)?;

        let seed_admin = match (get("SEED_ADMIN_EMAIL"), get("SEED_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(SeedAdmin { email, password }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("SEED_ADMIN_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::Missing("SEED_ADMIN_EMAIL")),
        };

        Ok(Self {
            addr,
            app_env,
            database_url,
            auth_issuer,
            auth_keys_dir,
            auth_active_kid,
            access_token_ttl_seconds,
            access_token_leeway_seconds,
            password_hash_cost,
            request_timeout: Duration::from_secs(request_timeout_seconds),
            shutdown_grace: Duration::from_secs(shutdown_grace_seconds),
            seed_admin,
        })
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid(key)),
    }
}
