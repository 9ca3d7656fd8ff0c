/*
 * Responsibility
 * - Router に紐づける共有コンテキスト (AppState)
 *   - auth: token 発行/検証 + policy, users: user 操作, metrics, shutdown signal
 * - Clone 前提で持つ (内部は Arc/Clone cheap)
 */
use std::{sync::Arc, time::Duration};

use crate::middleware::metrics::Metrics;
use crate::server::Shutdown;
use crate::services::{auth::AuthService, user::UserService};

#[derive(Clone, Debug)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub users: Arc<UserService>,
    pub metrics: Arc<Metrics>,
    pub shutdown: Shutdown,
    /// Whole-request budget. Policy calls get what is left of it.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(auth: Arc<AuthService>, users: Arc<UserService>, request_timeout: Duration) -> Self {
        Self {
            auth,
            users,
            metrics: Arc::new(Metrics::new()),
            shutdown: Shutdown::new(),
            request_timeout,
        }
    }
}
