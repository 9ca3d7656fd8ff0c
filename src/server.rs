//! Listener lifecycle.
//!
//! `serve` runs until the shutdown signal fires, then stops accepting and gives
//! in-flight requests `grace` to finish. Whatever is still running after that
//! is cancelled (the drain stage answers it with 503) and `serve` reports
//! `ForcedShutdown`.
use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server io: {0}")]
    Io(#[from] std::io::Error),
    #[error("in-flight requests did not finish within {grace:?}")]
    ForcedShutdown { grace: Duration },
}

/// Process shutdown signal, shared by the server, the signal listener and the
/// error-translation stage.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    graceful: CancellationToken,
    forced: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a graceful shutdown. Only the first call has an effect; later
    /// calls are logged and return `false`.
    pub fn trigger(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        if self.reason.set(reason.clone()).is_err() {
            warn!(reason = %reason, "shutdown already in progress");
            return false;
        }
        info!(reason = %reason, "shutdown requested");
        self.graceful.cancel();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.graceful.is_cancelled()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    pub async fn triggered(&self) {
        self.graceful.cancelled().await
    }

    /// Cancel every request still in flight.
    pub fn force(&self) {
        self.forced.cancel();
    }

    pub fn is_forced(&self) -> bool {
        self.forced.is_cancelled()
    }

    pub async fn forced(&self) {
        self.forced.cancelled().await
    }
}

pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: Shutdown,
    grace: Duration,
) -> Result<(), ServerError> {
    let signal = shutdown.clone();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { signal.triggered().await });

    let mut server = std::pin::pin!(server.into_future());

    tokio::select! {
        res = &mut server => {
            // Stopped without being asked to.
            return res.map_err(ServerError::Io);
        }
        _ = shutdown.triggered() => {}
    }

    info!(grace = ?grace, "draining in-flight requests");

    match tokio::time::timeout(grace, &mut server).await {
        Ok(res) => {
            res?;
            info!("shutdown complete");
            Ok(())
        }
        Err(_) => {
            shutdown.force();
            warn!(grace = ?grace, "grace period elapsed, cancelling remaining requests");
            Err(ServerError::ForcedShutdown { grace })
        }
    }
}
