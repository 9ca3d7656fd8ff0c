/*
 * Responsibility
 * - Config読み込み → tracing / panic hook → 依存生成 → Router 組み立て
 * - pipeline (middleware) の適用
 * - server::serve() で起動し、signal で graceful shutdown
 */
use std::{backtrace::Backtrace, panic, sync::Arc};

use anyhow::Result;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    api,
    config::{AppEnv, Config, SeedAdmin},
    error::AppError,
    middleware::pipeline,
    repos::user_repo::{MemoryUserRepo, PgUserRepo, UserRepo},
    server::{self, Shutdown},
    services::{
        auth::build_auth_service,
        user::{NewUser, Role, UserError, UserService},
    },
    state::AppState,
};

fn init_tracing(app_env: AppEnv) {
    // Prefer RUST_LOG if set; otherwise use a sensible default.
    // Ex:
    // RUST_LOG=info,sales_api=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    let registry = tracing_subscriber::registry().with(filter);
    if app_env.is_production() {
        registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn init_panic_hook() {
    // Keep the default hook as a fallback (prints to stderr with location/payload).
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        // Request panics are recovered by the pipeline; this only makes sure the
        // location and stack end up in the structured log.
        let backtrace = Backtrace::force_capture();
        tracing::error!(panic = %info, backtrace = %backtrace, "panic");
        default_hook(info);
    }))
}

pub async fn run() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.app_env);
    init_panic_hook();

    info!(
        "starting API in {:?} mode on {}",
        config.app_env,
        config.addr
    );

    let state = build_state(&config).await?;
    if let Some(seed) = &config.seed_admin {
        seed_admin(&state.users, seed).await?;
    }

    let shutdown = state.shutdown.clone();
    let metrics = state.metrics.clone();
    let app = build_router(state);

    tokio::spawn(listen_for_signals(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "listening");

    let result = server::serve(listener, app, shutdown, config.shutdown_grace).await;
    info!(metrics = ?metrics.snapshot(), "final metrics");
    result?;

    Ok(())
}

async fn build_state(config: &Config) -> Result<AppState> {
    // Build process-level services here and inject them into the shared application state.
    let auth = build_auth_service(config)?;
    info!(kids = ?auth.keys().kids(), active_kid = %auth.active_kid(), "keys loaded");

    let repo: Arc<dyn UserRepo> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            Arc::new(PgUserRepo::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, users are kept in memory");
            Arc::new(MemoryUserRepo::new())
        }
    };
    let users = Arc::new(UserService::new(repo, config.password_hash_cost));

    Ok(AppState::new(auth, users, config.request_timeout))
}

async fn seed_admin(users: &UserService, seed: &SeedAdmin) -> Result<()> {
    let new = NewUser {
        name: "Administrator".to_string(),
        email: seed.email.clone(),
        roles: vec![Role::Admin, Role::User],
        department: None,
        password: seed.password.clone(),
    };
    match users.create(new).await {
        Ok(user) => info!(user_id = %user.id, "seeded admin user"),
        Err(UserError::DuplicateEmail) => info!("admin user already present"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Full application router: v1 routes, fallback and the request pipeline.
pub fn build_router(state: AppState) -> Router {
    async fn not_found() -> AppError {
        AppError::not_found("route")
    }

    let router = Router::new()
        .nest("/api/v1", api::v1::routes(state.clone()))
        .fallback(not_found)
        .with_state(state.clone());

    pipeline::apply(router, &state)
}

async fn listen_for_signals(shutdown: Shutdown) {
    loop {
        let name = wait_for_signal().await;
        // A repeated signal is logged by `trigger` and otherwise ignored.
        shutdown.trigger(name);
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let Ok(mut term) = signal(SignalKind::terminate()) else {
        warn!("cannot listen for SIGTERM, falling back to ctrl-c only");
        return ctrl_c().await;
    };
    tokio::select! {
        name = ctrl_c() => name,
        _ = term.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
