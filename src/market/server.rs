use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::api::{self, AppState, SharedState};
use super::db::{DbHandle, MarketDb};
use super::password::Hasher;
use super::ws::ChatHub;
use crate::config::AppConfig;

/// Build the full application router.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let mut app = api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Wrap an opened database in shared request state.
pub fn build_state(config: &AppConfig, db: MarketDb, hasher: Hasher) -> SharedState {
    Arc::new(AppState {
        db: DbHandle::new(db),
        hub: ChatHub::default(),
        hasher,
        session_ttl_hours: config.session_ttl_hours,
        default_student_password: config.default_student_password.clone(),
    })
}

/// Open the database and bring it to a servable state: reset and seed in
/// debug mode, create the configured admin, drop expired sessions.
pub async fn prepare_database(config: &AppConfig, hasher: &Hasher) -> Result<MarketDb> {
    if let Some(parent) = config.database_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let db = MarketDb::open_with_retry(
        &config.database_path,
        config.db_connect_retries,
        Duration::from_millis(config.db_retry_delay_ms),
    )
    .await?;

    if config.debug {
        warn!("Debug mode: resetting and seeding the database");
        db.reset_schema()?;
        db.seed(hasher).context("Failed to seed database")?;
    }

    if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
        let hash = hasher.hash_blocking(password.clone()).await?;
        if db.ensure_admin(email, &hash)? {
            info!(email = %email, "Created admin account");
        }
    }

    let purged = db.purge_expired_sessions()?;
    if purged > 0 {
        info!(purged, "Removed expired sessions");
    }
    Ok(db)
}

/// Start the marketplace server and run until Ctrl+C or SIGTERM.
pub async fn start_server(config: &AppConfig) -> Result<()> {
    let hasher = Hasher::new(config.argon2_memory_kib, config.argon2_iterations)?;
    let db = prepare_database(config, &hasher).await?;
    let state = build_state(config, db, hasher);
    let app = build_router(state, config.dev_mode);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, dev_mode = config.dev_mode, "Marketplace listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutting down");
}
