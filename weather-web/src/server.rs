use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use weather_core::{Config, Pipeline};

use crate::{handlers, session::SessionStore};

#[derive(Debug, Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, sessions: SessionStore) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            sessions: Arc::new(sessions),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let sessions = SessionStore::new(config.session_secret()?, config.session_ttl())?;
        let pipeline = Pipeline::from_config(config)?;
        Ok(Self::new(pipeline, sessions))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/location", post(handlers::submit_location))
        .route("/geo_data/{location_name}", get(handlers::geo_data))
        .route("/get_weather", get(handlers::get_weather))
        .route("/get_weather_for_user", get(handlers::get_weather_for_user))
        .route("/error", get(handlers::error_page))
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(state: AppState, addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server terminated unexpectedly")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
