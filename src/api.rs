//! HTTP surface: `/health` and `/metrics`.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::health::{HealthState, HealthStatus};
use crate::publish::MetricsPublisher;

#[derive(Clone)]
pub struct AppState {
    pub health: HealthState,
    pub publisher: MetricsPublisher,
}

impl AppState {
    pub fn new(health: HealthState, publisher: MetricsPublisher) -> Self {
        Self { health, publisher }
    }
}

/// 500 only once the monitor has failed for good; degraded is still serving.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.health.snapshot().await;
    let code = match snapshot.status {
        HealthStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    (code, Json(snapshot))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.publisher.render() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; charset=utf-8")],
                e.to_string(),
            )
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Bind the metrics port. Fails fast when the address is taken.
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let addr = format!("0.0.0.0:{}", port);
    TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding HTTP server to {}", addr))
}

/// Serve on an already bound listener until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, state: Arc<AppState>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let app = create_router(state);
    info!(addr = %listener.local_addr()?, "Starting HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
