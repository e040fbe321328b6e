//! Webhook server - receives payment notifications and exposes health checks.
//!
//! Routes:
//! - `POST /webhook` payment notifications, always answered with 200
//! - `GET /status` liveness and uptime
//! - `GET /health` which external services are configured

/// Request handlers
pub mod handlers;
/// Notification parsing and processing
pub mod webhook;

use crate::{
    config::app::WebhookConfig,
    core::delivery::DeliveryEngine,
    errors::{Error, Result},
};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for the request handlers
#[derive(Clone)]
pub struct WebState {
    /// Reconciliation engine
    pub engine: Arc<DeliveryEngine>,
    /// Process start, for uptime
    pub started_at: Instant,
}

impl WebState {
    /// State starting the uptime clock now
    #[must_use]
    pub fn new(engine: Arc<DeliveryEngine>) -> Self {
        Self {
            engine,
            started_at: Instant::now(),
        }
    }
}

/// Builds the router.
pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/webhook", post(handlers::post_webhook))
        .route("/status", get(handlers::get_status))
        .route("/health", get(handlers::get_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds and serves until `shutdown` turns `true`.
pub async fn serve(
    config: &WebhookConfig,
    state: WebState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Config {
            message: format!("failed to bind webhook server to {addr}: {e}"),
        })?;
    info!("Webhook server listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    info!("Webhook server stopped");
    Ok(())
}
