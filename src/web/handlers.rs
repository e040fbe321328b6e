//! HTTP handlers for the webhook server.

use super::{WebState, webhook};
use axum::{
    Json,
    extract::{Query, State},
};
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{debug, warn};

/// `POST /webhook`
///
/// The notification is processed before answering, but the answer is always
/// `200 {"received": true}` so the gateway does not keep retrying on our
/// internal failures.
pub async fn post_webhook(
    State(state): State<WebState>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Json<Value> {
    match webhook::parse_event(&query, &body) {
        Some(event) => {
            debug!(kind = %event.kind, id = ?event.id, "Notification received");
            webhook::handle_notification(&state.engine, &event).await;
        }
        None => warn!(
            body = %String::from_utf8_lossy(&body),
            "Notification without a type"
        ),
    }
    Json(json!({ "received": true }))
}

/// `GET /status`
pub async fn get_status(State(state): State<WebState>) -> Json<Value> {
    Json(json!({
        "status": "online",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "uptime": state.started_at.elapsed().as_secs_f64(),
    }))
}

/// `GET /health`
pub async fn get_health(State(state): State<WebState>) -> Json<Value> {
    let mercado_pago = if state.engine.gateway().is_configured() {
        "configured"
    } else {
        "not configured"
    };
    Json(json!({
        "status": "ok",
        "mercadoPago": mercado_pago,
        "discord": "connected",
    }))
}
