//! Payment notification parsing.
//!
//! Mercado Pago notifies in two shapes: webhooks with a JSON body
//! (`{"type": "payment", "data": {"id": "123"}}`) and legacy IPN calls with
//! query parameters (`?topic=payment&id=123`). Ids arrive as numbers or
//! strings. Only payment notifications trigger work; the gateway is always
//! asked for the authoritative status, the notification body is never trusted.

use crate::{core::delivery::DeliveryEngine, errors::Error, services::mercado_pago::id_to_string};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// A parsed notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    /// `payment`, `merchant_order`, ...
    pub kind: String,
    /// Resource id
    pub id: Option<String>,
}

impl WebhookEvent {
    /// Whether this notification is about a payment
    #[must_use]
    pub fn is_payment(&self) -> bool {
        self.kind == "payment"
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

/// Reads the event from the body, falling back to query parameters.
///
/// Returns `None` when neither names a notification type.
#[must_use]
pub fn parse_event(query: &HashMap<String, String>, body: &[u8]) -> Option<WebhookEvent> {
    let json: Value = serde_json::from_slice(body).unwrap_or(Value::Null);

    let kind = json
        .get("type")
        .or_else(|| json.get("topic"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .or_else(|| non_empty(query.get("type")))
        .or_else(|| non_empty(query.get("topic")))?;

    let id = json
        .get("data")
        .and_then(|data| data.get("id"))
        .and_then(id_to_string)
        .or_else(|| json.get("id").and_then(id_to_string))
        .or_else(|| non_empty(query.get("data.id")))
        .or_else(|| non_empty(query.get("id")));

    Some(WebhookEvent { kind, id })
}

/// Processes a notification to completion. Failures are logged, never returned.
pub async fn handle_notification(engine: &DeliveryEngine, event: &WebhookEvent) {
    if !event.is_payment() {
        debug!(kind = %event.kind, "Ignoring notification");
        return;
    }
    let Some(id) = event.id.as_deref() else {
        warn!("Payment notification without an id");
        return;
    };

    match engine.sync_payment_status(id).await {
        Ok(outcome) => info!(charge_id = %id, ?outcome, "Payment notification processed"),
        Err(Error::PaymentNotFound { .. }) => {
            warn!(charge_id = %id, "Notification for a payment this bot did not create");
        }
        Err(e) => warn!(charge_id = %id, "Payment notification failed: {}", e),
    }
}
