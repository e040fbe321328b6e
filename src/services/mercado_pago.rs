//! Mercado Pago client - the payment gateway adapter.
//!
//! PIX charges are created as direct payments, so the gateway payment id is
//! the charge id. Card charges are created as checkout preferences; the local
//! id is our `external_reference` and the real payment id only shows up once
//! the buyer pays (webhook or reference search).

use crate::{
    config::app::MercadoPagoConfig,
    errors::{Error, Result},
    models::{PaymentMethod, PaymentStatus},
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

const PLACEHOLDER_TOKENS: &[&str] = &["YOUR_ACCESS_TOKEN", "SEU_ACCESS_TOKEN", "CHANGE_ME"];

/// What the gateway needs to create a charge
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// Our reference for the charge (idempotency key and `external_reference`)
    pub reference: String,
    /// Amount in BRL
    pub amount: f64,
    /// Description shown to the payer
    pub description: String,
    /// Product id, used as item id for card checkouts
    pub product_id: String,
    /// PIX or card
    pub method: PaymentMethod,
    /// Payer e-mail
    pub payer_email: String,
    /// Payer display name
    pub payer_name: Option<String>,
    /// When the charge stops being payable
    pub expires_at: Option<DateTime<Utc>>,
}

/// A charge as created at the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct Charge {
    /// Id under which the local payment is stored
    pub charge_id: String,
    /// Normalized status
    pub status: PaymentStatus,
    /// Amount
    pub amount: f64,
    /// Currency code
    pub currency: String,
    /// PIX copy-and-paste code
    pub qr_code: Option<String>,
    /// PIX QR code as base64 PNG
    pub qr_code_image: Option<String>,
    /// Checkout or ticket URL
    pub pay_url: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Expiration time
    pub expires_at: Option<DateTime<Utc>>,
}

/// Authoritative status of a charge
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeSnapshot {
    /// Gateway payment id
    pub charge_id: String,
    /// Normalized status
    pub status: PaymentStatus,
    /// Status string as sent by the gateway
    pub raw_status: String,
    /// Our reference, when the gateway echoes it
    pub external_reference: Option<String>,
    /// Paid amount
    pub amount: Option<f64>,
    /// Approval time
    pub approved_at: Option<DateTime<Utc>>,
}

/// Payment processor seam used by the reconciliation engine
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Whether real credentials are configured
    fn is_configured(&self) -> bool;

    /// Creates a charge
    async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge>;

    /// Fetches the current status of a gateway payment
    async fn fetch_charge(&self, charge_id: &str) -> Result<ChargeSnapshot>;

    /// Finds the most relevant payment created for one of our references
    async fn search_by_reference(&self, reference: &str) -> Result<Option<ChargeSnapshot>>;
}

#[derive(Debug, Serialize)]
struct PixPaymentRequest<'a> {
    transaction_amount: f64,
    description: &'a str,
    payment_method_id: &'static str,
    external_reference: &'a str,
    payer: Payer<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_of_expiration: Option<String>,
}

#[derive(Debug, Serialize)]
struct Payer<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct PreferenceRequest<'a> {
    items: Vec<PreferenceItem<'a>>,
    external_reference: &'a str,
    payer: Payer<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_url: Option<&'a str>,
    expires: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiration_date_to: Option<String>,
}

#[derive(Debug, Serialize)]
struct PreferenceItem<'a> {
    id: &'a str,
    title: &'a str,
    quantity: u32,
    unit_price: f64,
    currency_id: &'static str,
}

#[derive(Debug, Deserialize)]
struct PreferenceResponse {
    #[serde(default)]
    init_point: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MpPayment {
    id: serde_json::Value,
    status: String,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    transaction_amount: Option<f64>,
    #[serde(default)]
    currency_id: Option<String>,
    #[serde(default)]
    date_created: Option<String>,
    #[serde(default)]
    date_of_expiration: Option<String>,
    #[serde(default)]
    date_approved: Option<String>,
    #[serde(default)]
    point_of_interaction: Option<PointOfInteraction>,
}

#[derive(Debug, Deserialize)]
struct PointOfInteraction {
    #[serde(default)]
    transaction_data: Option<TransactionData>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    #[serde(default)]
    qr_code: Option<String>,
    #[serde(default)]
    qr_code_base64: Option<String>,
    #[serde(default)]
    ticket_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<MpPayment>,
}

fn parse_date(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|d| d.with_timezone(&Utc))
}

/// Gateway ids arrive as JSON numbers or strings depending on the endpoint.
pub(crate) fn id_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl MpPayment {
    fn charge_id(&self) -> Result<String> {
        id_to_string(&self.id).ok_or_else(|| Error::Gateway {
            message: format!("payment without id: {}", self.id),
        })
    }

    fn snapshot(&self) -> Result<ChargeSnapshot> {
        Ok(ChargeSnapshot {
            charge_id: self.charge_id()?,
            status: PaymentStatus::from_gateway(&self.status),
            raw_status: self.status.clone(),
            external_reference: self.external_reference.clone(),
            amount: self.transaction_amount,
            approved_at: parse_date(self.date_approved.as_deref()),
        })
    }
}

/// HTTP client for the Mercado Pago REST API
#[derive(Debug, Clone)]
pub struct MercadoPagoClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    notification_url: Option<String>,
}

impl MercadoPagoClient {
    /// Builds a client from configuration.
    pub fn new(config: &MercadoPagoConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.trim().to_string(),
            notification_url: config.notification_url.clone().filter(|u| !u.is_empty()),
        })
    }

    fn ensure_configured(&self) -> Result<()> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(Error::Config {
                message: "Mercado Pago access token is not configured".to_string(),
            })
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Gateway {
                message: format!("status {}: {}", status.as_u16(), body),
            });
        }
        serde_json::from_str(&body).map_err(|e| Error::Gateway {
            message: format!("invalid response: {e}; body={body}"),
        })
    }

    async fn create_pix(&self, request: &ChargeRequest) -> Result<Charge> {
        let body = PixPaymentRequest {
            transaction_amount: request.amount,
            description: &request.description,
            payment_method_id: "pix",
            external_reference: &request.reference,
            payer: Payer {
                email: &request.payer_email,
                first_name: request.payer_name.as_deref(),
            },
            notification_url: self.notification_url.as_deref(),
            date_of_expiration: request
                .expires_at
                .map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true)),
        };

        let response = self
            .http
            .post(format!("{}/v1/payments", self.base_url))
            .bearer_auth(&self.access_token)
            .header("X-Idempotency-Key", &request.reference)
            .json(&body)
            .send()
            .await?;
        let payment: MpPayment = Self::read_json(response).await?;

        let data = payment
            .point_of_interaction
            .as_ref()
            .and_then(|p| p.transaction_data.as_ref());
        Ok(Charge {
            charge_id: payment.charge_id()?,
            status: PaymentStatus::from_gateway(&payment.status),
            amount: payment.transaction_amount.unwrap_or(request.amount),
            currency: payment.currency_id.clone().unwrap_or_else(|| "BRL".to_string()),
            qr_code: data.and_then(|d| d.qr_code.clone()),
            qr_code_image: data.and_then(|d| d.qr_code_base64.clone()),
            pay_url: data.and_then(|d| d.ticket_url.clone()),
            created_at: parse_date(payment.date_created.as_deref()).unwrap_or_else(Utc::now),
            expires_at: parse_date(payment.date_of_expiration.as_deref()).or(request.expires_at),
        })
    }

    async fn create_checkout(&self, request: &ChargeRequest) -> Result<Charge> {
        let body = PreferenceRequest {
            items: vec![PreferenceItem {
                id: &request.product_id,
                title: &request.description,
                quantity: 1,
                unit_price: request.amount,
                currency_id: "BRL",
            }],
            external_reference: &request.reference,
            payer: Payer {
                email: &request.payer_email,
                first_name: request.payer_name.as_deref(),
            },
            notification_url: self.notification_url.as_deref(),
            expires: request.expires_at.is_some(),
            expiration_date_to: request
                .expires_at
                .map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true)),
        };

        let response = self
            .http
            .post(format!("{}/checkout/preferences", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        let preference: PreferenceResponse = Self::read_json(response).await?;

        Ok(Charge {
            charge_id: request.reference.clone(),
            status: PaymentStatus::Pending,
            amount: request.amount,
            currency: "BRL".to_string(),
            qr_code: None,
            qr_code_image: None,
            pay_url: preference.init_point,
            created_at: Utc::now(),
            expires_at: request.expires_at,
        })
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoClient {
    fn is_configured(&self) -> bool {
        !self.access_token.is_empty()
            && !PLACEHOLDER_TOKENS
                .iter()
                .any(|p| self.access_token.eq_ignore_ascii_case(p))
    }

    #[instrument(skip(self, request), fields(reference = %request.reference, method = request.method.as_str()))]
    async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge> {
        self.ensure_configured()?;
        let charge = match request.method {
            PaymentMethod::Pix => self.create_pix(request).await?,
            PaymentMethod::Card => self.create_checkout(request).await?,
        };
        debug!(charge_id = %charge.charge_id, "Charge created");
        Ok(charge)
    }

    #[instrument(skip(self))]
    async fn fetch_charge(&self, charge_id: &str) -> Result<ChargeSnapshot> {
        self.ensure_configured()?;
        let response = self
            .http
            .get(format!("{}/v1/payments/{}", self.base_url, charge_id))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let payment: MpPayment = Self::read_json(response).await?;
        payment.snapshot()
    }

    #[instrument(skip(self))]
    async fn search_by_reference(&self, reference: &str) -> Result<Option<ChargeSnapshot>> {
        self.ensure_configured()?;
        let response = self
            .http
            .get(format!("{}/v1/payments/search", self.base_url))
            .bearer_auth(&self.access_token)
            .query(&[
                ("external_reference", reference),
                ("sort", "date_created"),
                ("criteria", "desc"),
            ])
            .send()
            .await?;
        let search: SearchResponse = Self::read_json(response).await?;

        // An approved attempt wins over later rejected retries.
        let best = search
            .results
            .iter()
            .find(|p| p.status == "approved")
            .or_else(|| search.results.first());
        best.map(MpPayment::snapshot).transpose()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use axum::{Json, Router, extract::Path, routing::get, routing::post};
    use serde_json::json;

    fn config(base_url: &str, token: &str) -> MercadoPagoConfig {
        MercadoPagoConfig {
            access_token: token.to_string(),
            base_url: base_url.to_string(),
            ..MercadoPagoConfig::default()
        }
    }

    fn request(method: PaymentMethod) -> ChargeRequest {
        ChargeRequest {
            reference: "ref-1".to_string(),
            amount: 25.0,
            description: "VIP".to_string(),
            product_id: "vip".to_string(),
            method,
            payer_email: "buyer@example.com".to_string(),
            payer_name: Some("buyer".to_string()),
            expires_at: None,
        }
    }

    async fn spawn_fake_gateway() -> String {
        let app = Router::new()
            .route(
                "/v1/payments",
                post(|Json(body): Json<serde_json::Value>| async move {
                    Json(json!({
                        "id": 123_456_789_u64,
                        "status": "pending",
                        "transaction_amount": body["transaction_amount"],
                        "currency_id": "BRL",
                        "date_created": "2024-05-01T10:00:00.000-04:00",
                        "date_of_expiration": "2024-05-01T10:30:00.000-04:00",
                        "point_of_interaction": {
                            "transaction_data": {
                                "qr_code": "00020126pix",
                                "qr_code_base64": "iVBORw0KGgo=",
                                "ticket_url": "https://pay.example/ticket"
                            }
                        }
                    }))
                }),
            )
            .route(
                "/v1/payments/search",
                get(|| async {
                    Json(json!({
                        "results": [
                            {"id": 2, "status": "rejected", "external_reference": "ref-1"},
                            {"id": 1, "status": "approved", "external_reference": "ref-1"}
                        ]
                    }))
                }),
            )
            .route(
                "/v1/payments/{id}",
                get(|Path(id): Path<String>| async move {
                    if id == "404" {
                        return (
                            axum::http::StatusCode::NOT_FOUND,
                            Json(json!({"message": "Payment not found"})),
                        );
                    }
                    (
                        axum::http::StatusCode::OK,
                        Json(json!({
                            "id": id.parse::<u64>().unwrap_or_default(),
                            "status": "approved",
                            "external_reference": "ref-1",
                            "transaction_amount": 25.0,
                            "date_approved": "2024-05-01T10:05:00.000-04:00"
                        })),
                    )
                }),
            )
            .route(
                "/checkout/preferences",
                post(|| async { Json(json!({"id": "pref-1", "init_point": "https://mp.example/checkout"})) }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_placeholder_tokens_are_not_configured() {
        let client = MercadoPagoClient::new(&config("http://localhost", "")).unwrap();
        assert!(!client.is_configured());
        let client = MercadoPagoClient::new(&config("http://localhost", "YOUR_ACCESS_TOKEN")).unwrap();
        assert!(!client.is_configured());
        let client = MercadoPagoClient::new(&config("http://localhost", "APP_USR-1")).unwrap();
        assert!(client.is_configured());
    }

    #[tokio::test]
    async fn test_unconfigured_client_fails_fast() {
        // Port 9 (discard) is never contacted: the configuration check comes first.
        let client = MercadoPagoClient::new(&config("http://127.0.0.1:9", "")).unwrap();
        let result = client.create_charge(&request(PaymentMethod::Pix)).await;
        assert!(matches!(result, Err(Error::Config { .. })));
        let result = client.fetch_charge("1").await;
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_create_pix_charge() {
        let base = spawn_fake_gateway().await;
        let client = MercadoPagoClient::new(&config(&base, "APP_USR-1")).unwrap();

        let charge = client.create_charge(&request(PaymentMethod::Pix)).await.unwrap();
        assert_eq!(charge.charge_id, "123456789");
        assert_eq!(charge.status, PaymentStatus::Pending);
        assert_eq!(charge.amount, 25.0);
        assert_eq!(charge.qr_code.as_deref(), Some("00020126pix"));
        assert_eq!(charge.pay_url.as_deref(), Some("https://pay.example/ticket"));
        assert!(charge.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_create_card_checkout_uses_reference_as_id() {
        let base = spawn_fake_gateway().await;
        let client = MercadoPagoClient::new(&config(&base, "APP_USR-1")).unwrap();

        let charge = client.create_charge(&request(PaymentMethod::Card)).await.unwrap();
        assert_eq!(charge.charge_id, "ref-1");
        assert_eq!(charge.pay_url.as_deref(), Some("https://mp.example/checkout"));
    }

    #[tokio::test]
    async fn test_fetch_charge_and_errors() {
        let base = spawn_fake_gateway().await;
        let client = MercadoPagoClient::new(&config(&base, "APP_USR-1")).unwrap();

        let snapshot = client.fetch_charge("42").await.unwrap();
        assert_eq!(snapshot.charge_id, "42");
        assert_eq!(snapshot.status, PaymentStatus::Approved);
        assert_eq!(snapshot.external_reference.as_deref(), Some("ref-1"));
        assert!(snapshot.approved_at.is_some());

        let missing = client.fetch_charge("404").await;
        assert!(matches!(missing, Err(Error::Gateway { ref message }) if message.contains("404")));
    }

    #[tokio::test]
    async fn test_search_prefers_approved_attempt() {
        let base = spawn_fake_gateway().await;
        let client = MercadoPagoClient::new(&config(&base, "APP_USR-1")).unwrap();

        let snapshot = client.search_by_reference("ref-1").await.unwrap().unwrap();
        assert_eq!(snapshot.charge_id, "1");
        assert_eq!(snapshot.status, PaymentStatus::Approved);
    }

    #[test]
    fn test_id_to_string() {
        assert_eq!(id_to_string(&json!(123)).as_deref(), Some("123"));
        assert_eq!(id_to_string(&json!("abc")).as_deref(), Some("abc"));
        assert_eq!(id_to_string(&json!("")), None);
        assert_eq!(id_to_string(&json!(null)), None);
    }
}
