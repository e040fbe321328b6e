//! Domain records persisted through the record store.
//!
//! Every record type names the collection it lives in and the id it is keyed
//! by, see [`Record`]. Field names follow the JSON layout of the legacy
//! `*.json` files so old data can be imported as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Named collections of the record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Product catalogue
    Products,
    /// Payments created at the gateway
    Payments,
    /// Purchases derived from approved payments
    ApprovedPurchases,
    /// Discord user to game account links
    Links,
    /// Support tickets
    Tickets,
    /// Named channel configuration
    Channels,
}

impl Collection {
    /// Key used in the `records.collection` column
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::Payments => "payments",
            Self::ApprovedPurchases => "approved_purchases",
            Self::Links => "links",
            Self::Tickets => "tickets",
            Self::Channels => "channels",
        }
    }

    /// Legacy file name, also used as the stem for backups
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Products => "produtos.json",
            Self::Payments => "payments.json",
            Self::ApprovedPurchases => "approved_purchases.json",
            Self::Links => "links.json",
            Self::Tickets => "tickets.json",
            Self::Channels => "channels.json",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A type stored in one collection of the record store, keyed by a string id.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection this record type lives in
    const COLLECTION: Collection;

    /// Unique key inside the collection
    fn record_id(&self) -> &str;
}

/// Unit of a product's time-limited grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, poise::ChoiceParameter)]
pub enum TimeUnit {
    /// Minutes
    #[serde(rename = "min")]
    #[name = "minutes"]
    Minutes,
    /// Hours
    #[serde(rename = "h")]
    #[name = "hours"]
    Hours,
    /// Days
    #[serde(rename = "d")]
    #[name = "days"]
    Days,
}

impl TimeUnit {
    /// Length of one unit in milliseconds
    #[must_use]
    pub const fn millis(self) -> i64 {
        match self {
            Self::Minutes => 60_000,
            Self::Hours => 3_600_000,
            Self::Days => 86_400_000,
        }
    }

    /// Short label used in templates and embeds
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minutes => "min",
            Self::Hours => "h",
            Self::Days => "d",
        }
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "min" | "m" | "minutes" => Ok(Self::Minutes),
            "h" | "hours" => Ok(Self::Hours),
            "d" | "days" => Ok(Self::Days),
            other => Err(format!("Unknown time unit '{other}', expected min, h or d")),
        }
    }
}

/// A product for sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Unique product id
    pub id: String,
    /// Display name
    pub name: String,
    /// Description shown in the shop embed
    #[serde(default)]
    pub description: String,
    /// Price in BRL
    pub price: f64,
    /// Optional image URL
    #[serde(default)]
    pub image: Option<String>,
    /// Remaining stock; `None` means unlimited
    #[serde(default)]
    pub stock: Option<u32>,
    /// Length of the grant, together with `time_unit`
    #[serde(default)]
    pub time_amount: Option<u32>,
    /// Unit of `time_amount`
    #[serde(default)]
    pub time_unit: Option<TimeUnit>,
    /// Permanent grant that never expires
    #[serde(default)]
    pub infinito: bool,
    /// Console command run on delivery
    #[serde(default)]
    pub delivery_command: Option<String>,
    /// Console command run when the grant expires
    #[serde(default)]
    pub removal_command: Option<String>,
    /// Value substituted for `{quantity}`; defaults to 1
    #[serde(default)]
    pub quantity: Option<u32>,
    /// When the product was created
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// When the product was last edited
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Product {
    /// Whether a purchase of this product stays forever
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        self.infinito || self.time_amount.is_none() || self.time_unit.is_none()
    }

    /// Human readable duration ("30 d", "permanent")
    #[must_use]
    pub fn duration_label(&self) -> String {
        match (self.infinito, self.time_amount, self.time_unit) {
            (false, Some(amount), Some(unit)) => format!("{amount} {}", unit.as_str()),
            _ => "permanent".to_string(),
        }
    }
}

impl Record for Product {
    const COLLECTION: Collection = Collection::Products;

    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Status of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Waiting for the buyer
    Pending,
    /// Paid
    Approved,
    /// Refused by the processor
    Rejected,
    /// Cancelled or refunded
    Cancelled,
    /// Not paid in time
    Expired,
    /// Delivered by an administrator without an approved payment
    DeliveredManually,
}

impl PaymentStatus {
    /// Normalizes a Mercado Pago status string.
    #[must_use]
    pub fn from_gateway(status: &str) -> Self {
        match status {
            "approved" => Self::Approved,
            "pending" | "in_process" | "in_mediation" | "authorized" => Self::Pending,
            "rejected" => Self::Rejected,
            "cancelled" | "refunded" | "charged_back" => Self::Cancelled,
            "expired" => Self::Expired,
            other => {
                tracing::warn!("Unknown gateway status '{}', treating as pending", other);
                Self::Pending
            }
        }
    }

    /// Stored string form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::DeliveredManually => "delivered_manually",
        }
    }

    /// Emoji used in listings
    #[must_use]
    pub const fn emoji(self) -> &'static str {
        match self {
            Self::Pending => "⏳",
            Self::Approved | Self::DeliveredManually => "✅",
            Self::Rejected | Self::Cancelled => "❌",
            Self::Expired => "⌛",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the buyer pays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, poise::ChoiceParameter)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// PIX instant transfer with QR code
    #[name = "PIX"]
    Pix,
    /// Card checkout link
    #[name = "Card"]
    Card,
}

impl PaymentMethod {
    /// Stored string form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pix => "pix",
            Self::Card => "card",
        }
    }
}

/// A charge requested from the payment gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    /// Gateway charge id (PIX) or external reference (card checkout)
    pub id: String,
    /// Discord user id of the buyer
    pub user_id: String,
    /// Purchased product id
    pub product_id: String,
    /// Product name at purchase time
    pub product_name: String,
    /// Charged amount
    pub amount: f64,
    /// Currency code, always `BRL`
    pub currency: String,
    /// Current status
    pub status: PaymentStatus,
    /// Payment method
    pub payment_method: PaymentMethod,
    /// When the charge was created
    pub date: DateTime<Utc>,
    /// PIX copy-and-paste code
    #[serde(default)]
    pub qr_code: Option<String>,
    /// Checkout or ticket URL
    #[serde(default)]
    pub pay_url: Option<String>,
    /// When the charge stops being payable
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    /// Free-form extra data (buyer username, gateway payment id for card checkouts)
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Record for Payment {
    const COLLECTION: Collection = Collection::Payments;

    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Lifecycle position of a purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseState {
    /// Paid, waiting for delivery
    Approved,
    /// Delivered and active
    Delivered,
    /// Grant time is over, removal pending
    Expired,
    /// Removal command ran, terminal
    Removed,
}

/// A purchase derived from an approved payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    /// The payment this purchase comes from
    #[serde(flatten)]
    pub payment: Payment,
    /// When the approval was observed
    pub approved_at: DateTime<Utc>,
    /// Whether the delivery command succeeded
    #[serde(default)]
    pub delivered: bool,
    /// When it was delivered
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    /// Game account the product was delivered to
    #[serde(default)]
    pub delivered_to: Option<String>,
    /// Expiry instant in epoch milliseconds; `None` never expires
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// Whether the expiry sweep flagged it
    #[serde(default)]
    pub expired: bool,
    /// When it was flagged as expired
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    /// Whether the removal command succeeded
    #[serde(default)]
    pub removed: bool,
    /// When it was removed
    #[serde(default)]
    pub removed_at: Option<DateTime<Utc>>,
    /// Removal template copied from the product at approval time
    #[serde(default)]
    pub removal_command: Option<String>,
}

impl Purchase {
    /// Builds an undelivered purchase from an approved payment.
    #[must_use]
    pub fn from_payment(payment: Payment, product: Option<&Product>, approved_at: DateTime<Utc>) -> Self {
        Self {
            payment,
            approved_at,
            delivered: false,
            delivered_at: None,
            delivered_to: None,
            expires_at: None,
            expired: false,
            expired_at: None,
            removed: false,
            removed_at: None,
            removal_command: product.and_then(|p| p.removal_command.clone()),
        }
    }

    /// Payment id, which is also the purchase id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.payment.id
    }

    /// Current lifecycle state derived from the flags
    #[must_use]
    pub const fn state(&self) -> PurchaseState {
        if self.removed {
            PurchaseState::Removed
        } else if self.expired {
            PurchaseState::Expired
        } else if self.delivered {
            PurchaseState::Delivered
        } else {
            PurchaseState::Approved
        }
    }

    /// Whether the expiry sweep should flag this purchase at `now_ms`.
    ///
    /// The comparison is strict: a purchase expiring exactly at `now_ms` is still active.
    #[must_use]
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.delivered
            && !self.expired
            && !self.removed
            && self.expires_at.is_some_and(|at| at < now_ms)
    }

    /// Whether the removal sweep should pick this purchase up
    #[must_use]
    pub const fn awaits_removal(&self) -> bool {
        self.expired && !self.removed
    }
}

impl Record for Purchase {
    const COLLECTION: Collection = Collection::ApprovedPurchases;

    fn record_id(&self) -> &str {
        &self.payment.id
    }
}

/// Link between a Discord user and a game-server account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityLink {
    /// Discord user id
    pub user_id: String,
    /// Game account id (`SteamID64`)
    pub steam_id: String,
    /// When the link was created
    pub linked_at: DateTime<Utc>,
    /// Who created it
    pub linked_by: String,
    /// Last relink
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Who relinked
    #[serde(default)]
    pub updated_by: Option<String>,
}

impl Record for IdentityLink {
    const COLLECTION: Collection = Collection::Links;

    fn record_id(&self) -> &str {
        &self.user_id
    }
}

/// Ticket status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Waiting for staff
    Open,
    /// Done
    Closed,
}

/// Support ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    /// Ticket id
    pub id: String,
    /// Discord channel of the ticket
    pub channel_id: String,
    /// Owner
    pub user_id: String,
    /// Open or closed
    pub status: TicketStatus,
    /// Optional subject given at creation
    #[serde(default)]
    pub subject: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last message or action
    pub last_activity: DateTime<Utc>,
    /// Close time
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    /// Who closed it
    #[serde(default)]
    pub closed_by: Option<String>,
}

impl Record for Ticket {
    const COLLECTION: Collection = Collection::Tickets;

    fn record_id(&self) -> &str {
        &self.id
    }
}

/// A named channel id (`logs`, `tickets`, `shop`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    /// Configuration name
    pub name: String,
    /// Discord channel id
    pub channel_id: String,
    /// When it was set
    pub updated_at: DateTime<Utc>,
}

impl Record for ChannelConfig {
    const COLLECTION: Collection = Collection::Channels;

    fn record_id(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use chrono::TimeZone;

    fn payment() -> Payment {
        Payment {
            id: "p1".to_string(),
            user_id: "u1".to_string(),
            product_id: "vip".to_string(),
            product_name: "VIP".to_string(),
            amount: 10.0,
            currency: "BRL".to_string(),
            status: PaymentStatus::Approved,
            payment_method: PaymentMethod::Pix,
            date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            qr_code: None,
            pay_url: None,
            expiration_date: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_gateway_status_normalization() {
        assert_eq!(PaymentStatus::from_gateway("approved"), PaymentStatus::Approved);
        assert_eq!(PaymentStatus::from_gateway("in_process"), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::from_gateway("refunded"), PaymentStatus::Cancelled);
        assert_eq!(PaymentStatus::from_gateway("rejected"), PaymentStatus::Rejected);
        assert_eq!(PaymentStatus::from_gateway("something_new"), PaymentStatus::Pending);
    }

    #[test]
    fn test_purchase_json_is_flat_camel_case() {
        let purchase = Purchase::from_payment(payment(), None, Utc::now());
        let value = serde_json::to_value(&purchase).unwrap();
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["status"], "approved");
        assert_eq!(value["delivered"], false);
        assert!(value["expiresAt"].is_null());
        assert!(value.get("payment").is_none());
    }

    #[test]
    fn test_is_due_uses_strict_comparison() {
        let mut purchase = Purchase::from_payment(payment(), None, Utc::now());
        purchase.delivered = true;
        purchase.expires_at = Some(1_000);

        assert!(!purchase.is_due(1_000));
        assert!(purchase.is_due(1_001));
        assert!(!purchase.is_due(999));

        purchase.expires_at = None;
        assert!(!purchase.is_due(i64::MAX));
    }

    #[test]
    fn test_state_follows_flags() {
        let mut purchase = Purchase::from_payment(payment(), None, Utc::now());
        assert_eq!(purchase.state(), PurchaseState::Approved);
        purchase.delivered = true;
        assert_eq!(purchase.state(), PurchaseState::Delivered);
        purchase.expired = true;
        assert_eq!(purchase.state(), PurchaseState::Expired);
        assert!(purchase.awaits_removal());
        purchase.removed = true;
        assert_eq!(purchase.state(), PurchaseState::Removed);
        assert!(!purchase.awaits_removal());
    }

    #[test]
    fn test_legacy_product_json() {
        let json = r#"{
            "id": "vip30",
            "name": "VIP 30 dias",
            "description": "VIP",
            "price": 25.5,
            "time_amount": 30,
            "time_unit": "d"
        }"#;
        let product: Product = serde_json::from_str(json).unwrap();
        assert_eq!(product.time_unit, Some(TimeUnit::Days));
        assert!(!product.infinito);
        assert!(!product.is_permanent());
        assert_eq!(product.duration_label(), "30 d");
        assert_eq!("h".parse::<TimeUnit>().unwrap(), TimeUnit::Hours);
        assert!("weeks".parse::<TimeUnit>().is_err());
    }
}
