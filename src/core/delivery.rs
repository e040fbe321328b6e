//! Reconciliation engine - drives a purchase from approval to removal.
//!
//! Lifecycle of a purchase:
//!
//! ```text
//! approved --deliver--> delivered --sweep--> expired --remove--> removed
//! ```
//!
//! Flags only ever move forward. Every entry point (webhook, poll, command,
//! scheduled sweep) goes through [`DeliveryEngine`], so an approval observed
//! twice still produces a single purchase and a purchase is never delivered
//! or removed by two tasks at once.

use crate::{
    core::{link, payment, product, store},
    errors::{Error, Result},
    models::{Payment, PaymentMethod, PaymentStatus, Product, Purchase},
    services::{BuyerNotice, ChargeSnapshot, CommandExecutor, Notifier, PaymentGateway},
};
use chrono::{DateTime, TimeZone, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, instrument, warn};

/// Result of feeding a gateway status into the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// First approval: the purchase was created
    Created {
        /// Local payment id
        payment_id: String,
    },
    /// Approval seen before, nothing new was written
    AlreadyRecorded {
        /// Local payment id
        payment_id: String,
    },
    /// Non-approved gateway status stored on the local payment
    StatusUpdated {
        /// Local payment id
        payment_id: String,
        /// New status
        status: PaymentStatus,
    },
    /// Nothing to do
    Unchanged {
        /// Local payment id
        payment_id: String,
    },
}

impl ApprovalOutcome {
    /// Local payment id the outcome refers to
    #[must_use]
    pub fn payment_id(&self) -> &str {
        match self {
            Self::Created { payment_id }
            | Self::AlreadyRecorded { payment_id }
            | Self::StatusUpdated { payment_id, .. }
            | Self::Unchanged { payment_id } => payment_id,
        }
    }
}

/// Result of a delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The product was handed over
    Delivered {
        /// Expiry in epoch milliseconds, `None` for permanent grants
        expires_at: Option<i64>,
        /// Console response, `None` when the product has no delivery command
        response: Option<String>,
    },
    /// Delivered earlier
    AlreadyDelivered,
    /// Another task is delivering this purchase right now
    InProgress,
}

/// Result of a removal attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The removal ran and the purchase is terminal
    Removed {
        /// Console response, `None` when there was no removal command
        response: Option<String>,
    },
    /// Removed earlier
    AlreadyRemoved,
    /// Not expired yet
    NotExpired,
    /// Another task is removing this purchase right now
    InProgress,
}

/// What an expiry cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Purchases flagged as expired
    pub expired: Vec<String>,
    /// Purchases whose removal succeeded
    pub removed: Vec<String>,
    /// Purchases whose removal failed and will be retried
    pub failed: Vec<String>,
}

/// What a pending payment poll did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentPollReport {
    /// Payments asked at the gateway
    pub checked: usize,
    /// Payments that became approved
    pub approved: Vec<String>,
    /// Payments marked expired locally
    pub expired: Vec<String>,
}

/// Values substituted into console command templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    /// `{steamid}`
    pub steam_id: String,
    /// `{username}`
    pub username: String,
    /// `{product}`
    pub product: String,
    /// `{quantity}`
    pub quantity: u32,
}

impl CommandContext {
    fn new(steam_id: &str, payment: &Payment, product: Option<&Product>) -> Self {
        Self {
            steam_id: steam_id.to_string(),
            username: payment
                .metadata
                .get(payment::META_USERNAME)
                .cloned()
                .unwrap_or_else(|| payment.user_id.clone()),
            product: product.map_or_else(|| payment.product_name.clone(), |p| p.name.clone()),
            quantity: product.and_then(|p| p.quantity).unwrap_or(1),
        }
    }
}

/// Fills `{steamid}`, `{username}`, `{product}` and `{quantity}` in a template.
#[must_use]
pub fn render_command(template: &str, ctx: &CommandContext) -> String {
    template
        .replace("{steamid}", &ctx.steam_id)
        .replace("{username}", &ctx.username)
        .replace("{product}", &ctx.product)
        .replace("{quantity}", &ctx.quantity.to_string())
        .trim()
        .to_string()
}

/// Expiry instant of a delivery made at `delivered_at`, in epoch milliseconds.
///
/// `None` for permanent products and products without a complete duration.
#[must_use]
pub fn compute_expiry(product: &Product, delivered_at: DateTime<Utc>) -> Option<i64> {
    if product.infinito {
        return None;
    }
    let (amount, unit) = (product.time_amount?, product.time_unit?);
    i64::from(amount)
        .checked_mul(unit.millis())
        .and_then(|span| delivered_at.timestamp_millis().checked_add(span))
}

/// Converts an epoch-millisecond expiry for display.
#[must_use]
pub fn expiry_datetime(expires_at: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(expires_at).single()
}

fn non_empty(template: Option<&str>) -> Option<&str> {
    template.map(str::trim).filter(|t| !t.is_empty())
}

/// Whether a non-approved gateway status replaces the local one.
///
/// `delivered_manually` is an administrator decision and is never replaced.
/// A `pending` report never downgrades a settled payment.
fn status_may_change(local: PaymentStatus, reported: PaymentStatus) -> bool {
    local != reported
        && local != PaymentStatus::DeliveredManually
        && reported != PaymentStatus::Pending
}

/// Purchases, optionally of one user, most recently approved first.
pub async fn list_purchases<C: ConnectionTrait>(db: &C, user_id: Option<&str>) -> Result<Vec<Purchase>> {
    let mut purchases: Vec<Purchase> = store::find(db, |p: &Purchase| {
        user_id.is_none_or(|u| p.payment.user_id == u)
    })
    .await?;
    purchases.sort_by(|a, b| b.approved_at.cmp(&a.approved_at));
    Ok(purchases)
}

/// Marks a purchase id as being worked on; released on drop.
struct Claim<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Owns every transition of the purchase lifecycle
pub struct DeliveryEngine {
    db: DatabaseConnection,
    gateway: Arc<dyn PaymentGateway>,
    executor: Arc<dyn CommandExecutor>,
    notifier: Arc<dyn Notifier>,
    in_flight: Mutex<HashSet<String>>,
}

impl DeliveryEngine {
    /// Creates an engine over the given store and services
    #[must_use]
    pub fn new(
        db: DatabaseConnection,
        gateway: Arc<dyn PaymentGateway>,
        executor: Arc<dyn CommandExecutor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            gateway,
            executor,
            notifier,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Database the engine works on
    #[must_use]
    pub const fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Payment gateway
    #[must_use]
    pub fn gateway(&self) -> &dyn PaymentGateway {
        self.gateway.as_ref()
    }

    /// Console executor
    #[must_use]
    pub fn executor(&self) -> &dyn CommandExecutor {
        self.executor.as_ref()
    }

    /// Notifier
    #[must_use]
    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    fn claim(&self, id: &str) -> Option<Claim<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(id.to_string()) {
            return None;
        }
        Some(Claim {
            set: &self.in_flight,
            id: id.to_string(),
        })
    }

    async fn notify_user(&self, user_id: &str, notice: BuyerNotice) {
        if let Err(e) = self.notifier.notify_user(user_id, &notice).await {
            warn!(user_id, "Could not notify buyer: {}", e);
        }
    }

    async fn notify_staff(&self, message: String) {
        if let Err(e) = self.notifier.notify_staff(&message).await {
            warn!("Could not post staff notice: {}", e);
        }
    }

    /// Creates the purchase of `payment` unless it exists. Stock is reserved
    /// only by the call that inserted it. Returns the new purchase.
    async fn record_purchase(
        &self,
        payment: Payment,
        approved_at: DateTime<Utc>,
    ) -> Result<Option<Purchase>> {
        let product = product::get_product(&self.db, &payment.product_id).await?;
        let purchase = Purchase::from_payment(payment, product.as_ref(), approved_at);
        if !store::insert_if_absent(&self.db, &purchase).await? {
            return Ok(None);
        }
        if product.is_some() {
            product::reserve_stock(&self.db, &purchase.payment.product_id).await?;
        }
        Ok(Some(purchase))
    }

    async fn find_local_payment(&self, snapshot: &ChargeSnapshot) -> Result<Option<Payment>> {
        if let Some(payment) = payment::get_payment(&self.db, &snapshot.charge_id).await? {
            return Ok(Some(payment));
        }
        if let Some(reference) = snapshot.external_reference.as_deref() {
            if let Some(payment) = payment::get_payment(&self.db, reference).await? {
                return Ok(Some(payment));
            }
        }
        let charge_id = snapshot.charge_id.as_str();
        store::find_one(&self.db, |p: &Payment| {
            p.metadata.get(payment::META_GATEWAY_ID).map(String::as_str) == Some(charge_id)
        })
        .await
    }

    /// Applies an authoritative gateway status to the local payment.
    ///
    /// Approval creates the purchase. The insert is conditional, so
    /// concurrent or repeated approvals of the same payment create one
    /// purchase and reserve stock once. Later non-approved statuses are
    /// stored, except over `delivered_manually`.
    #[instrument(skip(self, snapshot), fields(charge_id = %snapshot.charge_id, status = %snapshot.status))]
    pub async fn mark_approved(&self, snapshot: &ChargeSnapshot) -> Result<ApprovalOutcome> {
        let local = self
            .find_local_payment(snapshot)
            .await?
            .ok_or_else(|| Error::PaymentNotFound {
                id: snapshot.charge_id.clone(),
            })?;
        let payment_id = local.id.clone();

        if snapshot.status != PaymentStatus::Approved {
            if !status_may_change(local.status, snapshot.status) {
                return Ok(ApprovalOutcome::Unchanged { payment_id });
            }
            payment::update_status(&self.db, &payment_id, snapshot.status).await?;
            info!(payment_id = %payment_id, previous = %local.status, "Payment is now {}", snapshot.status);
            if local.status == PaymentStatus::Approved {
                self.notify_staff(format!(
                    "⚠️ Payment `{payment_id}` of <@{}> went from approved to **{}** at the gateway",
                    local.user_id, snapshot.status
                ))
                .await;
            }
            return Ok(ApprovalOutcome::StatusUpdated {
                payment_id,
                status: snapshot.status,
            });
        }

        let gateway_id = (local.payment_method == PaymentMethod::Card
            && snapshot.charge_id != payment_id)
            .then(|| snapshot.charge_id.clone());
        let updated = store::update::<Payment, _, _>(&self.db, &payment_id, |p| {
            if p.status != PaymentStatus::DeliveredManually {
                p.status = PaymentStatus::Approved;
            }
            if let Some(id) = gateway_id {
                p.metadata.insert(payment::META_GATEWAY_ID.to_string(), id);
            }
        })
        .await?
        .ok_or_else(|| Error::PaymentNotFound {
            id: payment_id.clone(),
        })?;

        let approved_at = snapshot.approved_at.unwrap_or_else(Utc::now);
        let Some(purchase) = self.record_purchase(updated, approved_at).await? else {
            debug!(payment_id = %payment_id, "Approval already recorded");
            return Ok(ApprovalOutcome::AlreadyRecorded { payment_id });
        };
        info!(payment_id = %payment_id, user_id = %purchase.payment.user_id, "Payment approved");
        self.notify_user(
            &purchase.payment.user_id,
            BuyerNotice::PaymentApproved {
                payment_id: payment_id.clone(),
                product_name: purchase.payment.product_name.clone(),
            },
        )
        .await;
        self.notify_staff(format!(
            "💰 Payment `{payment_id}` approved: **{}** for <@{}> (R$ {:.2})",
            purchase.payment.product_name, purchase.payment.user_id, purchase.payment.amount
        ))
        .await;

        Ok(ApprovalOutcome::Created { payment_id })
    }

    /// Records a gateway status and, when approved, tries to deliver right away.
    ///
    /// Delivery failures are logged; the purchase stays approved and the
    /// delivery retry sweep picks it up later.
    pub async fn handle_charge_update(&self, snapshot: &ChargeSnapshot) -> Result<ApprovalOutcome> {
        let outcome = self.mark_approved(snapshot).await?;
        if matches!(
            outcome,
            ApprovalOutcome::Created { .. } | ApprovalOutcome::AlreadyRecorded { .. }
        ) {
            match self.deliver_product(outcome.payment_id()).await {
                Ok(result) => debug!(payment_id = %outcome.payment_id(), ?result, "Delivery attempted"),
                Err(Error::NotLinked { user_id }) => info!(
                    payment_id = %outcome.payment_id(),
                    user_id = %user_id,
                    "Delivery waits for the buyer to link an account"
                ),
                Err(e) => warn!(payment_id = %outcome.payment_id(), "Delivery failed: {}", e),
            }
        }
        Ok(outcome)
    }

    /// Asks the gateway for the current status of a payment and applies it.
    ///
    /// Card checkouts are looked up by reference until the gateway payment id
    /// is known.
    #[instrument(skip(self))]
    pub async fn sync_payment_status(&self, charge_id: &str) -> Result<ApprovalOutcome> {
        if !self.gateway.is_configured() {
            return Err(Error::Config {
                message: "Mercado Pago access token is not configured".to_string(),
            });
        }

        let local = payment::get_payment(&self.db, charge_id).await?;
        let snapshot = match &local {
            Some(p) if p.payment_method == PaymentMethod::Card => {
                match p.metadata.get(payment::META_GATEWAY_ID) {
                    Some(gateway_id) => Some(self.gateway.fetch_charge(gateway_id).await?),
                    None => self.gateway.search_by_reference(&p.id).await?,
                }
            }
            _ => Some(self.gateway.fetch_charge(charge_id).await?),
        };

        match snapshot {
            Some(snapshot) => self.handle_charge_update(&snapshot).await,
            None => Ok(ApprovalOutcome::Unchanged {
                payment_id: charge_id.to_string(),
            }),
        }
    }

    /// Runs the delivery command for an approved purchase.
    ///
    /// # Errors
    /// - the payment is neither approved nor manually delivered
    /// - the buyer has no linked game account (no command runs)
    /// - the product no longer exists
    /// - the console command fails (nothing is recorded, the sweep retries)
    #[instrument(skip(self))]
    pub async fn deliver_product(&self, payment_id: &str) -> Result<DeliveryOutcome> {
        self.deliver(payment_id, None).await
    }

    /// Delivers regardless of the payment status.
    ///
    /// A payment that is not approved is marked `delivered_manually` once the
    /// delivery succeeded. A failed forced delivery changes nothing.
    #[instrument(skip(self))]
    pub async fn force_delivery(&self, payment_id: &str, actor: &str) -> Result<DeliveryOutcome> {
        self.deliver(payment_id, Some(actor)).await
    }

    async fn deliver(&self, payment_id: &str, forced_by: Option<&str>) -> Result<DeliveryOutcome> {
        let Some(_claim) = self.claim(payment_id) else {
            debug!("Delivery already in progress");
            return Ok(DeliveryOutcome::InProgress);
        };

        let current = payment::get_payment(&self.db, payment_id).await?;
        let existing = store::get::<Purchase, _>(&self.db, payment_id).await?;
        let status = match (&current, &existing) {
            (Some(p), _) => p.status,
            (None, Some(p)) => p.payment.status,
            (None, None) => {
                return Err(Error::PaymentNotFound {
                    id: payment_id.to_string(),
                });
            }
        };
        let paid = matches!(
            status,
            PaymentStatus::Approved | PaymentStatus::DeliveredManually
        );
        if !paid && forced_by.is_none() {
            return Err(Error::InvalidTransition {
                payment_id: payment_id.to_string(),
                reason: format!("payment is {status}"),
            });
        }

        // A paid payment gets its purchase right away so the retry sweep sees
        // it. A forced one is only recorded after the command succeeded.
        let purchase = match (existing, current) {
            (Some(purchase), _) => purchase,
            (None, Some(payment)) if paid => {
                self.record_purchase(payment, Utc::now()).await?;
                store::get::<Purchase, _>(&self.db, payment_id)
                    .await?
                    .ok_or_else(|| Error::PurchaseNotFound {
                        id: payment_id.to_string(),
                    })?
            }
            (None, Some(payment)) => Purchase::from_payment(payment, None, Utc::now()),
            (None, None) => {
                return Err(Error::PaymentNotFound {
                    id: payment_id.to_string(),
                });
            }
        };
        if purchase.delivered {
            return Ok(DeliveryOutcome::AlreadyDelivered);
        }

        let user_id = purchase.payment.user_id.clone();
        let link = link::get_link(&self.db, &user_id)
            .await?
            .ok_or_else(|| Error::NotLinked {
                user_id: user_id.clone(),
            })?;
        let product = product::require_product(&self.db, &purchase.payment.product_id).await?;

        let response = match non_empty(product.delivery_command.as_deref()) {
            Some(template) => {
                let ctx = CommandContext::new(&link.steam_id, &purchase.payment, Some(&product));
                let command = render_command(template, &ctx);
                info!(command = %command, "Running delivery command");
                Some(self.executor.execute(&command).await?)
            }
            None => {
                warn!(product_id = %product.id, "Product has no delivery command");
                None
            }
        };

        if let Some(actor) = forced_by.filter(|_| status != PaymentStatus::Approved) {
            let actor = actor.to_string();
            let marked = store::update::<Payment, _, _>(&self.db, payment_id, |p| {
                p.status = PaymentStatus::DeliveredManually;
                p.metadata.insert("forcedBy".to_string(), actor);
            })
            .await?;
            info!(previous = %status, "Payment marked as manually delivered");
            if let Some(payment) = marked {
                self.record_purchase(payment, Utc::now()).await?;
            }
        }

        let delivered_at = Utc::now();
        let expires_at = compute_expiry(&product, delivered_at);
        let removal_command = purchase
            .removal_command
            .clone()
            .or_else(|| product.removal_command.clone());
        let steam_id = link.steam_id.clone();
        store::update::<Purchase, _, _>(&self.db, payment_id, |p| {
            p.delivered = true;
            p.delivered_at = Some(delivered_at);
            p.delivered_to = Some(steam_id);
            p.expires_at = expires_at;
            p.removal_command = removal_command;
        })
        .await?
        .ok_or_else(|| Error::PurchaseNotFound {
            id: payment_id.to_string(),
        })?;

        info!(user_id = %user_id, steam_id = %link.steam_id, ?expires_at, "Product delivered");
        self.notify_user(
            &user_id,
            BuyerNotice::Delivered {
                payment_id: payment_id.to_string(),
                product_name: product.name.clone(),
                expires_at: expires_at.and_then(expiry_datetime),
            },
        )
        .await;
        self.notify_staff(format!(
            "📦 Delivered **{}** to <@{user_id}> (`{}`), payment `{payment_id}`",
            product.name, link.steam_id
        ))
        .await;

        Ok(DeliveryOutcome::Delivered {
            expires_at,
            response,
        })
    }

    /// Flags a delivered purchase as expired right now.
    ///
    /// # Errors
    /// Fails when the purchase was never delivered or is already removed.
    #[instrument(skip(self))]
    pub async fn force_expire(&self, payment_id: &str, now: DateTime<Utc>) -> Result<Purchase> {
        let purchase = store::get::<Purchase, _>(&self.db, payment_id)
            .await?
            .ok_or_else(|| Error::PurchaseNotFound {
                id: payment_id.to_string(),
            })?;
        if !purchase.delivered {
            return Err(Error::InvalidTransition {
                payment_id: payment_id.to_string(),
                reason: "it was not delivered yet".to_string(),
            });
        }
        if purchase.removed {
            return Err(Error::InvalidTransition {
                payment_id: payment_id.to_string(),
                reason: "it was already removed".to_string(),
            });
        }
        if purchase.expired {
            return Ok(purchase);
        }

        let now_ms = now.timestamp_millis();
        let expired = store::update::<Purchase, _, _>(&self.db, payment_id, |p| {
            p.expires_at = Some(now_ms - 1);
            p.expired = true;
            p.expired_at = Some(now);
        })
        .await?
        .ok_or_else(|| Error::PurchaseNotFound {
            id: payment_id.to_string(),
        })?;
        info!("Purchase expired by an administrator");
        Ok(expired)
    }

    /// Expires the purchase if needed, then runs its removal immediately.
    pub async fn force_removal(&self, payment_id: &str, now: DateTime<Utc>) -> Result<RemovalOutcome> {
        self.force_expire(payment_id, now).await?;
        self.process_expired_product(payment_id).await
    }

    /// Runs the removal command of an expired purchase.
    ///
    /// On failure the purchase stays expired and not removed, so the next
    /// removal sweep retries it.
    #[instrument(skip(self))]
    pub async fn process_expired_product(&self, payment_id: &str) -> Result<RemovalOutcome> {
        let Some(_claim) = self.claim(payment_id) else {
            return Ok(RemovalOutcome::InProgress);
        };

        let purchase = store::get::<Purchase, _>(&self.db, payment_id)
            .await?
            .ok_or_else(|| Error::PurchaseNotFound {
                id: payment_id.to_string(),
            })?;
        if purchase.removed {
            return Ok(RemovalOutcome::AlreadyRemoved);
        }
        if !purchase.expired {
            return Ok(RemovalOutcome::NotExpired);
        }

        let product = product::get_product(&self.db, &purchase.payment.product_id).await?;
        let template = purchase
            .removal_command
            .clone()
            .or_else(|| product.as_ref().and_then(|p| p.removal_command.clone()));

        let response = match non_empty(template.as_deref()) {
            Some(template) => {
                let steam_id = match purchase.delivered_to.clone() {
                    Some(steam_id) => steam_id,
                    None => link::get_link(&self.db, &purchase.payment.user_id)
                        .await?
                        .map(|l| l.steam_id)
                        .ok_or_else(|| Error::NotLinked {
                            user_id: purchase.payment.user_id.clone(),
                        })?,
                };
                let ctx = CommandContext::new(&steam_id, &purchase.payment, product.as_ref());
                let command = render_command(template, &ctx);
                info!(command = %command, "Running removal command");
                Some(self.executor.execute(&command).await?)
            }
            None => {
                debug!("No removal command, marking as removed");
                None
            }
        };

        let removed_at = Utc::now();
        store::update::<Purchase, _, _>(&self.db, payment_id, |p| {
            p.removed = true;
            p.removed_at = Some(removed_at);
        })
        .await?;

        info!(user_id = %purchase.payment.user_id, "Expired product removed");
        self.notify_staff(format!(
            "🗑️ Removed expired **{}** from <@{}>, payment `{payment_id}`",
            purchase.payment.product_name, purchase.payment.user_id
        ))
        .await;
        Ok(RemovalOutcome::Removed { response })
    }

    /// Flags every delivered purchase whose expiry lies strictly before `now`.
    ///
    /// Returns the ids flagged by this call.
    pub async fn check_expired_products_at(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let now_ms = now.timestamp_millis();
        let due: Vec<Purchase> = store::find(&self.db, |p: &Purchase| p.is_due(now_ms)).await?;

        let mut flagged_ids = Vec::new();
        for purchase in due {
            let mut flagged = false;
            let result = store::update::<Purchase, _, _>(&self.db, purchase.id(), |p| {
                if p.is_due(now_ms) {
                    p.expired = true;
                    p.expired_at = Some(now);
                    flagged = true;
                }
            })
            .await;
            match result {
                Ok(_) if flagged => {
                    info!(payment_id = %purchase.id(), "Purchase expired");
                    self.notify_user(
                        &purchase.payment.user_id,
                        BuyerNotice::Expired {
                            payment_id: purchase.id().to_string(),
                            product_name: purchase.payment.product_name.clone(),
                        },
                    )
                    .await;
                    flagged_ids.push(purchase.id().to_string());
                }
                Ok(_) => {}
                Err(e) => error!(payment_id = %purchase.id(), "Could not flag purchase as expired: {}", e),
            }
        }
        Ok(flagged_ids)
    }

    /// Flags expired purchases using the current time.
    pub async fn check_expired_products(&self) -> Result<Vec<String>> {
        self.check_expired_products_at(Utc::now()).await
    }

    /// Runs the removal of every expired, not yet removed purchase.
    ///
    /// Failures are logged and reported, never raised.
    pub async fn check_expired_products_for_removal(&self) -> Result<SweepReport> {
        let pending: Vec<Purchase> = store::find(&self.db, Purchase::awaits_removal).await?;

        let mut report = SweepReport::default();
        for purchase in pending {
            match self.process_expired_product(purchase.id()).await {
                Ok(RemovalOutcome::Removed { .. }) => report.removed.push(purchase.id().to_string()),
                Ok(other) => debug!(payment_id = %purchase.id(), ?other, "Removal skipped"),
                Err(e) => {
                    error!(payment_id = %purchase.id(), "Removal failed, will retry: {}", e);
                    report.failed.push(purchase.id().to_string());
                }
            }
        }
        Ok(report)
    }

    /// Expiry sweep followed by removal sweep.
    pub async fn run_expiry_cycle(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let expired = self.check_expired_products_at(now).await?;
        let mut report = self.check_expired_products_for_removal().await?;
        report.expired = expired;
        if !report.expired.is_empty() || !report.removed.is_empty() || !report.failed.is_empty() {
            info!(
                expired = report.expired.len(),
                removed = report.removed.len(),
                failed = report.failed.len(),
                "Expiry cycle finished"
            );
        }
        Ok(report)
    }

    /// Retries delivery of approved purchases that were not delivered yet.
    ///
    /// Returns the ids delivered by this call.
    pub async fn check_pending_deliveries(&self) -> Result<Vec<String>> {
        let waiting: Vec<Purchase> = store::find(&self.db, |p: &Purchase| {
            !p.delivered && !p.expired && !p.removed
        })
        .await?;

        let mut delivered = Vec::new();
        for purchase in waiting {
            match self.deliver_product(purchase.id()).await {
                Ok(DeliveryOutcome::Delivered { .. }) => delivered.push(purchase.id().to_string()),
                Ok(_) => {}
                Err(Error::NotLinked { .. }) => {
                    debug!(payment_id = %purchase.id(), "Still waiting for an account link");
                }
                Err(Error::InvalidTransition { reason, .. }) => {
                    debug!(payment_id = %purchase.id(), "Not retrying delivery: {}", reason);
                }
                Err(e) => warn!(payment_id = %purchase.id(), "Delivery retry failed: {}", e),
            }
        }
        Ok(delivered)
    }

    /// Polls the gateway for pending payments.
    ///
    /// Payments past their expiration date are marked expired without asking
    /// the gateway. Does nothing when the gateway is not configured.
    pub async fn check_pending_payments(&self, now: DateTime<Utc>) -> Result<PaymentPollReport> {
        let mut report = PaymentPollReport::default();
        if !self.gateway.is_configured() {
            debug!("Gateway not configured, skipping payment poll");
            return Ok(report);
        }

        for pending in payment::list_pending_payments(&self.db).await? {
            if pending.expiration_date.is_some_and(|at| at < now) {
                match payment::update_status(&self.db, &pending.id, PaymentStatus::Expired).await {
                    Ok(_) => {
                        info!(payment_id = %pending.id, "Unpaid charge expired");
                        report.expired.push(pending.id);
                    }
                    Err(e) => error!(payment_id = %pending.id, "Could not expire payment: {}", e),
                }
                continue;
            }

            report.checked += 1;
            match self.sync_payment_status(&pending.id).await {
                Ok(ApprovalOutcome::Created { payment_id }) => report.approved.push(payment_id),
                Ok(_) => {}
                Err(e) => warn!(payment_id = %pending.id, "Payment poll failed: {}", e),
            }
        }
        Ok(report)
    }
}
