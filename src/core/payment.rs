//! Payment ledger - charges created at the gateway and their local status.
//!
//! A payment is written once the gateway accepted the charge, always in the
//! `pending` state. Everything after that (approval, purchase creation,
//! delivery) goes through the reconciliation engine in
//! [`crate::core::delivery`].

use crate::{
    core::{product, store},
    errors::{Error, Result},
    models::{Payment, PaymentMethod, PaymentStatus, Product},
    services::{ChargeRequest, PaymentGateway},
};
use chrono::{Duration, Utc};
use sea_orm::{ConnectionTrait, TransactionTrait};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Metadata key holding the buyer's Discord username
pub const META_USERNAME: &str = "username";
/// Metadata key holding the gateway payment id of a card checkout
pub const META_GATEWAY_ID: &str = "gatewayPaymentId";
/// Metadata key holding the payer e-mail
pub const META_EMAIL: &str = "email";

/// Who is buying
#[derive(Debug, Clone)]
pub struct Buyer {
    /// Discord user id
    pub user_id: String,
    /// Discord username, used for `{username}` in console commands
    pub username: String,
    /// E-mail sent to the gateway
    pub email: Option<String>,
}

/// Charge settings that come from configuration
#[derive(Debug, Clone)]
pub struct ChargeOptions {
    /// Minutes until an unpaid charge expires
    pub expiration_minutes: i64,
    /// Payer e-mail used when the buyer gave none
    pub default_payer_email: String,
}

/// A created payment together with the data the buyer needs to pay
#[derive(Debug, Clone)]
pub struct ChargeReceipt {
    /// The stored payment
    pub payment: Payment,
    /// PIX QR code as base64 PNG
    pub qr_code_image: Option<String>,
}

fn new_reference(user_id: &str) -> String {
    format!("{user_id}-{}", Utc::now().timestamp_millis())
}

/// Creates a charge at the gateway and records it as a pending payment.
///
/// # Errors
/// - the gateway is not configured
/// - the product is out of stock
/// - the product price is zero or negative
/// - the gateway rejects the request
#[instrument(skip(db, gateway, product, options), fields(product_id = %product.id, user_id = %buyer.user_id))]
pub async fn create_charge<C: ConnectionTrait>(
    db: &C,
    gateway: &dyn PaymentGateway,
    product: &Product,
    buyer: &Buyer,
    method: PaymentMethod,
    options: &ChargeOptions,
) -> Result<ChargeReceipt> {
    if !gateway.is_configured() {
        return Err(Error::Config {
            message: "Mercado Pago access token is not configured".to_string(),
        });
    }
    product::ensure_in_stock(product)?;
    if !product.price.is_finite() || product.price <= 0.0 {
        return Err(Error::InvalidAmount {
            amount: product.price,
        });
    }

    let payer_email = buyer
        .email
        .clone()
        .filter(|e| e.contains('@'))
        .unwrap_or_else(|| options.default_payer_email.clone());
    let expires_at = Utc::now() + Duration::minutes(options.expiration_minutes.max(1));
    let request = ChargeRequest {
        reference: new_reference(&buyer.user_id),
        amount: product.price,
        description: product.name.clone(),
        product_id: product.id.clone(),
        method,
        payer_email: payer_email.clone(),
        payer_name: Some(buyer.username.clone()),
        expires_at: Some(expires_at),
    };
    let charge = gateway.create_charge(&request).await?;

    let mut metadata = BTreeMap::new();
    metadata.insert(META_USERNAME.to_string(), buyer.username.clone());
    metadata.insert(META_EMAIL.to_string(), payer_email);

    let payment = Payment {
        id: charge.charge_id,
        user_id: buyer.user_id.clone(),
        product_id: product.id.clone(),
        product_name: product.name.clone(),
        amount: charge.amount,
        currency: charge.currency,
        status: PaymentStatus::Pending,
        payment_method: method,
        date: charge.created_at,
        qr_code: charge.qr_code,
        pay_url: charge.pay_url,
        expiration_date: charge.expires_at,
        metadata,
    };
    store::add(db, &payment).await?;

    info!(payment_id = %payment.id, amount = payment.amount, "Payment created");
    Ok(ChargeReceipt {
        payment,
        qr_code_image: charge.qr_code_image,
    })
}

/// Finds a payment by id.
pub async fn get_payment<C: ConnectionTrait>(db: &C, id: &str) -> Result<Option<Payment>> {
    store::get(db, id).await
}

/// Finds a payment by id, failing with [`Error::PaymentNotFound`].
pub async fn require_payment<C: ConnectionTrait>(db: &C, id: &str) -> Result<Payment> {
    get_payment(db, id)
        .await?
        .ok_or_else(|| Error::PaymentNotFound { id: id.to_string() })
}

/// All payments, most recent first.
pub async fn list_payments<C: ConnectionTrait>(db: &C) -> Result<Vec<Payment>> {
    let mut payments: Vec<Payment> = store::find(db, |_: &Payment| true).await?;
    payments.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(payments)
}

/// Payments of one user, most recent first.
pub async fn list_user_payments<C: ConnectionTrait>(db: &C, user_id: &str) -> Result<Vec<Payment>> {
    let mut payments: Vec<Payment> = store::find(db, |p: &Payment| p.user_id == user_id).await?;
    payments.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(payments)
}

/// Pending payments, oldest first.
pub async fn list_pending_payments<C: ConnectionTrait>(db: &C) -> Result<Vec<Payment>> {
    let mut payments: Vec<Payment> =
        store::find(db, |p: &Payment| p.status == PaymentStatus::Pending).await?;
    payments.sort_by(|a, b| a.date.cmp(&b.date));
    Ok(payments)
}

/// Sets the status of a payment.
pub async fn update_status<C: ConnectionTrait + TransactionTrait>(
    db: &C,
    id: &str,
    status: PaymentStatus,
) -> Result<Payment> {
    store::update::<Payment, _, _>(db, id, |p| p.status = status)
        .await?
        .ok_or_else(|| Error::PaymentNotFound { id: id.to_string() })
}

/// Backs up and deletes every payment. Purchases are kept.
pub async fn clear_payments<C: ConnectionTrait + TransactionTrait>(
    db: &C,
    backup_dir: &Path,
) -> Result<PathBuf> {
    store::clear::<Payment, _>(db, backup_dir).await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::test_utils::*;

    fn buyer() -> Buyer {
        Buyer {
            user_id: "user1".to_string(),
            username: "alice".to_string(),
            email: None,
        }
    }

    fn options() -> ChargeOptions {
        ChargeOptions {
            expiration_minutes: 30,
            default_payer_email: "buyer@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_charge_stores_pending_payment() -> Result<()> {
        let db = setup_test_db().await?;
        let gateway = FakeGateway::new();
        let product = create_test_product(&db, "vip").await?;

        let created =
            create_charge(&db, &gateway, &product, &buyer(), PaymentMethod::Pix, &options()).await?;
        let payment = created.payment;
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.amount, 10.0);
        assert_eq!(payment.metadata.get(META_USERNAME).unwrap(), "alice");
        assert_eq!(payment.metadata.get(META_EMAIL).unwrap(), "buyer@example.com");
        assert!(payment.qr_code.is_some());

        let stored = require_payment(&db, &payment.id).await?;
        assert_eq!(stored, payment);
        assert_eq!(gateway.created().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_charge_does_not_touch_stock() -> Result<()> {
        let db = setup_test_db().await?;
        let gateway = FakeGateway::new();
        let mut product = create_test_product(&db, "vip").await?;
        product.stock = Some(2);
        store::add(&db, &product).await?;

        create_charge(&db, &gateway, &product, &buyer(), PaymentMethod::Pix, &options()).await?;
        let stored = product::require_product(&db, "vip").await?;
        assert_eq!(stored.stock, Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_charge_rejects_out_of_stock() -> Result<()> {
        let db = setup_test_db().await?;
        let gateway = FakeGateway::new();
        let mut product = create_test_product(&db, "vip").await?;
        product.stock = Some(0);

        let result =
            create_charge(&db, &gateway, &product, &buyer(), PaymentMethod::Pix, &options()).await;
        assert!(matches!(result, Err(Error::OutOfStock { .. })));
        assert!(gateway.created().is_empty());
        assert!(list_payments(&db).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_gateway_failure_stores_nothing() -> Result<()> {
        let db = setup_test_db().await?;
        let gateway = FakeGateway::new();
        gateway.fail_create(true);
        let product = create_test_product(&db, "vip").await?;

        let result =
            create_charge(&db, &gateway, &product, &buyer(), PaymentMethod::Card, &options()).await;
        assert!(matches!(result, Err(Error::Gateway { .. })));
        assert!(list_payments(&db).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_unconfigured_gateway_fails_fast() -> Result<()> {
        let db = setup_test_db().await?;
        let gateway = FakeGateway::new();
        gateway.set_configured(false);
        let product = create_test_product(&db, "vip").await?;

        let result =
            create_charge(&db, &gateway, &product, &buyer(), PaymentMethod::Pix, &options()).await;
        assert!(matches!(result, Err(Error::Config { .. })));
        assert!(gateway.created().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_listing_and_status_updates() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_payment(&db, "p1", "user1", "vip", PaymentStatus::Pending).await?;
        create_test_payment(&db, "p2", "user2", "vip", PaymentStatus::Pending).await?;
        create_test_payment(&db, "p3", "user1", "vip", PaymentStatus::Approved).await?;

        assert_eq!(list_payments(&db).await?.len(), 3);
        assert_eq!(list_user_payments(&db, "user1").await?.len(), 2);
        assert_eq!(list_pending_payments(&db).await?.len(), 2);

        let updated = update_status(&db, "p1", PaymentStatus::Expired).await?;
        assert_eq!(updated.status, PaymentStatus::Expired);
        assert_eq!(list_pending_payments(&db).await?.len(), 1);

        let missing = update_status(&db, "nope", PaymentStatus::Expired).await;
        assert!(matches!(missing, Err(Error::PaymentNotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_payments_keeps_backup() -> Result<()> {
        let db = setup_test_db().await?;
        let dir = tempfile::tempdir()?;
        create_test_payment(&db, "p1", "user1", "vip", PaymentStatus::Pending).await?;

        let path = clear_payments(&db, dir.path()).await?;
        assert!(path.exists());
        assert!(list_payments(&db).await?.is_empty());
        Ok(())
    }
}
