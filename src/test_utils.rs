//! Shared test utilities.
//!
//! Helpers for setting up an in-memory database, seeding records with
//! sensible defaults, and in-process fakes for the payment gateway, the game
//! console and the notifier.

#![allow(clippy::unwrap_used)]
#![allow(missing_docs)]

use crate::{
    core::{delivery::DeliveryEngine, product, store},
    errors::{Error, Result},
    models::{IdentityLink, Payment, PaymentMethod, PaymentStatus, Product},
    services::{
        BuyerNotice, Charge, ChargeRequest, ChargeSnapshot, CommandExecutor, Notifier,
        PaymentGateway,
    },
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::DatabaseConnection;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a test product with sensible defaults.
///
/// # Defaults
/// * `name`: "Test Product {id}"
/// * `price`: 10.0
/// * unlimited stock, permanent, no console commands
pub async fn create_test_product(db: &DatabaseConnection, id: &str) -> Result<Product> {
    create_custom_product(db, id, &format!("Test Product {id}"), 10.0).await
}

/// Creates a product with a custom name and price.
pub async fn create_custom_product(
    db: &DatabaseConnection,
    id: &str,
    name: &str,
    price: f64,
) -> Result<Product> {
    product::create_product(
        db,
        product::NewProduct {
            id: id.to_string(),
            name: name.to_string(),
            price,
            ..Default::default()
        },
    )
    .await
}

/// Links a Discord user to a game account.
pub async fn create_test_link(
    db: &DatabaseConnection,
    user_id: &str,
    steam_id: &str,
) -> Result<IdentityLink> {
    let link = IdentityLink {
        user_id: user_id.to_string(),
        steam_id: steam_id.to_string(),
        linked_at: Utc::now(),
        linked_by: user_id.to_string(),
        updated_at: None,
        updated_by: None,
    };
    store::add(db, &link).await?;
    Ok(link)
}

/// Stores a PIX payment of 10.0 BRL with the given status and no metadata.
pub async fn create_test_payment(
    db: &DatabaseConnection,
    id: &str,
    user_id: &str,
    product_id: &str,
    status: PaymentStatus,
) -> Result<Payment> {
    let payment = Payment {
        id: id.to_string(),
        user_id: user_id.to_string(),
        product_id: product_id.to_string(),
        product_name: format!("Test Product {product_id}"),
        amount: 10.0,
        currency: "BRL".to_string(),
        status,
        payment_method: PaymentMethod::Pix,
        date: Utc::now(),
        qr_code: None,
        pay_url: None,
        expiration_date: None,
        metadata: BTreeMap::new(),
    };
    store::add(db, &payment).await?;
    Ok(payment)
}

/// Gateway snapshot saying `charge_id` is approved.
pub fn approved_snapshot(charge_id: &str) -> ChargeSnapshot {
    ChargeSnapshot {
        charge_id: charge_id.to_string(),
        status: PaymentStatus::Approved,
        raw_status: "approved".to_string(),
        external_reference: None,
        amount: Some(10.0),
        approved_at: Some(Utc::now()),
    }
}

/// In-memory payment gateway.
pub struct FakeGateway {
    configured: AtomicBool,
    fail_create: AtomicBool,
    next_id: AtomicUsize,
    charges: Mutex<HashMap<String, ChargeSnapshot>>,
    created: Mutex<Vec<ChargeRequest>>,
    fetched: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            configured: AtomicBool::new(true),
            fail_create: AtomicBool::new(false),
            next_id: AtomicUsize::new(1),
            charges: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn set_configured(&self, configured: bool) {
        self.configured.store(configured, Ordering::SeqCst);
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Makes `fetch_charge` and `search_by_reference` return this snapshot.
    pub fn set_charge(&self, snapshot: ChargeSnapshot) {
        self.charges
            .lock()
            .unwrap()
            .insert(snapshot.charge_id.clone(), snapshot);
    }

    pub fn created(&self) -> Vec<ChargeRequest> {
        self.created.lock().unwrap().clone()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn is_configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
    }

    async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::Gateway {
                message: "status 500: fake failure".to_string(),
            });
        }
        self.created.lock().unwrap().push(request.clone());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (charge_id, qr_code) = match request.method {
            PaymentMethod::Pix => (format!("fake-{n}"), Some(format!("00020126pix{n}"))),
            PaymentMethod::Card => (request.reference.clone(), None),
        };
        Ok(Charge {
            charge_id,
            status: PaymentStatus::Pending,
            amount: request.amount,
            currency: "BRL".to_string(),
            qr_code,
            qr_code_image: None,
            pay_url: Some(format!("https://pay.example.com/{n}")),
            created_at: Utc::now(),
            expires_at: request.expires_at,
        })
    }

    async fn fetch_charge(&self, charge_id: &str) -> Result<ChargeSnapshot> {
        self.fetched.lock().unwrap().push(charge_id.to_string());
        self.charges
            .lock()
            .unwrap()
            .get(charge_id)
            .cloned()
            .ok_or_else(|| Error::Gateway {
                message: format!("status 404: payment {charge_id} not found"),
            })
    }

    async fn search_by_reference(&self, reference: &str) -> Result<Option<ChargeSnapshot>> {
        Ok(self
            .charges
            .lock()
            .unwrap()
            .values()
            .find(|s| s.external_reference.as_deref() == Some(reference))
            .cloned())
    }
}

/// Console executor that records commands and answers "ok".
#[derive(Default)]
pub struct FakeExecutor {
    failing: AtomicBool,
    delay_ms: AtomicU64,
    commands: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes every command take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap(), Ordering::SeqCst);
    }

    /// Commands that were executed successfully.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn execute(&self, command: &str) -> Result<String> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::RemoteExecutor {
                message: "connection refused".to_string(),
            });
        }
        self.commands.lock().unwrap().push(command.to_string());
        Ok("ok".to_string())
    }
}

/// Notifier that keeps everything it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    user_notices: Mutex<Vec<(String, BuyerNotice)>>,
    staff_messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn user_notices(&self) -> Vec<(String, BuyerNotice)> {
        self.user_notices.lock().unwrap().clone()
    }

    pub fn staff_messages(&self) -> Vec<String> {
        self.staff_messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_user(&self, user_id: &str, notice: &BuyerNotice) -> Result<()> {
        self.user_notices
            .lock()
            .unwrap()
            .push((user_id.to_string(), notice.clone()));
        Ok(())
    }

    async fn notify_staff(&self, message: &str) -> Result<()> {
        self.staff_messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// An engine wired to fakes, with handles to inspect them.
pub struct TestEngine {
    pub engine: Arc<DeliveryEngine>,
    pub gateway: Arc<FakeGateway>,
    pub executor: Arc<FakeExecutor>,
    pub notifier: Arc<RecordingNotifier>,
}

/// Builds a [`DeliveryEngine`] over `db` with fake services.
pub fn test_engine(db: &DatabaseConnection) -> TestEngine {
    let gateway = Arc::new(FakeGateway::new());
    let executor = Arc::new(FakeExecutor::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = Arc::new(DeliveryEngine::new(
        db.clone(),
        Arc::clone(&gateway) as Arc<dyn PaymentGateway>,
        Arc::clone(&executor) as Arc<dyn CommandExecutor>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    ));
    TestEngine {
        engine,
        gateway,
        executor,
        notifier,
    }
}
