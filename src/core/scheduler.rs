//! Background jobs - periodic sweeps driven by the delivery engine.
//!
//! Each job runs on its own interval. A tick that starts always runs to
//! completion; shutdown is only observed between ticks. Ticks missed while a
//! run was still busy are skipped rather than queued.

use crate::{
    config::app::SchedulerConfig,
    core::{delivery::DeliveryEngine, product},
    errors::Result,
};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

async fn run_every<F, Fut>(name: &'static str, period: Duration, mut shutdown: watch::Receiver<bool>, mut job: F)
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(job = name, period_secs = period.as_secs(), "Background job started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = job().await {
                    error!(job = name, "Background job failed: {}", e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!(job = name, "Background job stopped");
}

/// Reports products at or below the stock threshold to staff.
pub async fn report_low_stock(engine: &DeliveryEngine, threshold: u32) -> Result<usize> {
    let low = product::check_low_stock(engine.db(), threshold).await?;
    if low.is_empty() {
        return Ok(0);
    }
    let lines: Vec<String> = low
        .iter()
        .map(|p| format!("• **{}** (`{}`): {} left", p.name, p.id, p.stock.unwrap_or_default()))
        .collect();
    let message = format!("⚠️ Low stock:\n{}", lines.join("\n"));
    if let Err(e) = engine.notifier().notify_staff(&message).await {
        warn!("Could not post low stock report: {}", e);
    }
    Ok(low.len())
}

/// Spawns every background job. They stop once `shutdown` turns `true`.
#[must_use]
pub fn spawn_jobs(
    engine: &Arc<DeliveryEngine>,
    config: &SchedulerConfig,
    low_stock_threshold: u32,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let secs = |s: u64| Duration::from_secs(s.max(1));
    let mut handles = Vec::new();

    let e = Arc::clone(engine);
    handles.push(tokio::spawn(run_every(
        "expiry",
        secs(config.expiry_interval_secs),
        shutdown.clone(),
        move || {
            let e = Arc::clone(&e);
            async move { e.run_expiry_cycle(Utc::now()).await.map(|_| ()) }
        },
    )));

    let e = Arc::clone(engine);
    handles.push(tokio::spawn(run_every(
        "payment-poll",
        secs(config.payment_poll_interval_secs),
        shutdown.clone(),
        move || {
            let e = Arc::clone(&e);
            async move { e.check_pending_payments(Utc::now()).await.map(|_| ()) }
        },
    )));

    let e = Arc::clone(engine);
    handles.push(tokio::spawn(run_every(
        "delivery-retry",
        secs(config.delivery_retry_interval_secs),
        shutdown.clone(),
        move || {
            let e = Arc::clone(&e);
            async move { e.check_pending_deliveries().await.map(|_| ()) }
        },
    )));

    let e = Arc::clone(engine);
    handles.push(tokio::spawn(run_every(
        "low-stock",
        secs(config.low_stock_interval_secs),
        shutdown.clone(),
        move || {
            let e = Arc::clone(&e);
            async move { report_low_stock(&e, low_stock_threshold).await.map(|_| ()) }
        },
    )));

    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store;
    use crate::test_utils::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_job_runs_until_shutdown() {
        let (tx, rx) = watch::channel(false);
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let handle = tokio::spawn(run_every("test", Duration::from_millis(10), rx, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).ok();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .ok()
            .and_then(std::result::Result::ok)
            .unwrap_or_else(|| panic!("job did not stop"));
        assert!(runs.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_low_stock_report_goes_to_staff() -> Result<()> {
        let db = setup_test_db().await?;
        let t = test_engine(&db);
        let mut low = create_test_product(&db, "low").await?;
        low.stock = Some(2);
        store::add(&db, &low).await?;
        let mut plenty = create_test_product(&db, "plenty").await?;
        plenty.stock = Some(50);
        store::add(&db, &plenty).await?;
        create_test_product(&db, "unlimited").await?;

        assert_eq!(report_low_stock(&t.engine, 5).await?, 1);
        let messages = t.notifier.staff_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Test Product low"));
        Ok(())
    }
}
