use poise::serenity_prelude as serenity;
use sea_orm::DatabaseConnection;
use std::{env, path::Path, sync::Arc};
use storefront_bot::{
    bot::{self, BotData},
    config::{self, database},
    core::{delivery::DeliveryEngine, scheduler, store},
    errors::{Error, Result},
    models::{ChannelConfig, IdentityLink, Payment, Product, Purchase, Record, Ticket},
    services::{CommandExecutor, DiscordNotifier, MercadoPagoClient, Notifier, PaymentGateway, RconClient},
    web::{self, WebState},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Imports one legacy JSON file when the collection is still empty.
async fn import_collection<T: Record>(db: &DatabaseConnection, dir: &Path) -> Result<()> {
    let path = dir.join(T::COLLECTION.file_name());
    if !path.exists() {
        return Ok(());
    }
    if store::count::<T, _>(db).await? > 0 {
        info!(collection = %T::COLLECTION, "Collection not empty, skipping legacy import");
        return Ok(());
    }
    store::import_legacy_file::<T, _>(db, &path).await?;
    Ok(())
}

async fn import_legacy_data(db: &DatabaseConnection, dir: &Path) -> Result<()> {
    import_collection::<Product>(db, dir).await?;
    import_collection::<Payment>(db, dir).await?;
    import_collection::<Purchase>(db, dir).await?;
    import_collection::<IdentityLink>(db, dir).await?;
    import_collection::<Ticket>(db, dir).await?;
    import_collection::<ChannelConfig>(db, dir).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file, non-fatal since env vars can be set externally
    dotenvy::dotenv().ok();

    // 3. Load the main application configuration
    let app_config = Arc::new(config::load_app_configuration()?);
    if app_config.mercado_pago.access_token.trim().is_empty() {
        warn!("MERCADO_PAGO_ACCESS_TOKEN is not set, payments are disabled");
    }

    // 4. Initialize database
    let db = database::create_connection(&app_config.database_url)
        .await
        .inspect_err(|e| error!("Failed to initialize database: {}", e))?;
    database::create_tables(&db).await?;
    if let Some(dir) = &app_config.legacy_data_dir {
        import_legacy_data(&db, dir)
            .await
            .inspect_err(|e| error!("Legacy import failed: {}", e))?;
    }

    // DISCORD_BOT_TOKEN is loaded here, directly before use, not stored in AppConfig
    let token = env::var("DISCORD_BOT_TOKEN")
        .inspect_err(|e| error!("DISCORD_BOT_TOKEN not found: {}", e))
        .map_err(Error::EnvVar)?;

    // 5. Wire the reconciliation engine to its collaborators
    let gateway: Arc<dyn PaymentGateway> = Arc::new(MercadoPagoClient::new(&app_config.mercado_pago)?);
    let executor: Arc<dyn CommandExecutor> = Arc::new(RconClient::new(&app_config.rcon));
    let http = Arc::new(serenity::Http::new(&token));
    let notifier: Arc<dyn Notifier> = Arc::new(DiscordNotifier::new(http, db.clone()));
    let engine = Arc::new(DeliveryEngine::new(db.clone(), gateway, executor, notifier));

    // 6. Background jobs and webhook server
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = scheduler::spawn_jobs(
        &engine,
        &app_config.scheduler,
        app_config.low_stock_threshold,
        &shutdown_rx,
    );
    if app_config.webhook.enabled {
        let webhook_config = app_config.webhook.clone();
        let state = WebState::new(Arc::clone(&engine));
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = web::serve(&webhook_config, state, rx).await {
                error!("Webhook server failed: {}", e);
            }
        }));
    }

    // 7. Run the bot until it stops or Ctrl-C
    let data = BotData::new(db, Arc::clone(&engine), Arc::clone(&app_config));
    let outcome = tokio::select! {
        result = bot::run_bot(&token, data, shutdown_rx.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            Ok(())
        }
    };

    shutdown_tx.send(true).ok();
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }
    info!("Shut down cleanly");
    outcome
}
