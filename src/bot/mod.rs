//! Bot layer - Discord-specific interface and command handlers
//!
//! This module provides the Discord interface for the storefront: slash and
//! prefix commands, autocomplete, message events for ticket activity, and the
//! shared [`BotData`] every command receives.

/// Discord command implementations (general, shop, account, ticket, admin)
pub mod commands;
/// Discord interaction handlers (autocomplete, events)
pub mod handlers;

use crate::{
    config::AppConfig,
    core::{
        delivery::{DeliveryEngine, expiry_datetime},
        payment::ChargeOptions,
    },
    errors::{Error, Result},
    models::{Purchase, PurchaseState},
};
use poise::serenity_prelude as serenity;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

/// Shared data available to all bot commands.
pub struct BotData {
    /// Database connection for all record store operations
    pub database: DatabaseConnection,
    /// Reconciliation engine shared with the webhook server and scheduler
    pub engine: Arc<DeliveryEngine>,
    /// Application configuration
    pub config: Arc<AppConfig>,
}

impl BotData {
    /// Creates a new `BotData` instance.
    #[must_use]
    pub const fn new(
        database: DatabaseConnection,
        engine: Arc<DeliveryEngine>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            database,
            engine,
            config,
        }
    }

    /// Charge settings taken from the Mercado Pago configuration
    #[must_use]
    pub fn charge_options(&self) -> ChargeOptions {
        ChargeOptions {
            expiration_minutes: self.config.mercado_pago.pix_expiration_minutes,
            default_payer_email: self.config.mercado_pago.default_payer_email.clone(),
        }
    }
}

/// Sends a reply only the invoking user can see.
pub async fn reply_private(ctx: poise::Context<'_, BotData, Error>, content: impl Into<String>) -> Result<()> {
    ctx.send(
        poise::CreateReply::default()
            .content(content.into())
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Sends an embed only the invoking user can see.
pub async fn reply_private_embed(
    ctx: poise::Context<'_, BotData, Error>,
    embed: serenity::CreateEmbed,
) -> Result<()> {
    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// One-line lifecycle summary of a purchase for embeds.
#[must_use]
pub fn purchase_status_line(purchase: &Purchase) -> String {
    match purchase.state() {
        PurchaseState::Approved => "⏳ Paid, waiting for delivery".to_string(),
        PurchaseState::Delivered => match purchase.expires_at.and_then(expiry_datetime) {
            Some(at) => format!("✅ Active until <t:{}:f>", at.timestamp()),
            None => "✅ Active (permanent)".to_string(),
        },
        PurchaseState::Expired => "⌛ Expired, removal pending".to_string(),
        PurchaseState::Removed => "🗑️ Expired and removed".to_string(),
    }
}

/// Cuts `text` to at most `max` characters, marking the cut.
#[must_use]
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

async fn on_error(error: poise::FrameworkError<'_, BotData, Error>) {
    match error {
        poise::FrameworkError::Setup { error, .. } => {
            error!("Failed to start bot: {:?}", error);
        }
        poise::FrameworkError::Command { error, ctx, .. } => {
            error!("Error in command `{}`: {:?}", ctx.command().name, error);
            if let Err(e) = reply_private(ctx, format!("❌ {}", error.user_message())).await {
                error!("Failed to send error message: {}", e);
            }
        }
        error => {
            if let Err(e) = poise::builtins::on_error(error).await {
                error!("Error while handling error: {}", e);
            }
        }
    }
}

/// Runs the Discord client until it disconnects or `shutdown` turns `true`.
#[instrument(skip_all)]
pub async fn run_bot(token: &str, data: BotData, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let guild_id = data.config.guild_id;
    let prefix = data.config.command_prefix.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(prefix),
                ..Default::default()
            },
            on_error: |error| Box::pin(on_error(error)),
            event_handler: |ctx, event, framework, data| {
                Box::pin(handlers::events::event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Logged in as {}", ready.user.name);
                match guild_id {
                    Some(id) => {
                        let guild = serenity::GuildId::new(id);
                        poise::builtins::register_in_guild(ctx, &framework.options().commands, guild)
                            .await?;
                        info!("Registered commands in guild {}", guild);
                    }
                    None => {
                        poise::builtins::register_globally(ctx, &framework.options().commands)
                            .await?;
                        info!("Registered commands globally");
                    }
                }
                Ok(data)
            })
        })
        .build();

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::DIRECT_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT;

    info!("Setting up Serenity client for Poise framework...");
    let mut client = serenity::Client::builder(token, intents)
        .framework(framework)
        .await
        .inspect_err(|e| error!("Error creating client: {:?}", e))?;

    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                return;
            }
        }
        warn!("Shutting down Discord shards");
        shard_manager.shutdown_all().await;
    });

    info!("Starting bot client...");
    client
        .start()
        .await
        .inspect_err(|e| error!("Client error: {:?}", e))?;
    Ok(())
}
