//! Administrator commands - catalogue, records, lifecycle overrides and the
//! game console.
//!
//! Every command here requires the `ADMINISTRATOR` permission and is hidden
//! from other members by default.

// Inner module to suppress missing_docs warnings for poise macro-generated code
mod inner {
    #![allow(missing_docs)]

    use crate::{
        bot::{BotData, handlers::autocomplete, purchase_status_line, reply_private, truncate},
        core::{
            channel,
            delivery::{self, DeliveryOutcome, RemovalOutcome},
            link, payment, product,
        },
        errors::{Error, Result},
        models::{Purchase, PurchaseState, TimeUnit},
    };
    use chrono::Utc;
    use poise::serenity_prelude as serenity;
    use tracing::{info, instrument};

    /// Channel roles that can be configured with `/setchannel`
    #[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
    pub enum ChannelKind {
        #[name = "logs"]
        Logs,
        #[name = "tickets"]
        Tickets,
    }

    impl ChannelKind {
        const fn key(self) -> &'static str {
            match self {
                Self::Logs => channel::LOGS_CHANNEL,
                Self::Tickets => channel::TICKETS_CHANNEL,
            }
        }
    }

    /// Replies with the outcome of an admin action. Errors are shown in full
    /// since only administrators see them.
    async fn reply_outcome(
        ctx: poise::Context<'_, BotData, Error>,
        result: Result<String>,
    ) -> Result<()> {
        match result {
            Ok(message) => reply_private(ctx, message).await,
            Err(e) => {
                tracing::warn!("Admin command `{}` failed: {}", ctx.command().name, e);
                reply_private(ctx, format!("❌ {e}")).await
            }
        }
    }

    fn purchase_line(purchase: &Purchase) -> String {
        format!(
            "`{}` **{}** <@{}> • {}",
            purchase.id(),
            purchase.payment.product_name,
            purchase.payment.user_id,
            purchase_status_line(purchase)
        )
    }

    /// Manage the product catalogue. Subcommands: `add`, `edit`, `remove`, `list`.
    #[poise::command(
        slash_command,
        prefix_command,
        guild_only,
        rename = "product",
        required_permissions = "ADMINISTRATOR",
        default_member_permissions = "ADMINISTRATOR",
        subcommands("product_add", "product_edit", "product_remove", "product_list")
    )]
    pub async fn product_admin(ctx: poise::Context<'_, BotData, Error>) -> Result<()> {
        reply_private(
            ctx,
            "Product management subcommands: `add`, `edit`, `remove`, `list`.\n\
             Console commands may use `{steamid}`, `{username}`, `{product}` and `{quantity}`.",
        )
        .await
    }

    /// Adds a product to the catalogue.
    #[poise::command(
        slash_command,
        prefix_command,
        guild_only,
        rename = "add",
        required_permissions = "ADMINISTRATOR",
        default_member_permissions = "ADMINISTRATOR"
    )]
    #[instrument(skip(ctx))]
    #[allow(clippy::too_many_arguments)]
    pub async fn product_add(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "Unique product id"] id: String,
        #[description = "Display name"] name: String,
        #[description = "Price in BRL"] price: f64,
        #[description = "Description"] description: Option<String>,
        #[description = "Stock (leave empty for unlimited)"] stock: Option<u32>,
        #[description = "Duration amount"] duration: Option<u32>,
        #[description = "Duration unit"] unit: Option<TimeUnit>,
        #[description = "Never expires"] permanent: Option<bool>,
        #[description = "Console command run on delivery"] delivery_command: Option<String>,
        #[description = "Console command run on expiry"] removal_command: Option<String>,
        #[description = "Value for {quantity}"] quantity: Option<u32>,
        #[description = "Image URL"] image: Option<String>,
    ) -> Result<()> {
        let result = product::create_product(
            &ctx.data().database,
            product::NewProduct {
                id,
                name,
                description: description.unwrap_or_default(),
                price,
                image,
                stock,
                time_amount: duration,
                time_unit: unit,
                infinito: permanent.unwrap_or(false),
                delivery_command,
                removal_command,
                quantity,
            },
        )
        .await
        .map(|p| {
            info!(product_id = %p.id, "Product added");
            format!(
                "✅ Added **{}** (`{}`) for R$ {:.2}, {}.",
                p.name,
                p.id,
                p.price,
                p.duration_label()
            )
        });
        reply_outcome(ctx, result).await
    }

    /// Edits fields of a product. Empty options are left unchanged.
    #[poise::command(
        slash_command,
        prefix_command,
        guild_only,
        rename = "edit",
        required_permissions = "ADMINISTRATOR",
        default_member_permissions = "ADMINISTRATOR"
    )]
    #[instrument(skip(ctx))]
    #[allow(clippy::too_many_arguments)]
    pub async fn product_edit(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "Product to edit"]
        #[autocomplete = "autocomplete::autocomplete_product_id"]
        id: String,
        #[description = "New name"] name: Option<String>,
        #[description = "New price in BRL"] price: Option<f64>,
        #[description = "New description"] description: Option<String>,
        #[description = "New stock"] stock: Option<u32>,
        #[description = "New duration amount"] duration: Option<u32>,
        #[description = "New duration unit"] unit: Option<TimeUnit>,
        #[description = "Never expires"] permanent: Option<bool>,
        #[description = "New delivery command"] delivery_command: Option<String>,
        #[description = "New removal command"] removal_command: Option<String>,
        #[description = "New image URL"] image: Option<String>,
    ) -> Result<()> {
        let patch = product::ProductPatch {
            name,
            description,
            price,
            image,
            stock,
            time_amount: duration,
            time_unit: unit,
            infinito: permanent,
            delivery_command,
            removal_command,
        };
        let result = product::update_product(&ctx.data().database, &id, patch)
            .await
            .map(|p| format!("✅ Updated **{}** (`{}`).", p.name, p.id));
        reply_outcome(ctx, result).await
    }

    /// Removes a product. Existing purchases keep working.
    #[poise::command(
        slash_command,
        prefix_command,
        guild_only,
        rename = "remove",
        required_permissions = "ADMINISTRATOR",
        default_member_permissions = "ADMINISTRATOR"
    )]
    #[instrument(skip(ctx))]
    pub async fn product_remove(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "Product to remove"]
        #[autocomplete = "autocomplete::autocomplete_product_id"]
        id: String,
    ) -> Result<()> {
        let result = product::delete_product(&ctx.data().database, &id)
            .await
            .map(|p| format!("🗑️ Removed **{}** (`{}`).", p.name, p.id));
        reply_outcome(ctx, result).await
    }

    /// Lists products with their console commands.
    #[poise::command(
        slash_command,
        prefix_command,
        guild_only,
        rename = "list",
        required_permissions = "ADMINISTRATOR",
        default_member_permissions = "ADMINISTRATOR"
    )]
    pub async fn product_list(ctx: poise::Context<'_, BotData, Error>) -> Result<()> {
        let products = product::list_products(&ctx.data().database).await?;
        if products.is_empty() {
            return reply_private(ctx, "No products yet. Use `/product add`.").await;
        }
        let lines: Vec<String> = products
            .iter()
            .map(|p| {
                format!(
                    "`{}` **{}** R$ {:.2} • {} • stock {} • deliver: `{}` • remove: `{}`",
                    p.id,
                    p.name,
                    p.price,
                    p.duration_label(),
                    p.stock.map_or_else(|| "∞".to_string(), |s| s.to_string()),
                    p.delivery_command.as_deref().unwrap_or("-"),
                    p.removal_command.as_deref().unwrap_or("-"),
                )
            })
            .collect();
        reply_private(ctx, truncate(&lines.join("\n"), 1900)).await
    }

    /// Lists recent payments, optionally of one user.
    #[poise::command(
        slash_command,
        prefix_command,
        guild_only,
        required_permissions = "ADMINISTRATOR",
        default_member_permissions = "ADMINISTRATOR"
    )]
    pub async fn payments(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "Only payments of this user"] user: Option<serenity::User>,
    ) -> Result<()> {
        let db = &ctx.data().database;
        let payments = match &user {
            Some(u) => payment::list_user_payments(db, &u.id.to_string()).await?,
            None => payment::list_payments(db).await?,
        };
        if payments.is_empty() {
            return reply_private(ctx, "No payments found.").await;
        }
        let lines: Vec<String> = payments
            .iter()
            .take(20)
            .map(|p| {
                format!(
                    "{} `{}` **{}** <@{}> R$ {:.2} {} • <t:{}:g>",
                    p.status.emoji(),
                    p.id,
                    p.product_name,
                    p.user_id,
                    p.amount,
                    p.payment_method.as_str(),
                    p.date.timestamp()
                )
            })
            .collect();
        let header = format!("**{} payment(s)**, newest first:\n", payments.len());
        reply_private(ctx, truncate(&(header + &lines.join("\n")), 1900)).await
    }

    /// Lists purchases, optionally of one user or only the active ones.
    #[poise::command(
        slash_command,
        prefix_command,
        guild_only,
        required_permissions = "ADMINISTRATOR",
        default_member_permissions = "ADMINISTRATOR"
    )]
    pub async fn purchases(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "Only purchases of this user"] user: Option<serenity::User>,
        #[description = "Only delivered purchases that have not expired"] active_only: Option<bool>,
    ) -> Result<()> {
        let user_id = user.map(|u| u.id.to_string());
        let mut purchases = delivery::list_purchases(&ctx.data().database, user_id.as_deref()).await?;
        if active_only.unwrap_or(false) {
            purchases.retain(|p| p.state() == PurchaseState::Delivered);
        }
        if purchases.is_empty() {
            return reply_private(ctx, "No purchases found.").await;
        }
        let lines: Vec<String> = purchases.iter().take(20).map(purchase_line).collect();
        let header = format!("**{} purchase(s)**:\n", purchases.len());
        reply_private(ctx, truncate(&(header + &lines.join("\n")), 1900)).await
    }

    /// Backs up and deletes every payment record. Purchases are kept.
    #[poise::command(
        slash_command,
        prefix_command,
        guild_only,
        required_permissions = "ADMINISTRATOR",
        default_member_permissions = "ADMINISTRATOR"
    )]
    #[instrument(skip(ctx))]
    pub async fn clearpayments(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "Set to true to confirm"] confirm: bool,
    ) -> Result<()> {
        if !confirm {
            return reply_private(ctx, "Nothing was deleted. Run again with `confirm: true`.").await;
        }
        let data = ctx.data();
        let result = payment::clear_payments(&data.database, &data.config.backup_dir)
            .await
            .map(|path| {
                info!(backup = %path.display(), "Payments cleared");
                format!("🗑️ Payments cleared. Backup written to `{}`.", path.display())
            });
        reply_outcome(ctx, result).await
    }

    /// Delivers a purchase regardless of the payment status.
    #[poise::command(
        slash_command,
        prefix_command,
        guild_only,
        required_permissions = "ADMINISTRATOR",
        default_member_permissions = "ADMINISTRATOR"
    )]
    #[instrument(skip(ctx))]
    pub async fn forcedelivery(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "Payment ID"] payment_id: String,
    ) -> Result<()> {
        ctx.defer_ephemeral().await?;
        let actor = ctx.author().id.to_string();
        let result = ctx
            .data()
            .engine
            .force_delivery(payment_id.trim(), &actor)
            .await
            .map(|outcome| match outcome {
                DeliveryOutcome::Delivered { response, .. } => format!(
                    "✅ Delivered `{payment_id}`.{}",
                    response
                        .filter(|r| !r.is_empty())
                        .map(|r| format!("\n```{}```", truncate(&r, 1500)))
                        .unwrap_or_default()
                ),
                DeliveryOutcome::AlreadyDelivered => {
                    format!("`{payment_id}` was already delivered.")
                }
                DeliveryOutcome::InProgress => {
                    format!("A delivery of `{payment_id}` is already running.")
                }
            });
        reply_outcome(ctx, result).await
    }

    /// Marks a delivered purchase as expired now. The removal sweep runs its
    /// removal command.
    #[poise::command(
        slash_command,
        prefix_command,
        guild_only,
        required_permissions = "ADMINISTRATOR",
        default_member_permissions = "ADMINISTRATOR"
    )]
    #[instrument(skip(ctx))]
    pub async fn forceexpire(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "Payment ID"] payment_id: String,
    ) -> Result<()> {
        let result = ctx
            .data()
            .engine
            .force_expire(payment_id.trim(), Utc::now())
            .await
            .map(|p| format!("⌛ `{}` expired. Removal runs on the next sweep.", p.id()));
        reply_outcome(ctx, result).await
    }

    /// Expires a purchase and runs its removal command right away.
    #[poise::command(
        slash_command,
        prefix_command,
        guild_only,
        required_permissions = "ADMINISTRATOR",
        default_member_permissions = "ADMINISTRATOR"
    )]
    #[instrument(skip(ctx))]
    pub async fn forceremoval(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "Payment ID"] payment_id: String,
    ) -> Result<()> {
        ctx.defer_ephemeral().await?;
        let result = ctx
            .data()
            .engine
            .force_removal(payment_id.trim(), Utc::now())
            .await
            .map(|outcome| match outcome {
                RemovalOutcome::Removed { .. } => format!("🗑️ `{payment_id}` removed."),
                RemovalOutcome::AlreadyRemoved => format!("`{payment_id}` was already removed."),
                RemovalOutcome::NotExpired => format!("`{payment_id}` has not expired."),
                RemovalOutcome::InProgress => {
                    format!("A removal of `{payment_id}` is already running.")
                }
            });
        reply_outcome(ctx, result).await
    }

    /// Links another user to a game account.
    #[poise::command(
        slash_command,
        prefix_command,
        guild_only,
        required_permissions = "ADMINISTRATOR",
        default_member_permissions = "ADMINISTRATOR"
    )]
    #[instrument(skip(ctx, user), fields(target = %user.id))]
    pub async fn linkuser(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "User to link"] user: serenity::User,
        #[description = "SteamID64 (17 digits)"] steamid: String,
    ) -> Result<()> {
        let actor = ctx.author().id.to_string();
        let result = link::link_identity(&ctx.data().database, &user.id.to_string(), &steamid, &actor)
            .await
            .map(|l| format!("✅ <@{}> linked to `{}`.", l.user_id, l.steam_id));
        reply_outcome(ctx, result).await
    }

    /// Removes the game account link of another user.
    #[poise::command(
        slash_command,
        prefix_command,
        guild_only,
        required_permissions = "ADMINISTRATOR",
        default_member_permissions = "ADMINISTRATOR"
    )]
    pub async fn unlinkuser(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "User to unlink"] user: serenity::User,
    ) -> Result<()> {
        let message = match link::unlink_identity(&ctx.data().database, &user.id.to_string()).await? {
            Some(old) => format!("✅ <@{}> unlinked from `{}`.", user.id, old.steam_id),
            None => format!("<@{}> has no linked account.", user.id),
        };
        reply_private(ctx, message).await
    }

    /// Sets the channel used for logs or as the ticket category.
    #[poise::command(
        slash_command,
        prefix_command,
        guild_only,
        required_permissions = "ADMINISTRATOR",
        default_member_permissions = "ADMINISTRATOR"
    )]
    pub async fn setchannel(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "What the channel is used for"] kind: ChannelKind,
        #[description = "Channel (a category for tickets)"] channel: serenity::Channel,
    ) -> Result<()> {
        let stored = channel::set_channel(
            &ctx.data().database,
            kind.key(),
            &channel.id().to_string(),
        )
        .await?;
        info!(name = %stored.name, channel_id = %stored.channel_id, "Channel configured");
        reply_private(ctx, format!("✅ `{}` channel set to <#{}>.", stored.name, stored.channel_id)).await
    }

    /// Runs a console command on the game server.
    #[poise::command(
        slash_command,
        prefix_command,
        guild_only,
        required_permissions = "ADMINISTRATOR",
        default_member_permissions = "ADMINISTRATOR"
    )]
    #[instrument(skip(ctx))]
    pub async fn rcon(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "Console command"]
        #[rest]
        command: String,
    ) -> Result<()> {
        ctx.defer_ephemeral().await?;
        let result = ctx
            .data()
            .engine
            .executor()
            .execute(command.trim())
            .await
            .map(|response| {
                let body = if response.trim().is_empty() {
                    "(no output)".to_string()
                } else {
                    truncate(&response, 1900)
                };
                format!("```\n{body}\n```")
            });
        reply_outcome(ctx, result).await
    }
}

// Re-export all commands
pub use inner::*;
