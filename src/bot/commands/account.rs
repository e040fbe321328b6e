//! Account commands - link and unlink a game account.

// Inner module to suppress missing_docs warnings for poise macro-generated code
mod inner {
    #![allow(missing_docs)]

    use crate::{
        bot::{BotData, reply_private},
        core::{delivery, link},
        errors::{Error, Result},
    };
    use tracing::{info, warn};

    /// Links your Discord account to your game account (SteamID64).
    ///
    /// Purchases paid before linking are delivered right after the link is
    /// stored.
    #[poise::command(slash_command, prefix_command)]
    pub async fn link(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "Your SteamID64 (17 digits)"] steamid: String,
    ) -> Result<()> {
        let data = ctx.data();
        let user_id = ctx.author().id.to_string();

        let linked = match link::link_identity(&data.database, &user_id, &steamid, &user_id).await {
            Ok(linked) => linked,
            Err(e @ (Error::InvalidInput { .. } | Error::AlreadyLinked { .. })) => {
                reply_private(ctx, format!("❌ {}", e.user_message())).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let waiting: Vec<String> = delivery::list_purchases(&data.database, Some(&user_id))
            .await?
            .into_iter()
            .filter(|p| !p.delivered)
            .map(|p| p.id().to_string())
            .collect();
        let mut delivered = 0;
        for payment_id in &waiting {
            match data.engine.deliver_product(payment_id).await {
                Ok(delivery::DeliveryOutcome::Delivered { .. }) => delivered += 1,
                Ok(_) => {}
                Err(e) => warn!(payment_id = %payment_id, "Delivery after link failed: {}", e),
            }
        }
        if delivered > 0 {
            info!(user_id = %user_id, delivered, "Delivered waiting purchases after link");
        }

        let mut message = format!("✅ Linked to `{}`.", linked.steam_id);
        if delivered > 0 {
            message.push_str(&format!("\n📦 {delivered} pending purchase(s) delivered."));
        } else if !waiting.is_empty() {
            message.push_str(
                "\n⚠️ Some purchases are still waiting for delivery and will be retried automatically.",
            );
        }
        reply_private(ctx, message).await
    }

    /// Removes the link to your game account.
    #[poise::command(slash_command, prefix_command)]
    pub async fn unlink(ctx: poise::Context<'_, BotData, Error>) -> Result<()> {
        let user_id = ctx.author().id.to_string();
        match link::unlink_identity(&ctx.data().database, &user_id).await? {
            Some(old) => reply_private(ctx, format!("✅ Unlinked from `{}`.", old.steam_id)).await,
            None => reply_private(ctx, "You have no linked account.").await,
        }
    }
}

// Re-export all commands
pub use inner::*;
