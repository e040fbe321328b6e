//! Buyer and staff notifications.
//!
//! The reconciliation engine only knows the [`Notifier`] trait. The Discord
//! implementation sends buyer notices as DMs and staff notices to the channel
//! configured under [`crate::core::channel::LOGS_CHANNEL`].

use crate::{
    core::channel,
    errors::{Error, Result},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::debug;

/// Something the buyer should hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuyerNotice {
    /// The payment was approved and delivery is queued
    PaymentApproved {
        /// Payment id
        payment_id: String,
        /// Product name
        product_name: String,
    },
    /// The product was delivered in game
    Delivered {
        /// Payment id
        payment_id: String,
        /// Product name
        product_name: String,
        /// When it ends, `None` for permanent grants
        expires_at: Option<DateTime<Utc>>,
    },
    /// The grant time is over
    Expired {
        /// Payment id
        payment_id: String,
        /// Product name
        product_name: String,
    },
}

impl BuyerNotice {
    /// Embed title
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::PaymentApproved { .. } => "✅ Payment approved",
            Self::Delivered { .. } => "📦 Product delivered",
            Self::Expired { .. } => "⌛ Product expired",
        }
    }

    /// Embed description
    #[must_use]
    pub fn body(&self) -> String {
        match self {
            Self::PaymentApproved {
                payment_id,
                product_name,
            } => format!(
                "Your payment `{payment_id}` for **{product_name}** was approved. Delivery will happen shortly."
            ),
            Self::Delivered {
                payment_id,
                product_name,
                expires_at,
            } => {
                let validity = expires_at.map_or_else(
                    || "This product is permanent.".to_string(),
                    |at| format!("Valid until <t:{}:f>.", at.timestamp()),
                );
                format!(
                    "**{product_name}** was delivered to your game account (payment `{payment_id}`). {validity}"
                )
            }
            Self::Expired {
                payment_id,
                product_name,
            } => format!(
                "Your **{product_name}** (payment `{payment_id}`) has expired. Thank you for your purchase!"
            ),
        }
    }
}

/// Notification seam used by the reconciliation engine
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends a private notice to a buyer
    async fn notify_user(&self, user_id: &str, notice: &BuyerNotice) -> Result<()>;

    /// Posts an operational message for staff
    async fn notify_staff(&self, message: &str) -> Result<()>;
}

/// Discord implementation of [`Notifier`]
pub struct DiscordNotifier {
    http: Arc<serenity::Http>,
    db: DatabaseConnection,
}

impl DiscordNotifier {
    /// Creates a notifier that resolves the staff channel through `db`
    #[must_use]
    pub const fn new(http: Arc<serenity::Http>, db: DatabaseConnection) -> Self {
        Self { http, db }
    }
}

fn parse_snowflake(id: &str) -> Result<u64> {
    id.parse::<u64>()
        .ok()
        .filter(|value| *value != 0)
        .ok_or_else(|| Error::InvalidInput {
            message: format!("'{id}' is not a Discord id"),
        })
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify_user(&self, user_id: &str, notice: &BuyerNotice) -> Result<()> {
        let user = serenity::UserId::new(parse_snowflake(user_id)?);
        let embed = serenity::CreateEmbed::default()
            .title(notice.title())
            .description(notice.body())
            .color(0x0058_65F2);

        let dm = user.create_dm_channel(&self.http).await?;
        dm.send_message(&self.http, serenity::CreateMessage::new().embed(embed))
            .await?;
        debug!(user_id, "Buyer notified");
        Ok(())
    }

    async fn notify_staff(&self, message: &str) -> Result<()> {
        let Some(channel_id) = channel::get_channel(&self.db, channel::LOGS_CHANNEL).await? else {
            debug!("No logs channel configured, staff notice dropped: {}", message);
            return Ok(());
        };
        serenity::ChannelId::new(parse_snowflake(&channel_id)?)
            .say(&self.http, message)
            .await?;
        Ok(())
    }
}
