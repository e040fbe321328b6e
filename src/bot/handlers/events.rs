//! Gateway events outside of commands.

use crate::{
    bot::BotData,
    core::ticket,
    errors::{Error, Result},
};
use poise::serenity_prelude as serenity;
use tracing::debug;

/// Keeps `last_activity` of ticket channels current.
pub async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, BotData, Error>,
    data: &BotData,
) -> Result<()> {
    if let serenity::FullEvent::Message { new_message } = event {
        if new_message.author.bot {
            return Ok(());
        }
        let channel_id = new_message.channel_id.to_string();
        if let Some(open) = ticket::find_ticket_by_channel(&data.database, &channel_id).await? {
            ticket::touch_ticket(&data.database, &open.id).await?;
            debug!(ticket_id = %open.id, "Ticket activity");
        }
    }
    Ok(())
}
