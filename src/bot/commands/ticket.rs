//! Support ticket commands - a private channel per user.
//!
//! Opening a ticket creates a text channel only the user (and roles with
//! administrator rights) can see. When a `tickets` channel is configured it is
//! used as the parent category.

// Inner module to suppress missing_docs warnings for poise macro-generated code
mod inner {
    #![allow(missing_docs)]

    use crate::{
        bot::{BotData, reply_private},
        core::{channel, ticket},
        errors::{Error, Result},
    };
    use poise::serenity_prelude as serenity;
    use tracing::{error, instrument, warn};

    fn ticket_channel_name(username: &str) -> String {
        let slug: String = username
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .take(80)
            .collect();
        if slug.is_empty() {
            "ticket".to_string()
        } else {
            format!("ticket-{slug}")
        }
    }

    fn private_overwrites(
        guild_id: serenity::GuildId,
        user_id: serenity::UserId,
    ) -> Vec<serenity::PermissionOverwrite> {
        vec![
            serenity::PermissionOverwrite {
                allow: serenity::Permissions::empty(),
                deny: serenity::Permissions::VIEW_CHANNEL,
                kind: serenity::PermissionOverwriteType::Role(serenity::RoleId::new(
                    guild_id.get(),
                )),
            },
            serenity::PermissionOverwrite {
                allow: serenity::Permissions::VIEW_CHANNEL
                    | serenity::Permissions::SEND_MESSAGES
                    | serenity::Permissions::READ_MESSAGE_HISTORY,
                deny: serenity::Permissions::empty(),
                kind: serenity::PermissionOverwriteType::Member(user_id),
            },
        ]
    }

    /// Support tickets. Subcommands: `open`, `close`.
    #[poise::command(
        slash_command,
        prefix_command,
        guild_only,
        subcommands("ticket_open", "ticket_close")
    )]
    pub async fn ticket(ctx: poise::Context<'_, BotData, Error>) -> Result<()> {
        reply_private(
            ctx,
            "Ticket commands:\n\
             • `/ticket open [subject]` - Opens a private support channel.\n\
             • `/ticket close` - Closes the ticket of the current channel.",
        )
        .await
    }

    /// Opens a private support channel.
    #[poise::command(slash_command, prefix_command, guild_only, rename = "open")]
    #[instrument(skip(ctx), fields(user_id = %ctx.author().id))]
    pub async fn ticket_open(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "What do you need help with?"] subject: Option<String>,
    ) -> Result<()> {
        let data = ctx.data();
        let user_id = ctx.author().id.to_string();
        let Some(guild_id) = ctx.guild_id() else {
            reply_private(ctx, "Tickets can only be opened inside a server.").await?;
            return Ok(());
        };

        if let Some(existing) = ticket::find_open_ticket_for_user(&data.database, &user_id).await? {
            reply_private(
                ctx,
                format!("You already have an open ticket: <#{}>", existing.channel_id),
            )
            .await?;
            return Ok(());
        }

        ctx.defer_ephemeral().await?;
        let mut builder = serenity::CreateChannel::new(ticket_channel_name(&ctx.author().name))
            .kind(serenity::ChannelType::Text)
            .permissions(private_overwrites(guild_id, ctx.author().id));
        if let Some(category) = channel::get_channel(&data.database, channel::TICKETS_CHANNEL)
            .await?
            .and_then(|id| id.parse::<u64>().ok())
            .filter(|id| *id != 0)
        {
            builder = builder.category(serenity::ChannelId::new(category));
        }
        let created = guild_id.create_channel(ctx.http(), builder).await?;

        let opened = match ticket::open_ticket(
            &data.database,
            &user_id,
            &created.id.to_string(),
            subject.clone(),
        )
        .await
        {
            Ok(opened) => opened,
            Err(e) => {
                if let Err(cleanup) = created.id.delete(ctx.http()).await {
                    error!("Could not delete orphan ticket channel: {}", cleanup);
                }
                return Err(e);
            }
        };

        let welcome = format!(
            "👋 <@{user_id}>, thanks for reaching out. Describe your problem and staff will answer here.\n\
             Subject: {}\nUse `/ticket close` when you are done.",
            subject.as_deref().unwrap_or("not given")
        );
        if let Err(e) = created.id.say(ctx.http(), welcome).await {
            warn!("Could not post ticket welcome message: {}", e);
        }
        if let Err(e) = data
            .engine
            .notifier()
            .notify_staff(&format!(
                "🎫 Ticket `{}` opened by <@{user_id}> in <#{}>",
                opened.id, opened.channel_id
            ))
            .await
        {
            warn!("Could not post ticket notice: {}", e);
        }

        reply_private(ctx, format!("✅ Ticket opened: <#{}>", opened.channel_id)).await
    }

    /// Closes the ticket of the current channel and deletes the channel.
    #[poise::command(slash_command, prefix_command, guild_only, rename = "close")]
    #[instrument(skip(ctx), fields(user_id = %ctx.author().id))]
    pub async fn ticket_close(ctx: poise::Context<'_, BotData, Error>) -> Result<()> {
        let data = ctx.data();
        let channel_id = ctx.channel_id();
        let Some(found) =
            ticket::find_ticket_by_channel(&data.database, &channel_id.to_string()).await?
        else {
            reply_private(ctx, "This channel is not an open ticket.").await?;
            return Ok(());
        };

        let user_id = ctx.author().id.to_string();
        let is_admin = ctx
            .author_member()
            .await
            .and_then(|m| m.permissions)
            .is_some_and(serenity::Permissions::administrator);
        if found.user_id != user_id && !is_admin {
            reply_private(ctx, "Only the ticket owner or an administrator can close it.").await?;
            return Ok(());
        }

        ticket::close_ticket(&data.database, &found.id, &user_id).await?;
        ctx.say("🔒 Ticket closed. This channel will be deleted.").await?;
        if let Err(e) = data
            .engine
            .notifier()
            .notify_staff(&format!("🔒 Ticket `{}` closed by <@{user_id}>", found.id))
            .await
        {
            warn!("Could not post ticket notice: {}", e);
        }
        channel_id.delete(ctx.http()).await?;
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_ticket_channel_name_is_slugged() {
            assert_eq!(ticket_channel_name("Alice.B"), "ticket-aliceb");
            assert_eq!(ticket_channel_name("..."), "ticket");
            assert_eq!(ticket_channel_name("bob_99"), "ticket-bob_99");
        }
    }
}

// Re-export all commands
pub use inner::*;
