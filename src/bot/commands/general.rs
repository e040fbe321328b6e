//! General Discord commands - ping and help.
//! Simple commands that don't touch the record store.

// Inner module to suppress missing_docs warnings for poise macro-generated code
mod inner {
    #![allow(missing_docs)]

    use crate::{
        bot::BotData,
        errors::{Error, Result},
    };

    /// Responds with "Pong!" to test bot connectivity.
    #[poise::command(slash_command, prefix_command)]
    pub async fn ping(ctx: poise::Context<'_, BotData, Error>) -> Result<()> {
        ctx.say("Pong!").await?;
        Ok(())
    }

    /// Displays help information about available commands.
    #[poise::command(slash_command, prefix_command)]
    pub async fn help(ctx: poise::Context<'_, BotData, Error>) -> Result<()> {
        let help_text = "**Store Help**\n\n\
        **Shop**\n\
        • `/products` - Lists everything for sale.\n\
        • `/buy <product> [method]` - Creates a PIX or card payment.\n\
        • `/checkpayment <id>` - Checks a payment and delivers it once approved.\n\
        • `/mypayments` - Your recent payments.\n\
        • `/mypurchases` - Your purchases and when they expire.\n\n\
        **Account**\n\
        • `/link <steamid>` - Links your game account (needed for delivery).\n\
        • `/unlink` - Removes the link.\n\n\
        **Support**\n\
        • `/ticket open [subject]` - Opens a private support channel.\n\
        • `/ticket close` - Closes the ticket of the current channel.\n\n\
        **Administration**\n\
        • `/product add|edit|remove|list` - Manage the catalogue.\n\
        • `/payments`, `/purchases`, `/clearpayments` - Inspect and clean records.\n\
        • `/forcedelivery`, `/forceexpire`, `/forceremoval` - Manual lifecycle overrides.\n\
        • `/linkuser`, `/unlinkuser` - Manage links for other users.\n\
        • `/setchannel <name> <channel>` - Configure the `logs` and `tickets` channels.\n\
        • `/rcon <command>` - Runs a console command on the game server.\n\n\
        **Utility**\n\
        • `/ping` - Checks if the bot is responsive.\n\
        • `/help` - Shows this help message.";

        ctx.say(help_text).await?;
        Ok(())
    }
}

// Re-export all commands
pub use inner::*;
