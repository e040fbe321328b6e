//! Unified error types for the storefront bot.
//!
//! Every layer (record store, payment gateway, remote console, Discord surface)
//! reports failures through [`Error`]. Handlers show [`Error::user_message`] to
//! Discord users and log the full `Display`/`Debug` output.

use thiserror::Error;

/// Application error type
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or placeholder configuration (fails before any network call)
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },

    /// Database error from `SeaORM`
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// A stored record could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error (backups, legacy imports, config)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing environment variable
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    /// The payment processor was reachable but refused or failed the request
    #[error("Payment gateway error: {message}")]
    Gateway {
        /// Wrapped gateway message
        message: String,
    },

    /// The game server console timed out, refused the connection or rejected auth
    #[error("Remote console error: {message}")]
    RemoteExecutor {
        /// Wrapped transport message
        message: String,
    },

    /// Product with the given id does not exist
    #[error("Product '{id}' not found")]
    ProductNotFound {
        /// Product id
        id: String,
    },

    /// Payment with the given id does not exist
    #[error("Payment '{id}' not found")]
    PaymentNotFound {
        /// Payment id
        id: String,
    },

    /// No approved purchase exists for the given payment id
    #[error("Purchase '{id}' not found")]
    PurchaseNotFound {
        /// Payment id of the purchase
        id: String,
    },

    /// The buyer has no identity link, so there is no account to deliver to
    #[error("User {user_id} has no linked game account")]
    NotLinked {
        /// Discord user id
        user_id: String,
    },

    /// The external account is already bound to another Discord user
    #[error("Account {external_id} is already linked to user {user_id}")]
    AlreadyLinked {
        /// Game-server account id
        external_id: String,
        /// Discord user currently holding the link
        user_id: String,
    },

    /// Product stock is exhausted
    #[error("Product '{name}' is out of stock")]
    OutOfStock {
        /// Product name
        name: String,
    },

    /// Invalid monetary amount
    #[error("Invalid amount: {amount}")]
    InvalidAmount {
        /// The rejected amount
        amount: f64,
    },

    /// Invalid user or admin input
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// What was wrong
        message: String,
    },

    /// Requested state transition is not allowed from the current state
    #[error("Invalid transition for payment '{payment_id}': {reason}")]
    InvalidTransition {
        /// Payment id
        payment_id: String,
        /// Why it was refused
        reason: String,
    },

    /// The user already has an open ticket
    #[error("User already has an open ticket in channel {channel_id}")]
    TicketAlreadyOpen {
        /// Channel of the existing ticket
        channel_id: String,
    },

    /// Ticket does not exist
    #[error("Ticket '{id}' not found")]
    TicketNotFound {
        /// Ticket id
        id: String,
    },

    /// Serenity/Poise framework error
    #[error("Serenity/Poise framework error: {0}")]
    #[allow(clippy::enum_variant_names)]
    FrameworkError(Box<poise::serenity_prelude::Error>),
}

impl From<poise::serenity_prelude::Error> for Error {
    fn from(value: poise::serenity_prelude::Error) -> Self {
        Self::FrameworkError(Box::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Self::Gateway {
            message: value.to_string(),
        }
    }
}

impl Error {
    /// Short human-readable message for Discord users. Internal failures map to a
    /// generic text so stack traces and gateway payloads never reach the chat.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::ProductNotFound { id } => format!("Product `{id}` was not found."),
            Self::PaymentNotFound { id } => format!("Payment `{id}` was not found."),
            Self::PurchaseNotFound { id } => format!("No purchase exists for payment `{id}`."),
            Self::NotLinked { .. } => {
                "You need to link your game account first with `/link`.".to_string()
            }
            Self::AlreadyLinked { external_id, .. } => {
                format!("Account `{external_id}` is already linked to another user.")
            }
            Self::OutOfStock { name } => format!("Product **{name}** is out of stock."),
            Self::InvalidAmount { amount } => format!("Invalid amount: {amount}."),
            Self::InvalidInput { message } => message.clone(),
            Self::InvalidTransition { reason, .. } => reason.clone(),
            Self::TicketAlreadyOpen { channel_id } => {
                format!("You already have an open ticket: <#{channel_id}>")
            }
            Self::TicketNotFound { .. } => "Ticket not found.".to_string(),
            Self::Config { .. } => {
                "Payments are not configured right now. Please contact an administrator."
                    .to_string()
            }
            Self::Gateway { .. } => {
                "The payment processor could not handle the request. Please try again later."
                    .to_string()
            }
            Self::RemoteExecutor { .. } => {
                "The game server could not be reached. Please try again later.".to_string()
            }
            Self::Database(_)
            | Self::Serialization(_)
            | Self::Io(_)
            | Self::EnvVar(_)
            | Self::FrameworkError(_) => "An internal error occurred.".to_string(),
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
