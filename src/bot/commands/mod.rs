//! Discord command implementations organized by category.

#![allow(clippy::too_long_first_doc_paragraph)]

/// Account linking commands
pub mod account;

/// Administrator commands
pub mod admin;

/// General utility commands
pub mod general;

/// Buyer facing shop commands
pub mod shop;

/// Support ticket commands
pub mod ticket;

// Export commands
pub use account::*;
pub use admin::*;
pub use general::*;
pub use shop::*;
pub use ticket::*;

use crate::{bot::BotData, errors::Error};

/// Every command registered with the framework
#[must_use]
pub fn all() -> Vec<poise::Command<BotData, Error>> {
    vec![
        ping(),
        help(),
        products(),
        buy(),
        checkpayment(),
        mypayments(),
        mypurchases(),
        link(),
        unlink(),
        ticket(),
        product_admin(),
        payments(),
        purchases(),
        clearpayments(),
        forcedelivery(),
        forceexpire(),
        forceremoval(),
        linkuser(),
        unlinkuser(),
        setchannel(),
        rcon(),
    ]
}
