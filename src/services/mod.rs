//! Adapters for external collaborators: payment processor, game server console
//! and Discord notifications.

/// Mercado Pago payment gateway client
pub mod mercado_pago;
/// Buyer and staff notifications
pub mod notifier;
/// Source RCON console client
pub mod rcon;

pub use mercado_pago::{Charge, ChargeRequest, ChargeSnapshot, MercadoPagoClient, PaymentGateway};
pub use notifier::{BuyerNotice, DiscordNotifier, Notifier};
pub use rcon::{CommandExecutor, RconClient};
