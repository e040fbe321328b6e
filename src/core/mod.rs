//! Core business logic - framework-agnostic operations on the record store.
//!
//! Nothing in here knows about Discord or HTTP. The bot commands and the
//! webhook server are thin layers over these functions.

/// Named channel configuration
pub mod channel;

/// Reconciliation engine: approval, delivery, expiry and removal
pub mod delivery;

/// Discord user to game account links
pub mod link;

/// Payment ledger and charge creation
pub mod payment;

/// Product catalogue and stock
pub mod product;

/// Periodic background jobs
pub mod scheduler;

/// Keyed JSON record store
pub mod store;

/// Support tickets
pub mod ticket;
