//! Discord interaction handlers
//!
//! Handlers for autocomplete and gateway events that are not commands.

/// Autocomplete handlers for product ids
pub mod autocomplete;
/// Gateway event handler (ticket activity)
pub mod events;
