//! Autocomplete handlers for Discord slash command parameters.

use crate::{bot::BotData, core::product, errors::Error};

/// Provides autocomplete suggestions for product ids.
///
/// Matches the partial input against id and name (case-insensitive) and
/// returns up to 25 product ids, the Discord limit.
pub async fn autocomplete_product_id(
    ctx: poise::Context<'_, BotData, Error>,
    partial: &str,
) -> Vec<String> {
    let db = &ctx.data().database;

    let Ok(products) = product::list_products(db).await else {
        return Vec::new();
    };

    let partial_lower = partial.to_lowercase();
    products
        .into_iter()
        .filter(|p| {
            p.id.to_lowercase().contains(&partial_lower)
                || p.name.to_lowercase().contains(&partial_lower)
        })
        .map(|p| p.id)
        .take(25)
        .collect()
}
