//! Named channel configuration (`logs`, `tickets`, ...).

use crate::{core::store, errors::Result, models::ChannelConfig};
use chrono::Utc;
use sea_orm::ConnectionTrait;

/// Channel name used for delivery and stock notices
pub const LOGS_CHANNEL: &str = "logs";

/// Category under which ticket channels are created
pub const TICKETS_CHANNEL: &str = "tickets";

/// Stores `channel_id` under `name`, replacing any previous value.
pub async fn set_channel<C: ConnectionTrait>(
    db: &C,
    name: &str,
    channel_id: &str,
) -> Result<ChannelConfig> {
    let config = ChannelConfig {
        name: name.trim().to_lowercase(),
        channel_id: channel_id.to_string(),
        updated_at: Utc::now(),
    };
    store::add(db, &config).await?;
    Ok(config)
}

/// Returns the channel id configured under `name`.
pub async fn get_channel<C: ConnectionTrait>(db: &C, name: &str) -> Result<Option<String>> {
    let config: Option<ChannelConfig> = store::get(db, &name.trim().to_lowercase()).await?;
    Ok(config.map(|c| c.channel_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::setup_test_db;

    #[tokio::test]
    async fn test_set_and_get_channel() -> Result<()> {
        let db = setup_test_db().await?;
        assert!(get_channel(&db, LOGS_CHANNEL).await?.is_none());

        set_channel(&db, "Logs", "123").await?;
        assert_eq!(get_channel(&db, "logs").await?.as_deref(), Some("123"));

        set_channel(&db, "logs", "456").await?;
        assert_eq!(get_channel(&db, LOGS_CHANNEL).await?.as_deref(), Some("456"));
        Ok(())
    }
}
