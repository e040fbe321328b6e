//! Identity links between Discord users and game-server accounts.
//!
//! A user has at most one link and a game account can be bound to a single
//! user. The check and the write run inside one database transaction so two
//! concurrent link attempts for the same account cannot both succeed.

use crate::{
    core::store,
    errors::{Error, Result},
    models::IdentityLink,
};
use chrono::Utc;
use sea_orm::{ConnectionTrait, TransactionTrait};
use tracing::{info, instrument};

/// Checks that `steam_id` looks like a `SteamID64` (17 digits, starting with 7656).
pub fn validate_steam_id(steam_id: &str) -> Result<()> {
    let valid = steam_id.len() == 17
        && steam_id.chars().all(|c| c.is_ascii_digit())
        && steam_id.starts_with("7656");
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput {
            message: "Invalid SteamID. It must be a 17 digit SteamID64 (e.g. 76561198000000000)."
                .to_string(),
        })
    }
}

/// Returns the link of a Discord user.
pub async fn get_link<C: ConnectionTrait>(db: &C, user_id: &str) -> Result<Option<IdentityLink>> {
    store::get(db, user_id).await
}

/// Returns the link holding a game account, if any.
pub async fn find_by_external_id<C: ConnectionTrait>(
    db: &C,
    steam_id: &str,
) -> Result<Option<IdentityLink>> {
    store::find_one(db, |l: &IdentityLink| l.steam_id == steam_id).await
}

/// Links (or relinks) `user_id` to `steam_id` on behalf of `actor`.
///
/// # Errors
/// - [`Error::InvalidInput`] for a malformed id
/// - [`Error::AlreadyLinked`] when another user already holds `steam_id`
#[instrument(skip(db))]
pub async fn link_identity<C: ConnectionTrait + TransactionTrait>(
    db: &C,
    user_id: &str,
    steam_id: &str,
    actor: &str,
) -> Result<IdentityLink> {
    let steam_id = steam_id.trim();
    validate_steam_id(steam_id)?;

    let txn = db.begin().await?;

    if let Some(holder) = find_by_external_id(&txn, steam_id).await? {
        if holder.user_id != user_id {
            return Err(Error::AlreadyLinked {
                external_id: steam_id.to_string(),
                user_id: holder.user_id,
            });
        }
    }

    let now = Utc::now();
    let link = match get_link(&txn, user_id).await? {
        Some(existing) => IdentityLink {
            steam_id: steam_id.to_string(),
            updated_at: Some(now),
            updated_by: Some(actor.to_string()),
            ..existing
        },
        None => IdentityLink {
            user_id: user_id.to_string(),
            steam_id: steam_id.to_string(),
            linked_at: now,
            linked_by: actor.to_string(),
            updated_at: None,
            updated_by: None,
        },
    };
    store::add(&txn, &link).await?;
    txn.commit().await?;

    info!("Identity linked");
    Ok(link)
}

/// Removes the link of a user. Returns the removed link.
pub async fn unlink_identity<C: ConnectionTrait>(db: &C, user_id: &str) -> Result<Option<IdentityLink>> {
    let existing = get_link(db, user_id).await?;
    if existing.is_some() {
        store::remove::<IdentityLink, _>(db, user_id).await?;
        info!(user_id, "Identity unlinked");
    }
    Ok(existing)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;

    const STEAM_A: &str = "76561198000000001";
    const STEAM_B: &str = "76561198000000002";

    #[test]
    fn test_validate_steam_id() {
        assert!(validate_steam_id(STEAM_A).is_ok());
        assert!(validate_steam_id("1234").is_err());
        assert!(validate_steam_id("7656119800000000x").is_err());
        assert!(validate_steam_id("12345678901234567").is_err());
    }

    #[tokio::test]
    async fn test_link_and_relink() -> Result<()> {
        let db = setup_test_db().await?;

        let link = link_identity(&db, "u1", STEAM_A, "u1").await?;
        assert_eq!(link.steam_id, STEAM_A);
        assert!(link.updated_at.is_none());

        let relinked = link_identity(&db, "u1", STEAM_B, "admin").await?;
        assert_eq!(relinked.steam_id, STEAM_B);
        assert_eq!(relinked.linked_by, "u1");
        assert_eq!(relinked.updated_by.as_deref(), Some("admin"));

        assert!(find_by_external_id(&db, STEAM_A).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_same_account_cannot_be_linked_twice() -> Result<()> {
        let db = setup_test_db().await?;
        link_identity(&db, "u1", STEAM_A, "u1").await?;

        let result = link_identity(&db, "u2", STEAM_A, "u2").await;
        assert!(matches!(
            result,
            Err(Error::AlreadyLinked { ref user_id, .. }) if user_id == "u1"
        ));
        assert!(get_link(&db, "u2").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_links_for_same_account() -> Result<()> {
        let db = setup_test_db().await?;

        let (first, second) = tokio::join!(
            link_identity(&db, "u1", STEAM_A, "u1"),
            link_identity(&db, "u2", STEAM_A, "u2"),
        );

        let successes = [first.is_ok(), second.is_ok()];
        assert_eq!(successes.iter().filter(|ok| **ok).count(), 1);
        assert!(
            matches!(first, Err(Error::AlreadyLinked { .. }))
                || matches!(second, Err(Error::AlreadyLinked { .. }))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_unlink() -> Result<()> {
        let db = setup_test_db().await?;
        link_identity(&db, "u1", STEAM_A, "u1").await?;

        let removed = unlink_identity(&db, "u1").await?;
        assert_eq!(removed.unwrap().steam_id, STEAM_A);
        assert!(unlink_identity(&db, "u1").await?.is_none());

        link_identity(&db, "u2", STEAM_A, "u2").await?;
        Ok(())
    }
}
