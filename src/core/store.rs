//! Record store - keyed JSON collections on top of `SeaORM`.
//!
//! Each collection is a map from record id to a serialized domain record. All
//! functions are generic over [`ConnectionTrait`], so they work both on the
//! plain connection and inside a transaction opened with `db.begin()`. Whole
//! collection writes (`save`, `clear`) run in their own transaction: either
//! the new contents are visible or the previous contents are left intact.

use crate::{
    entities::{RecordColumn, RecordEntity, record},
    errors::{Error, Result},
    models::Record,
};
use chrono::Utc;
use sea_orm::{
    ConnectionTrait, PaginatorTrait, QueryOrder, Set, TransactionTrait, prelude::*,
    sea_query::OnConflict,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

fn to_active_model<T: Record>(value: &T) -> Result<record::ActiveModel> {
    Ok(record::ActiveModel {
        collection: Set(T::COLLECTION.name().to_string()),
        record_id: Set(value.record_id().to_string()),
        body: Set(serde_json::to_string(value)?),
        updated_at: Set(Utc::now()),
    })
}

fn decode<T: Record>(row: &record::Model) -> Option<T> {
    match serde_json::from_str(&row.body) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(
                collection = %row.collection,
                record_id = %row.record_id,
                "Skipping unreadable record: {}",
                e
            );
            None
        }
    }
}

async fn rows<T: Record, C: ConnectionTrait>(db: &C) -> Result<Vec<record::Model>> {
    RecordEntity::find()
        .filter(RecordColumn::Collection.eq(T::COLLECTION.name()))
        .order_by_asc(RecordColumn::RecordId)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Loads a whole collection keyed by record id.
///
/// Rows that fail to deserialize are logged and left out.
pub async fn load<T: Record, C: ConnectionTrait>(db: &C) -> Result<BTreeMap<String, T>> {
    let rows = rows::<T, C>(db).await?;
    Ok(rows
        .iter()
        .filter_map(|row| decode::<T>(row).map(|value| (row.record_id.clone(), value)))
        .collect())
}

/// Replaces a whole collection with `data`.
///
/// Runs in a single transaction; on failure the previous contents stay in place.
pub async fn save<T: Record, C: ConnectionTrait + TransactionTrait>(
    db: &C,
    data: &BTreeMap<String, T>,
) -> Result<()> {
    let models = data
        .values()
        .map(to_active_model)
        .collect::<Result<Vec<_>>>()?;

    let txn = db.begin().await?;
    RecordEntity::delete_many()
        .filter(RecordColumn::Collection.eq(T::COLLECTION.name()))
        .exec(&txn)
        .await?;
    if !models.is_empty() {
        RecordEntity::insert_many(models).exec_without_returning(&txn).await?;
    }
    txn.commit().await?;

    debug!(collection = %T::COLLECTION, count = data.len(), "Collection saved");
    Ok(())
}

/// Fetches one record by id.
pub async fn get<T: Record, C: ConnectionTrait>(db: &C, id: &str) -> Result<Option<T>> {
    let row = RecordEntity::find_by_id((T::COLLECTION.name().to_string(), id.to_string()))
        .one(db)
        .await?;
    Ok(row.as_ref().and_then(decode::<T>))
}

/// Inserts or overwrites a record.
pub async fn add<T: Record, C: ConnectionTrait>(db: &C, value: &T) -> Result<()> {
    RecordEntity::insert(to_active_model(value)?)
        .on_conflict(
            OnConflict::columns([RecordColumn::Collection, RecordColumn::RecordId])
                .update_columns([RecordColumn::Body, RecordColumn::UpdatedAt])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

/// Inserts a record only when its id is not taken yet.
///
/// Returns `true` when the record was inserted, `false` when one already existed.
pub async fn insert_if_absent<T: Record, C: ConnectionTrait>(db: &C, value: &T) -> Result<bool> {
    let inserted = RecordEntity::insert(to_active_model(value)?)
        .on_conflict(
            OnConflict::columns([RecordColumn::Collection, RecordColumn::RecordId])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(inserted > 0)
}

/// Read-modify-write of a single record inside a transaction.
///
/// Returns the updated record, or `None` when the id does not exist. The patch
/// closure must not change the record id.
pub async fn update<T, C, F>(db: &C, id: &str, patch: F) -> Result<Option<T>>
where
    T: Record,
    C: ConnectionTrait + TransactionTrait,
    F: FnOnce(&mut T) + Send,
{
    let txn = db.begin().await?;
    let Some(mut value) = get::<T, _>(&txn, id).await? else {
        return Ok(None);
    };
    patch(&mut value);
    if value.record_id() != id {
        return Err(Error::InvalidInput {
            message: format!("Record id cannot change during update ({id})"),
        });
    }
    add(&txn, &value).await?;
    txn.commit().await?;
    Ok(Some(value))
}

/// Deletes a record. Returns whether something was deleted.
pub async fn remove<T: Record, C: ConnectionTrait>(db: &C, id: &str) -> Result<bool> {
    let result = RecordEntity::delete_by_id((T::COLLECTION.name().to_string(), id.to_string()))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

/// All records matching `predicate`, in id order.
pub async fn find<T, C, P>(db: &C, predicate: P) -> Result<Vec<T>>
where
    T: Record,
    C: ConnectionTrait,
    P: Fn(&T) -> bool,
{
    let rows = rows::<T, C>(db).await?;
    Ok(rows
        .iter()
        .filter_map(decode::<T>)
        .filter(|value| predicate(value))
        .collect())
}

/// First record matching `predicate`.
pub async fn find_one<T, C, P>(db: &C, predicate: P) -> Result<Option<T>>
where
    T: Record,
    C: ConnectionTrait,
    P: Fn(&T) -> bool,
{
    let rows = rows::<T, C>(db).await?;
    Ok(rows.iter().filter_map(decode::<T>).find(|value| predicate(value)))
}

/// Number of rows in the collection.
pub async fn count<T: Record, C: ConnectionTrait>(db: &C) -> Result<u64> {
    RecordEntity::find()
        .filter(RecordColumn::Collection.eq(T::COLLECTION.name()))
        .count(db)
        .await
        .map_err(Into::into)
}

/// Writes the collection as a keyed JSON object into `dir`.
///
/// The file is named `<stem>_backup_<YYYYMMDD_HHMMSSmmm>.json` and written through
/// a temporary file plus rename. Returns the final path.
pub async fn backup<T: Record, C: ConnectionTrait>(db: &C, dir: &Path) -> Result<PathBuf> {
    let data = load::<T, C>(db).await?;
    let json = serde_json::to_string_pretty(&data)?;

    let stem = T::COLLECTION
        .file_name()
        .trim_end_matches(".json")
        .to_string();
    let file_name = format!("{stem}_backup_{}.json", Utc::now().format("%Y%m%d_%H%M%S%3f"));
    let path = dir.join(file_name);
    let tmp_path = path.with_extension("json.tmp");

    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&tmp_path, json).await?;
    tokio::fs::rename(&tmp_path, &path).await?;

    info!(collection = %T::COLLECTION, path = %path.display(), "Backup written");
    Ok(path)
}

/// Backs the collection up, then deletes every record in it.
///
/// Returns the backup path. Nothing is deleted if the backup fails.
pub async fn clear<T: Record, C: ConnectionTrait + TransactionTrait>(
    db: &C,
    backup_dir: &Path,
) -> Result<PathBuf> {
    let path = backup::<T, C>(db, backup_dir).await?;
    save::<T, C>(db, &BTreeMap::new()).await?;
    warn!(collection = %T::COLLECTION, backup = %path.display(), "Collection cleared");
    Ok(path)
}

/// Imports a legacy keyed JSON file (`{"<id>": {...}, ...}`) into the collection.
///
/// Entries that fail to parse are skipped. Existing records with the same id are
/// overwritten. Returns how many records were imported.
pub async fn import_legacy_file<T: Record, C: ConnectionTrait>(db: &C, path: &Path) -> Result<usize> {
    let contents = tokio::fs::read_to_string(path).await?;
    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(&contents)?;

    let mut imported = 0;
    for (key, value) in raw {
        match serde_json::from_value::<T>(value) {
            Ok(record) => {
                add(db, &record).await?;
                imported += 1;
            }
            Err(e) => warn!(
                collection = %T::COLLECTION,
                key = %key,
                "Skipping legacy entry: {}",
                e
            ),
        }
    }

    info!(collection = %T::COLLECTION, imported, "Legacy file imported from {}", path.display());
    Ok(imported)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::models::{ChannelConfig, IdentityLink};
    use crate::test_utils::*;

    fn channel(name: &str, channel_id: &str) -> ChannelConfig {
        ChannelConfig {
            name: name.to_string(),
            channel_id: channel_id.to_string(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() -> Result<()> {
        let db = setup_test_db().await?;

        let mut data = BTreeMap::new();
        data.insert("logs".to_string(), channel("logs", "111"));
        data.insert("tickets".to_string(), channel("tickets", "222"));
        save(&db, &data).await?;

        let loaded: BTreeMap<String, ChannelConfig> = load(&db).await?;
        assert_eq!(loaded, data);
        Ok(())
    }

    #[tokio::test]
    async fn test_save_replaces_previous_contents() -> Result<()> {
        let db = setup_test_db().await?;
        add(&db, &channel("old", "1")).await?;

        let mut data = BTreeMap::new();
        data.insert("new".to_string(), channel("new", "2"));
        save(&db, &data).await?;

        let loaded: BTreeMap<String, ChannelConfig> = load(&db).await?;
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("new"));
        Ok(())
    }

    #[tokio::test]
    async fn test_collections_are_isolated() -> Result<()> {
        let db = setup_test_db().await?;
        add(&db, &channel("logs", "1")).await?;
        create_test_link(&db, "user1", "76561198000000001").await?;

        assert_eq!(count::<ChannelConfig, _>(&db).await?, 1);
        assert_eq!(count::<IdentityLink, _>(&db).await?, 1);

        let links: BTreeMap<String, IdentityLink> = load(&db).await?;
        assert!(links.contains_key("user1"));
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_if_absent_is_idempotent() -> Result<()> {
        let db = setup_test_db().await?;

        assert!(insert_if_absent(&db, &channel("logs", "1")).await?);
        assert!(!insert_if_absent(&db, &channel("logs", "2")).await?);

        let stored: ChannelConfig = get(&db, "logs").await?.unwrap();
        assert_eq!(stored.channel_id, "1");
        assert_eq!(count::<ChannelConfig, _>(&db).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_and_remove() -> Result<()> {
        let db = setup_test_db().await?;
        add(&db, &channel("logs", "1")).await?;

        let updated = update::<ChannelConfig, _, _>(&db, "logs", |c| {
            c.channel_id = "9".to_string();
        })
        .await?;
        assert_eq!(updated.unwrap().channel_id, "9");

        let missing = update::<ChannelConfig, _, _>(&db, "nope", |_| {}).await?;
        assert!(missing.is_none());

        let renamed = update::<ChannelConfig, _, _>(&db, "logs", |c| {
            c.name = "other".to_string();
        })
        .await;
        assert!(matches!(renamed, Err(Error::InvalidInput { .. })));
        let stored: ChannelConfig = get(&db, "logs").await?.unwrap();
        assert_eq!(stored.channel_id, "9");

        assert!(remove::<ChannelConfig, _>(&db, "logs").await?);
        assert!(!remove::<ChannelConfig, _>(&db, "logs").await?);
        assert!(get::<ChannelConfig, _>(&db, "logs").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_find_and_find_one() -> Result<()> {
        let db = setup_test_db().await?;
        add(&db, &channel("a", "1")).await?;
        add(&db, &channel("b", "2")).await?;
        add(&db, &channel("c", "2")).await?;

        let twos: Vec<ChannelConfig> = find(&db, |c: &ChannelConfig| c.channel_id == "2").await?;
        assert_eq!(twos.len(), 2);

        let first: Option<ChannelConfig> =
            find_one(&db, |c: &ChannelConfig| c.channel_id == "2").await?;
        assert_eq!(first.unwrap().name, "b");
        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_rows_are_skipped() -> Result<()> {
        let db = setup_test_db().await?;
        add(&db, &channel("good", "1")).await?;
        RecordEntity::insert(record::ActiveModel {
            collection: Set("channels".to_string()),
            record_id: Set("broken".to_string()),
            body: Set("{not json".to_string()),
            updated_at: Set(Utc::now()),
        })
        .exec_without_returning(&db)
        .await?;

        let loaded: BTreeMap<String, ChannelConfig> = load(&db).await?;
        assert_eq!(loaded.len(), 1);
        assert!(get::<ChannelConfig, _>(&db, "broken").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_writes_backup_first() -> Result<()> {
        let db = setup_test_db().await?;
        let dir = tempfile::tempdir()?;
        add(&db, &channel("logs", "1")).await?;

        let path = clear::<ChannelConfig, _>(&db, dir.path()).await?;
        assert!(path.exists());
        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with("channels_backup_"));

        let backed_up: BTreeMap<String, ChannelConfig> =
            serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert!(backed_up.contains_key("logs"));
        assert_eq!(count::<ChannelConfig, _>(&db).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_import_legacy_file() -> Result<()> {
        let db = setup_test_db().await?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("channels.json");
        std::fs::write(
            &path,
            r#"{
                "logs": {"name": "logs", "channelId": "1", "updatedAt": "2024-01-01T00:00:00Z"},
                "bad": {"name": 5}
            }"#,
        )?;

        let imported = import_legacy_file::<ChannelConfig, _>(&db, &path).await?;
        assert_eq!(imported, 1);
        assert!(get::<ChannelConfig, _>(&db, "logs").await?.is_some());
        Ok(())
    }
}
