//! Record entity - one row per stored domain record.
//!
//! Rows are keyed by `(collection, record_id)`. The `body` column holds the JSON
//! serialization of the domain type (see [`crate::models`]), which keeps the
//! keyed-by-id shape of the original flat JSON files while giving us
//! transactional writes.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Record database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "records")]
pub struct Model {
    /// Collection name (e.g., `"payments"`)
    #[sea_orm(primary_key, auto_increment = false)]
    pub collection: String,
    /// Id of the record inside its collection
    #[sea_orm(primary_key, auto_increment = false)]
    pub record_id: String,
    /// JSON body of the record
    #[sea_orm(column_type = "Text")]
    pub body: String,
    /// When the row was last written
    pub updated_at: DateTimeUtc,
}

/// Records have no relationships; collections reference each other by id only
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
