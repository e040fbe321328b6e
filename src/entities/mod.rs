//! Entity module - `SeaORM` entity definitions for the database.

pub mod record;

pub use record::{Column as RecordColumn, Entity as RecordEntity, Model as RecordModel};
