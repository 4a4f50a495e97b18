//! Document entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub file_name: String,

    #[sea_orm(column_type = "Text")]
    pub file_path: String,

    pub file_size: i64,

    #[sea_orm(column_type = "Text")]
    pub document_type: String,

    #[sea_orm(column_type = "Text")]
    pub uploaded_by: String,

    pub upload_date: DateTimeWithTimeZone,

    pub chunk_count: i32,

    /// Aggregated entity counts and key insights
    #[sea_orm(column_type = "JsonBinary")]
    pub entity_summary: serde_json::Value,

    /// Chunk types, word totals, timings
    #[sea_orm(column_type = "JsonBinary")]
    pub processing_metadata: serde_json::Value,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
