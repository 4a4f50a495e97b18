//! Chat message entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chat_messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub user_id: String,

    #[sea_orm(column_type = "Text")]
    pub session_id: String,

    #[sea_orm(column_type = "Text")]
    pub query: String,

    #[sea_orm(column_type = "Text")]
    pub answer: String,

    /// Formatted sources as returned to the client
    #[sea_orm(column_type = "JsonBinary")]
    pub sources: serde_json::Value,

    pub confidence: f64,

    #[sea_orm(column_type = "Text")]
    pub response_type: String,

    pub context_chunks: i32,

    pub response_time_ms: i64,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
