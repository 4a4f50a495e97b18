//! SeaORM entity models
//!
//! Database entities for DocForge

mod chat_message;
mod document;

pub use document::{
    Entity as DocumentEntity,
    Model as DocumentRecord,
    ActiveModel as DocumentActiveModel,
    Column as DocumentColumn,
};

pub use chat_message::{
    Entity as ChatMessageEntity,
    Model as ChatRecord,
    ActiveModel as ChatMessageActiveModel,
    Column as ChatMessageColumn,
};
