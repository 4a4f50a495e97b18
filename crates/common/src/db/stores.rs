//! Persistence seams for document metadata and chat history
//!
//! Provides:
//! - `DocumentStore` and `ChatHistoryStore` traits
//! - In-process implementations for local runs and tests

use super::models::{ChatRecord, DocumentRecord};
use crate::errors::Result;
use async_trait::async_trait;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Per-session aggregate of a user's chat history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub message_count: i64,
    pub first_query: String,
    pub last_activity: DateTimeWithTimeZone,
}

/// Document metadata persistence, always scoped by tenant
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist a record and return its id
    async fn create(&self, record: DocumentRecord) -> Result<Uuid>;

    /// All documents of a tenant, newest first
    async fn get_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<DocumentRecord>>;

    async fn get(&self, id: Uuid, tenant_id: Uuid) -> Result<Option<DocumentRecord>>;

    /// Returns false when no record matched for that tenant
    async fn delete(&self, id: Uuid, tenant_id: Uuid) -> Result<bool>;
}

/// Chat history persistence
#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    async fn save(&self, record: ChatRecord) -> Result<()>;

    /// Most recent messages first, optionally restricted to one session
    async fn get(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        limit: u64,
        session_id: Option<&str>,
    ) -> Result<Vec<ChatRecord>>;

    /// Sessions ordered by last activity, newest first
    async fn sessions(&self, tenant_id: Uuid, user_id: &str) -> Result<Vec<SessionSummary>>;
}

/// Document store backed by a map
#[derive(Default)]
pub struct InMemoryDocumentStore {
    records: RwLock<HashMap<Uuid, DocumentRecord>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create(&self, record: DocumentRecord) -> Result<Uuid> {
        let id = record.id;
        self.records.write().await.insert(id, record);
        Ok(id)
    }

    async fn get_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<DocumentRecord>> {
        let records = self.records.read().await;
        let mut docs: Vec<DocumentRecord> = records
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));
        Ok(docs)
    }

    async fn get(&self, id: Uuid, tenant_id: Uuid) -> Result<Option<DocumentRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&id).filter(|r| r.tenant_id == tenant_id).cloned())
    }

    async fn delete(&self, id: Uuid, tenant_id: Uuid) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get(&id) {
            Some(r) if r.tenant_id == tenant_id => {
                records.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Chat history kept in insertion order
#[derive(Default)]
pub struct InMemoryChatHistoryStore {
    messages: RwLock<Vec<ChatRecord>>,
}

impl InMemoryChatHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatHistoryStore for InMemoryChatHistoryStore {
    async fn save(&self, record: ChatRecord) -> Result<()> {
        self.messages.write().await.push(record);
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        limit: u64,
        session_id: Option<&str>,
    ) -> Result<Vec<ChatRecord>> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .rev()
            .filter(|m| m.tenant_id == tenant_id && m.user_id == user_id)
            .filter(|m| session_id.map_or(true, |s| m.session_id == s))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn sessions(&self, tenant_id: Uuid, user_id: &str) -> Result<Vec<SessionSummary>> {
        let messages = self.messages.read().await;
        let mut by_session: HashMap<&str, SessionSummary> = HashMap::new();

        for m in messages
            .iter()
            .filter(|m| m.tenant_id == tenant_id && m.user_id == user_id)
        {
            by_session
                .entry(m.session_id.as_str())
                .and_modify(|s| {
                    s.message_count += 1;
                    if m.created_at > s.last_activity {
                        s.last_activity = m.created_at;
                    }
                })
                .or_insert_with(|| SessionSummary {
                    session_id: m.session_id.clone(),
                    message_count: 1,
                    first_query: m.query.clone(),
                    last_activity: m.created_at,
                });
        }

        let mut sessions: Vec<SessionSummary> = by_session.into_values().collect();
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(sessions)
    }
}
