//! Repository pattern for database operations
//!
//! Implements the document and chat history stores over Postgres
//! with read/write connection routing.

use crate::db::models::*;
use crate::db::stores::{ChatHistoryStore, DocumentStore, SessionSummary};
use crate::db::DbPool;
use crate::errors::Result;
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    QueryFilter, QueryOrder, QueryResult, QuerySelect, Set, Statement,
};
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}

// ============================================================================
// Document Operations
// ============================================================================

#[async_trait]
impl DocumentStore for Repository {
    async fn create(&self, record: DocumentRecord) -> Result<Uuid> {
        let document = DocumentActiveModel {
            id: Set(record.id),
            tenant_id: Set(record.tenant_id),
            file_name: Set(record.file_name),
            file_path: Set(record.file_path),
            file_size: Set(record.file_size),
            document_type: Set(record.document_type),
            uploaded_by: Set(record.uploaded_by),
            upload_date: Set(record.upload_date),
            chunk_count: Set(record.chunk_count),
            entity_summary: Set(record.entity_summary),
            processing_metadata: Set(record.processing_metadata),
        };

        let inserted = document.insert(self.write_conn()).await?;
        Ok(inserted.id)
    }

    async fn get_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<DocumentRecord>> {
        DocumentEntity::find()
            .filter(DocumentColumn::TenantId.eq(tenant_id))
            .order_by_desc(DocumentColumn::UploadDate)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn get(&self, id: Uuid, tenant_id: Uuid) -> Result<Option<DocumentRecord>> {
        DocumentEntity::find_by_id(id)
            .filter(DocumentColumn::TenantId.eq(tenant_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn delete(&self, id: Uuid, tenant_id: Uuid) -> Result<bool> {
        let result = DocumentEntity::delete_many()
            .filter(DocumentColumn::Id.eq(id))
            .filter(DocumentColumn::TenantId.eq(tenant_id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }
}

// ============================================================================
// Chat History Operations
// ============================================================================

#[async_trait]
impl ChatHistoryStore for Repository {
    async fn save(&self, record: ChatRecord) -> Result<()> {
        let message = ChatMessageActiveModel {
            id: Set(record.id),
            tenant_id: Set(record.tenant_id),
            user_id: Set(record.user_id),
            session_id: Set(record.session_id),
            query: Set(record.query),
            answer: Set(record.answer),
            sources: Set(record.sources),
            confidence: Set(record.confidence),
            response_type: Set(record.response_type),
            context_chunks: Set(record.context_chunks),
            response_time_ms: Set(record.response_time_ms),
            created_at: Set(record.created_at),
        };

        message.insert(self.write_conn()).await?;
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        limit: u64,
        session_id: Option<&str>,
    ) -> Result<Vec<ChatRecord>> {
        let mut query = ChatMessageEntity::find()
            .filter(ChatMessageColumn::TenantId.eq(tenant_id))
            .filter(ChatMessageColumn::UserId.eq(user_id));

        if let Some(session) = session_id {
            query = query.filter(ChatMessageColumn::SessionId.eq(session));
        }

        query
            .order_by_desc(ChatMessageColumn::CreatedAt)
            .limit(limit)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn sessions(&self, tenant_id: Uuid, user_id: &str) -> Result<Vec<SessionSummary>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT
                session_id,
                COUNT(*) AS message_count,
                (ARRAY_AGG(query ORDER BY created_at ASC))[1] AS first_query,
                MAX(created_at) AS last_activity
            FROM chat_messages
            WHERE tenant_id = $1 AND user_id = $2
            GROUP BY session_id
            ORDER BY last_activity DESC
            "#,
            vec![tenant_id.into(), user_id.into()],
        );

        let sessions = self
            .read_conn()
            .query_all(stmt)
            .await?
            .into_iter()
            .filter_map(|row: QueryResult| {
                Some(SessionSummary {
                    session_id: row.try_get_by_index::<String>(0).ok()?,
                    message_count: row.try_get_by_index::<i64>(1).ok()?,
                    first_query: row.try_get_by_index::<String>(2).ok()?,
                    last_activity: row.try_get_by_index(3).ok()?,
                })
            })
            .collect();

        Ok(sessions)
    }
}
