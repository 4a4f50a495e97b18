//! Document management handlers

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use docforge_common::{
    auth::AuthContext,
    db::DocumentRecord,
    errors::{AppError, Result},
};

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub file_name: String,
}

/// Document as returned to clients
#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub document_type: String,
    pub uploaded_by: String,
    pub upload_date: String,
    pub chunk_count: i32,
    pub processing_metadata: serde_json::Value,
}

impl From<DocumentRecord> for DocumentResponse {
    fn from(record: DocumentRecord) -> Self {
        Self {
            id: record.id,
            file_name: record.file_name,
            file_path: record.file_path,
            file_size: record.file_size,
            document_type: record.document_type,
            uploaded_by: record.uploaded_by,
            upload_date: record.upload_date.to_rfc3339(),
            chunk_count: record.chunk_count,
            processing_metadata: record.processing_metadata,
        }
    }
}

#[derive(Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentResponse>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct EntitySummaryResponse {
    pub document_id: Uuid,
    pub file_name: String,
    pub entity_summary: serde_json::Value,
}

/// Upload and index a document sent as the raw request body
pub async fn upload_document(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<DocumentResponse>)> {
    auth.require_scope("write")?;

    let file_name = params.file_name.trim();
    if file_name.is_empty() || file_name.contains(['/', '\\']) {
        return Err(AppError::Validation {
            message: "file_name must be a plain file name".to_string(),
            field: Some("file_name".to_string()),
        });
    }
    if body.is_empty() {
        return Err(AppError::Validation {
            message: "Request body is empty".to_string(),
            field: None,
        });
    }

    let record = state
        .ingestion
        .ingest(auth.tenant_id, &auth.user_id, file_name, &body)
        .await
        .map_err(AppError::from)?;

    tracing::info!(
        document_id = %record.id,
        tenant_id = %auth.tenant_id,
        chunk_count = record.chunk_count,
        "Document uploaded"
    );

    Ok((StatusCode::CREATED, Json(record.into())))
}

/// List the tenant's documents, newest first
pub async fn list_documents(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<DocumentListResponse>> {
    let documents: Vec<DocumentResponse> = state
        .documents
        .get_by_tenant(auth.tenant_id)
        .await?
        .into_iter()
        .map(DocumentResponse::from)
        .collect();

    Ok(Json(DocumentListResponse {
        total: documents.len(),
        documents,
    }))
}

/// Delete a document and its vectors
pub async fn delete_document(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(document_id): Path<Uuid>,
) -> Result<StatusCode> {
    auth.require_scope("write")?;

    let deleted = state
        .ingestion
        .delete_document(auth.tenant_id, document_id)
        .await
        .map_err(AppError::from)?;

    if !deleted {
        return Err(AppError::DocumentNotFound {
            id: document_id.to_string(),
        });
    }

    tracing::info!(
        document_id = %document_id,
        tenant_id = %auth.tenant_id,
        "Document deleted"
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Entity summary stored at ingestion
pub async fn get_entities(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(document_id): Path<Uuid>,
) -> Result<Json<EntitySummaryResponse>> {
    let record = state
        .documents
        .get(document_id, auth.tenant_id)
        .await?
        .ok_or_else(|| AppError::DocumentNotFound {
            id: document_id.to_string(),
        })?;

    Ok(Json(EntitySummaryResponse {
        document_id: record.id,
        file_name: record.file_name,
        entity_summary: record.entity_summary,
    }))
}
