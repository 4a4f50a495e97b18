//! Query handlers

use axum::{extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use docforge_common::{
    auth::AuthContext,
    db::ChatRecord,
    errors::{AppError, Result},
    QueryRequest, QueryResult,
};

/// Query request body
#[derive(Debug, Deserialize, Validate)]
pub struct QueryBody {
    #[validate(length(min = 1))]
    pub query: String,

    /// Overrides the retrieval breadth and final chunk count
    #[validate(range(min = 1, max = 100))]
    pub top_k: Option<usize>,

    /// Conversation to append to; a new one is started when absent
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Query response
#[derive(Serialize)]
pub struct QueryResponse {
    #[serde(flatten)]
    pub result: QueryResult,
    pub session_id: String,
    pub processing_time_ms: u64,
}

/// Answer a question over the tenant's documents
pub async fn query(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryResponse>> {
    let start = Instant::now();

    body.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let query = body.query.trim();
    if query.is_empty() {
        return Err(AppError::Validation {
            message: "Query cannot be empty".to_string(),
            field: Some("query".to_string()),
        });
    }
    let max_chars = state.config.server.max_query_chars;
    if query.chars().count() > max_chars {
        return Err(AppError::Validation {
            message: format!("Query exceeds {} characters", max_chars),
            field: Some("query".to_string()),
        });
    }

    let request = QueryRequest {
        tenant_id: auth.namespace(),
        query: query.to_string(),
        top_k: body.top_k,
    };
    let result = state.engine.answer(&request).await?;

    let processing_time_ms = start.elapsed().as_millis() as u64;
    let session_id = body
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let record = ChatRecord {
        id: Uuid::now_v7(),
        tenant_id: auth.tenant_id,
        user_id: auth.user_id.clone(),
        session_id: session_id.clone(),
        query: request.query.clone(),
        answer: result.answer.clone(),
        sources: serde_json::to_value(&result.sources).unwrap_or_default(),
        confidence: f64::from(result.confidence),
        response_type: result.response_type.as_str().to_string(),
        context_chunks: result.processing_metadata.chunks_used as i32,
        response_time_ms: processing_time_ms as i64,
        created_at: Utc::now().fixed_offset(),
    };
    if let Err(e) = state.chat_history.save(record).await {
        tracing::warn!(error = %e, session_id = %session_id, "Failed to save chat history");
    }

    tracing::info!(
        tenant_id = %auth.tenant_id,
        response_type = result.response_type.as_str(),
        sources = result.sources.len(),
        processing_time_ms,
        "Query answered"
    );

    Ok(Json(QueryResponse {
        result,
        session_id,
        processing_time_ms,
    }))
}
