//! Chat history handlers

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use docforge_common::{
    auth::AuthContext,
    db::{ChatRecord, SessionSummary},
    errors::Result,
};

const MAX_HISTORY_LIMIT: u64 = 500;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_limit")]
    pub limit: u64,
    pub session_id: Option<String>,
}

fn default_limit() -> u64 { 50 }

#[derive(Serialize)]
pub struct ChatHistoryResponse {
    pub messages: Vec<ChatRecord>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
    pub total: usize,
}

/// Recent messages of the calling user, newest first
pub async fn get_history(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<HistoryParams>,
) -> Result<Json<ChatHistoryResponse>> {
    let limit = params.limit.clamp(1, MAX_HISTORY_LIMIT);
    let messages = state
        .chat_history
        .get(
            auth.tenant_id,
            &auth.user_id,
            limit,
            params.session_id.as_deref(),
        )
        .await?;

    Ok(Json(ChatHistoryResponse {
        total: messages.len(),
        messages,
    }))
}

/// Sessions of the calling user, most recently active first
pub async fn get_sessions(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<SessionListResponse>> {
    let sessions = state
        .chat_history
        .sessions(auth.tenant_id, &auth.user_id)
        .await?;

    Ok(Json(SessionListResponse {
        total: sessions.len(),
        sessions,
    }))
}
