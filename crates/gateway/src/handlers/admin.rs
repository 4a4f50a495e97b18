//! Runtime configuration handlers (admin scope)

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;
use docforge_common::{
    auth::{AuthContext, ADMIN_SCOPE},
    config::{ConfigUpdate, DocumentTypeProfile, EnterpriseConfig},
    errors::Result,
};

#[derive(Serialize)]
pub struct ConfigValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct ConfigResponse {
    pub config: EnterpriseConfig,
    pub validation: ConfigValidation,
}

impl From<EnterpriseConfig> for ConfigResponse {
    fn from(config: EnterpriseConfig) -> Self {
        let validation = match config.ensure_valid() {
            Ok(()) => ConfigValidation { valid: true, error: None },
            Err(e) => ConfigValidation {
                valid: false,
                error: Some(e.to_string()),
            },
        };
        Self { config, validation }
    }
}

#[derive(Serialize)]
pub struct DocumentTypesResponse {
    pub document_types: Vec<DocumentTypeProfile>,
}

/// Configuration currently in effect
pub async fn get_config(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ConfigResponse>> {
    auth.require_scope(ADMIN_SCOPE)?;
    Ok(Json(state.settings.snapshot().await.into()))
}

/// Apply a partial update; an invalid update leaves the old values in place
pub async fn update_config(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(update): Json<ConfigUpdate>,
) -> Result<Json<ConfigResponse>> {
    auth.require_scope(ADMIN_SCOPE)?;

    let config = state.settings.update(&update).await?;
    state.engine.clear_cache().await;

    tracing::info!(user_id = %auth.user_id, "Configuration updated by admin");
    Ok(Json(config.into()))
}

/// Restore the configuration loaded at startup
pub async fn reset_config(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ConfigResponse>> {
    auth.require_scope(ADMIN_SCOPE)?;

    let config = state.settings.reset().await;
    state.engine.clear_cache().await;

    tracing::info!(user_id = %auth.user_id, "Configuration reset by admin");
    Ok(Json(config.into()))
}

/// Specialised settings per document type
pub async fn document_types(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<DocumentTypesResponse>> {
    auth.require_scope(ADMIN_SCOPE)?;

    Ok(Json(DocumentTypesResponse {
        document_types: state.settings.snapshot().await.document_type_profiles(),
    }))
}
