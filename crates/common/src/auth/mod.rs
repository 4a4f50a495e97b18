//! Authentication and authorization utilities
//!
//! Provides:
//! - API key validation
//! - JWT token generation and validation
//! - Tenant context extraction

use crate::config::AuthConfig;
use crate::errors::{AppError, Result};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Scope granting access to configuration management
pub const ADMIN_SCOPE: &str = "admin";

/// Extracted authentication context available to handlers
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Tenant ID
    pub tenant_id: Uuid,

    /// User identifier (JWT subject or user header)
    pub user_id: String,

    /// API key (if authenticated via API key)
    pub api_key: Option<String>,

    /// Scopes/permissions
    pub scopes: Vec<String>,

    /// Request ID for tracing
    pub request_id: String,
}

impl AuthContext {
    /// Vector store namespace for this tenant
    pub fn namespace(&self) -> String {
        self.tenant_id.to_string()
    }

    /// Check if the context has a specific scope
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope || s == ADMIN_SCOPE)
    }

    /// Require a specific scope, returning error if not present
    pub fn require_scope(&self, scope: &str) -> Result<()> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(AppError::Forbidden {
                message: format!("Missing required scope: {}", scope),
            })
        }
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID)
    pub sub: String,

    /// Tenant ID
    pub tenant_id: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Scopes
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// JWT token manager
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: i64,
}

impl JwtManager {
    /// Create a new JWT manager with the given secret
    pub fn new(secret: &str, expiration_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_secs: expiration_secs as i64,
        }
    }

    /// Generate a new JWT token
    pub fn generate_token(
        &self,
        user_id: &str,
        tenant_id: Uuid,
        scopes: Vec<String>,
    ) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiration_secs);

        let claims = JwtClaims {
            sub: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            scopes,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal {
                message: format!("Failed to generate token: {}", e),
            })
    }

    /// Validate and decode a JWT token
    pub fn validate_token(&self, token: &str) -> Result<JwtClaims> {
        decode::<JwtClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::InvalidApiKey,
            })
    }
}

/// Credentials policy consulted by the [`AuthContext`] extractor
pub struct AuthSettings {
    jwt: Option<JwtManager>,
    api_key_hashes: Vec<String>,
    tenant_header: String,
    user_header: String,
}

impl AuthSettings {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            jwt: config
                .jwt_secret
                .as_deref()
                .map(|secret| JwtManager::new(secret, config.jwt_expiration_secs)),
            api_key_hashes: config.api_key_hashes.clone(),
            tenant_header: config.tenant_header.to_ascii_lowercase(),
            user_header: config.user_header.to_ascii_lowercase(),
        }
    }

    /// JWT manager, when a signing secret is configured
    pub fn jwt(&self) -> Option<&JwtManager> {
        self.jwt.as_ref()
    }

    fn api_key_accepted(&self, key: &str) -> bool {
        if !key.starts_with("pk_") {
            return false;
        }
        self.api_key_hashes.is_empty()
            || self
                .api_key_hashes
                .iter()
                .any(|stored| validate_api_key(key, stored))
    }

    /// Resolve a bearer credential into an authentication context
    pub fn authenticate(
        &self,
        tenant_id: Uuid,
        bearer: &str,
        user_hint: Option<&str>,
        request_id: String,
    ) -> Result<AuthContext> {
        if bearer.starts_with("pk_") {
            if !self.api_key_accepted(bearer) {
                return Err(AppError::InvalidApiKey);
            }
            return Ok(AuthContext {
                tenant_id,
                user_id: user_hint.unwrap_or("api-key").to_string(),
                api_key: Some(bearer.to_string()),
                scopes: vec!["read".to_string(), "write".to_string()],
                request_id,
            });
        }

        let jwt = self.jwt.as_ref().ok_or(AppError::InvalidApiKey)?;
        let claims = jwt.validate_token(bearer)?;
        if claims.tenant_id != tenant_id.to_string() {
            return Err(AppError::TenantMismatch);
        }

        Ok(AuthContext {
            tenant_id,
            user_id: claims.sub,
            api_key: None,
            scopes: claims.scopes,
            request_id,
        })
    }
}

/// Hash an API key for storage
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Validate an API key against a stored hash
pub fn validate_api_key(api_key: &str, stored_hash: &str) -> bool {
    hash_api_key(api_key) == stored_hash
}

/// Extract bearer credential from Authorization header
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Axum extractor for AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
    Arc<AuthSettings>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let settings = Arc::<AuthSettings>::from_ref(state);

        // Extract request ID
        let request_id = header_str(parts, "x-request-id")
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Extract tenant ID
        let tenant_id = header_str(parts, &settings.tenant_header)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing or invalid X-Tenant-ID header".to_string(),
            })?;

        // Extract API key or JWT
        let bearer = header_str(parts, "authorization")
            .and_then(extract_bearer)
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
            })?;

        let user_hint = header_str(parts, &settings.user_header);
        settings.authenticate(tenant_id, bearer, user_hint, request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(secret: Option<&str>, hashes: Vec<String>) -> AuthSettings {
        let config = AuthConfig {
            jwt_secret: secret.map(String::from),
            api_key_hashes: hashes,
            ..AuthConfig::default()
        };
        AuthSettings::from_config(&config)
    }

    #[test]
    fn test_hash_api_key() {
        let key = "pk_test_12345";
        let hash = hash_api_key(key);
        assert!(validate_api_key(key, &hash));
        assert!(!validate_api_key("wrong_key", &hash));
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer pk_123"), Some("pk_123"));
        assert_eq!(extract_bearer("pk_123"), None);
        assert_eq!(extract_bearer("Basic abc"), None);
    }

    #[test]
    fn test_api_key_scopes_exclude_admin() {
        let auth = settings(None, vec![])
            .authenticate(Uuid::new_v4(), "pk_abc", Some("alice"), "req".into())
            .unwrap();
        assert_eq!(auth.user_id, "alice");
        assert!(auth.has_scope("read"));
        assert!(auth.require_scope(ADMIN_SCOPE).is_err());
    }

    #[test]
    fn test_api_key_checked_against_hashes() {
        let s = settings(None, vec![hash_api_key("pk_known")]);
        let tenant = Uuid::new_v4();
        assert!(s.authenticate(tenant, "pk_known", None, "r".into()).is_ok());
        assert!(matches!(
            s.authenticate(tenant, "pk_other", None, "r".into()),
            Err(AppError::InvalidApiKey)
        ));
    }

    #[test]
    fn test_jwt_roundtrip_with_admin_scope() {
        let s = settings(Some("test_secret"), vec![]);
        let tenant_id = Uuid::new_v4();
        let token = s
            .jwt()
            .unwrap()
            .generate_token("user-1", tenant_id, vec![ADMIN_SCOPE.to_string()])
            .unwrap();

        let auth = s.authenticate(tenant_id, &token, None, "r".into()).unwrap();
        assert_eq!(auth.user_id, "user-1");
        assert!(auth.has_scope("write"));
        assert!(auth.require_scope(ADMIN_SCOPE).is_ok());
    }

    #[test]
    fn test_jwt_for_other_tenant_is_rejected() {
        let s = settings(Some("test_secret"), vec![]);
        let token = s
            .jwt()
            .unwrap()
            .generate_token("user-1", Uuid::new_v4(), vec![])
            .unwrap();
        assert!(matches!(
            s.authenticate(Uuid::new_v4(), &token, None, "r".into()),
            Err(AppError::TenantMismatch)
        ));
    }
}
