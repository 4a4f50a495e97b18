//! Per-tenant rate limiting middleware using token buckets

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use docforge_common::{config::RateLimitConfig, errors::AppError};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::AppState;

/// Bucket key for requests that carry no tenant header
const ANONYMOUS_KEY: &str = "anonymous";

/// Rate limiter keyed by tenant id
pub type TenantRateLimiter = DefaultKeyedRateLimiter<String>;

/// Create a new per-tenant rate limiter
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Arc<TenantRateLimiter> {
    let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst).unwrap_or(rate);

    Arc::new(RateLimiter::keyed(Quota::per_second(rate).allow_burst(burst)))
}

/// Limiter from configuration, `None` when rate limiting is disabled
pub fn from_config(config: &RateLimitConfig) -> Option<Arc<TenantRateLimiter>> {
    config
        .enabled
        .then(|| create_rate_limiter(config.requests_per_second, config.burst))
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(limiter) = state.rate_limiter.as_ref() else {
        return Ok(next.run(request).await);
    };

    let tenant = request
        .headers()
        .get(state.config.auth.tenant_header.as_str())
        .and_then(|v| v.to_str().ok())
        .unwrap_or(ANONYMOUS_KEY)
        .to_string();

    match limiter.check_key(&tenant) {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!(tenant_id = %tenant, "Rate limit exceeded");
            Err(AppError::RateLimited {
                limit: state.config.rate_limit.requests_per_second,
            })
        }
    }
}
