//! DocForge API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Authentication and per-tenant rate limiting
//! - Document upload, listing, and deletion
//! - Grounded question answering with chat history
//! - Runtime configuration for administrators
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};
use docforge_common::{
    auth::AuthSettings,
    config::{AppConfig, SharedConfig},
    context::EntityAnnotator,
    db::{ChatHistoryStore, DbPool, DocumentStore, InMemoryChatHistoryStore, InMemoryDocumentStore, Repository},
    embeddings::create_embedder,
    llm::create_generator,
    metrics,
    vector::{InMemoryVectorStore, PgVectorStore, VectorStore},
    QueryEngine,
};
use docforge_ingestion::{FileExtractor, IngestionProcessor};
use metrics_exporter_prometheus::PrometheusBuilder;
use middleware::rate_limit::{self, TenantRateLimiter};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: Arc<AuthSettings>,
    pub settings: SharedConfig,
    pub engine: Arc<QueryEngine>,
    pub ingestion: Arc<IngestionProcessor>,
    pub documents: Arc<dyn DocumentStore>,
    pub chat_history: Arc<dyn ChatHistoryStore>,
    /// `None` when running on in-process stores
    pub db: Option<DbPool>,
    pub rate_limiter: Option<Arc<TenantRateLimiter>>,
}

impl FromRef<AppState> for Arc<AuthSettings> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("failed to load configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.observability.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting DocForge API Gateway v{}", docforge_common::VERSION);

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
            .install()
            .context("failed to install Prometheus exporter")?;
        metrics::register_metrics();
        info!(port = config.observability.metrics_port, "Metrics exporter listening");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;

    let state = build_state(config).await?;
    let app = create_router(state);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wire collaborators for the configured storage backend
async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let settings = SharedConfig::new(config.rag.clone())?;

    let (documents, chat_history, vector_store, db): (
        Arc<dyn DocumentStore>,
        Arc<dyn ChatHistoryStore>,
        Arc<dyn VectorStore>,
        Option<DbPool>,
    ) = if config.uses_memory_storage() {
        info!("Using in-memory storage");
        (
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(InMemoryChatHistoryStore::new()),
            Arc::new(InMemoryVectorStore::new()),
            None,
        )
    } else {
        info!("Connecting to database...");
        let pool = DbPool::new(&config.database).await?;
        pool.ensure_schema().await?;
        let repository = Arc::new(Repository::new(pool.clone()));
        (
            repository.clone(),
            repository,
            Arc::new(PgVectorStore::new(pool.clone())),
            Some(pool),
        )
    };

    let embedder = create_embedder(&config.embedding)?;
    let generator = create_generator(&config.llm, settings.clone())?;
    let annotator = EntityAnnotator::new();

    let engine = QueryEngine::new(
        embedder.clone(),
        vector_store.clone(),
        generator,
        settings.clone(),
        annotator.clone(),
    )
    .await;

    let ingestion = IngestionProcessor::new(
        Arc::new(FileExtractor::new()),
        embedder,
        vector_store,
        documents.clone(),
        settings.clone(),
        annotator,
    );

    Ok(AppState {
        auth: Arc::new(AuthSettings::from_config(&config.auth)),
        rate_limiter: rate_limit::from_config(&config.rate_limit),
        config: Arc::new(config),
        settings,
        engine: Arc::new(engine),
        ingestion: Arc::new(ingestion),
        documents,
        chat_history,
        db,
    })
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let upload_limit = state.config.server.max_upload_bytes;
    let timeout = state.config.request_timeout();

    // API routes
    let api_routes = Router::new()
        // Query endpoint
        .route("/query", post(handlers::query::query))

        // Document endpoints
        .route(
            "/documents",
            get(handlers::documents::list_documents).post(handlers::documents::upload_document),
        )
        .route("/documents/{id}", delete(handlers::documents::delete_document))
        .route("/documents/{id}/entities", get(handlers::documents::get_entities))

        // Chat history endpoints
        .route("/chat/history", get(handlers::chat::get_history))
        .route("/chat/sessions", get(handlers::chat::get_sessions))

        // Admin endpoints
        .route(
            "/admin/config",
            get(handlers::admin::get_config).put(handlers::admin::update_config),
        )
        .route("/admin/config/reset", post(handlers::admin::reset_config))
        .route("/admin/document-types", get(handlers::admin::document_types))
        .layer(from_fn_with_state(state.clone(), rate_limit::rate_limit_middleware))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(upload_limit));

    // Compose the app
    Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .route_layer(from_fn(middleware::metrics::track_metrics))
        .layer(TimeoutLayer::new(timeout))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use docforge_common::auth::{JwtManager, ADMIN_SCOPE};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    const SECRET: &str = "test-secret";

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.backend = "memory".to_string();
        config.embedding.provider = "hash".to_string();
        config.embedding.dimension = 64;
        config.llm.provider = "echo".to_string();
        config.auth.jwt_secret = Some(SECRET.to_string());
        config.rate_limit.enabled = false;
        config
    }

    async fn app() -> Router {
        create_router(build_state(test_config()).await.unwrap())
    }

    fn request(method: Method, uri: &str, tenant: Uuid, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-tenant-id", tenant.to_string())
            .header(header::AUTHORIZATION, "Bearer pk_test_key")
            .header("x-user-id", "alice")
            .body(body)
            .unwrap()
    }

    fn json_request(method: Method, uri: &str, tenant: Uuid, body: Value) -> Request<Body> {
        let mut req = request(method, uri, tenant, Body::from(body.to_string()));
        req.headers_mut()
            .insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        req
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = tokio_test::assert_ok!(
            app()
                .await
                .oneshot(Request::get("/health").body(Body::empty()).unwrap())
                .await
        );
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_query_requires_tenant_header() {
        let response = app()
            .await
            .oneshot(
                Request::post("/v1/query")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({"query": "hi"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_query_rejects_empty_and_long_queries() {
        let app = app().await;
        let tenant = Uuid::new_v4();

        let response = app
            .clone()
            .oneshot(json_request(Method::POST, "/v1/query", tenant, json!({"query": "   "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let long = "a".repeat(1001);
        let response = app
            .oneshot(json_request(Method::POST, "/v1/query", tenant, json!({"query": long})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_query_on_empty_index_falls_back_and_records_history() {
        let app = app().await;
        let tenant = Uuid::new_v4();

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/v1/query",
                tenant,
                json!({"query": "what is a bill of lading", "session_id": "s-1"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["response_type"], "general_knowledge");
        assert_eq!(body["session_id"], "s-1");
        assert!(body["sources"].as_array().unwrap().is_empty());

        let response = app
            .oneshot(request(Method::GET, "/v1/chat/history?session_id=s-1", tenant, Body::empty()))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["messages"][0]["query"], "what is a bill of lading");
    }

    #[tokio::test]
    async fn test_upload_list_and_delete_document() {
        let app = app().await;
        let tenant = Uuid::new_v4();
        let text = "CARRIER REPORT\n\nEvery carrier delivered each shipment on time across the \
            regional route network during the quarter, and the warehouse team tracked \
            freight volumes for every delivery.";

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/v1/documents?file_name=report.txt",
                tenant,
                Body::from(text),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["document_type"], "logistics");

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/v1/documents", tenant, Body::empty()))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["total"], 1);

        // other tenants cannot see or delete it
        let response = app
            .clone()
            .oneshot(request(
                Method::DELETE,
                &format!("/v1/documents/{}", id),
                Uuid::new_v4(),
                Body::empty(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(request(
                Method::DELETE,
                &format!("/v1/documents/{}", id),
                tenant,
                Body::empty(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_unsupported_upload_is_rejected() {
        let response = app()
            .await
            .oneshot(request(
                Method::POST,
                "/v1/documents?file_name=photo.png",
                Uuid::new_v4(),
                Body::from(vec![0x89, b'P', b'N', b'G']),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_admin_config_requires_admin_scope() {
        let app = app().await;
        let tenant = Uuid::new_v4();

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/v1/admin/config", tenant, Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let token = JwtManager::new(SECRET, 3600)
            .generate_token("root", tenant, vec![ADMIN_SCOPE.to_string()])
            .unwrap();
        let admin = |method: Method, uri: &str, body: Value| {
            Request::builder()
                .method(method)
                .uri(uri)
                .header("x-tenant-id", tenant.to_string())
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        let response = app
            .clone()
            .oneshot(admin(Method::PUT, "/v1/admin/config", json!({"chunk_size": 50})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(admin(Method::PUT, "/v1/admin/config", json!({"top_k_final": 5})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["config"]["retrieval"]["top_k_final"], 5);
        assert_eq!(body["config"]["chunking"]["chunk_size"], 1200);
        assert_eq!(body["validation"]["valid"], true);

        let response = app
            .oneshot(admin(Method::POST, "/v1/admin/config/reset", json!({})))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["config"]["retrieval"]["top_k_final"], 8);
    }
}
