//! DocForge Ingestion CLI
//!
//! Indexes every supported file in a directory for one tenant:
//! 1. Extracts and normalizes text
//! 2. Chunks and annotates it
//! 3. Embeds the chunks and stores the vectors
//! 4. Records document metadata
//!
//! Usage: `ingestion <directory> <tenant-id> [user-id]`

use anyhow::{bail, Context};
use docforge_common::{
    config::{AppConfig, SharedConfig},
    context::EntityAnnotator,
    db::{DbPool, DocumentStore, InMemoryDocumentStore, Repository},
    embeddings::create_embedder,
    vector::{InMemoryVectorStore, PgVectorStore, VectorStore},
    VERSION,
};
use docforge_ingestion::{FileExtractor, IngestionProcessor};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(true)
        .json()
        .init();

    info!("Starting DocForge Ingestion v{}", VERSION);

    let mut args = std::env::args().skip(1);
    let (Some(dir), Some(tenant)) = (args.next(), args.next()) else {
        bail!("usage: ingestion <directory> <tenant-id> [user-id]");
    };
    let dir = PathBuf::from(dir);
    let tenant_id = Uuid::parse_str(&tenant).context("tenant-id must be a UUID")?;
    let user_id = args.next().unwrap_or_else(|| "ingestion-cli".to_string());

    // Load configuration
    let config = AppConfig::load().context("failed to load configuration")?;
    let settings = SharedConfig::new(config.rag.clone())?;

    let (documents, vector_store): (Arc<dyn DocumentStore>, Arc<dyn VectorStore>) =
        if config.uses_memory_storage() {
            info!("Using in-memory storage; indexed data is discarded on exit");
            (
                Arc::new(InMemoryDocumentStore::new()),
                Arc::new(InMemoryVectorStore::new()),
            )
        } else {
            info!("Connecting to database...");
            let pool = DbPool::new(&config.database).await?;
            pool.ensure_schema().await?;
            (
                Arc::new(Repository::new(pool.clone())),
                Arc::new(PgVectorStore::new(pool)),
            )
        };

    let processor = IngestionProcessor::new(
        Arc::new(FileExtractor::new()),
        create_embedder(&config.embedding)?,
        vector_store,
        documents,
        settings,
        EntityAnnotator::new(),
    );

    let records = processor.ingest_directory(&dir, tenant_id, &user_id).await?;
    let chunks: i32 = records.iter().map(|r| r.chunk_count).sum();

    info!(
        documents = records.len(),
        chunks,
        tenant_id = %tenant_id,
        "Ingestion complete"
    );
    Ok(())
}
