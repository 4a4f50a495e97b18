//! DocForge Common Library
//!
//! Shared code for the DocForge services including:
//! - Database models, stores and the pgvector index
//! - Embedding and generation client abstractions
//! - The query engine (breadth, annotation, optimization, orchestration)
//! - Error types and handling
//! - Configuration management, including runtime enterprise settings
//! - Authentication utilities
//! - Metrics and observability

pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod document;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod vector;

// Re-export commonly used types
pub use config::{AppConfig, EnterpriseConfig, SharedConfig};
pub use context::{QueryEngine, QueryRequest, QueryResult};
pub use db::Repository;
pub use document::{Chunk, ChunkType, DocumentType};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::Generator;
pub use vector::VectorStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
