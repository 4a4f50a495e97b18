//! DocForge document ingestion
//!
//! Provides:
//! - Text extraction for PDF, DOCX, XLSX, CSV, and plain text
//! - Normalization and structure-aware chunking
//! - The processor that annotates, embeds, and indexes documents

pub mod chunker;
pub mod errors;
pub mod extract;
pub mod normalize;
pub mod processor;

pub use chunker::Chunker;
pub use errors::IngestionError;
pub use extract::{FileExtractor, TextExtractor};
pub use processor::IngestionProcessor;
