//! Ingestion processor
//!
//! Core logic for processing documents: extraction, normalization,
//! chunking, entity annotation, embedding, and indexing.

use crate::chunker::Chunker;
use crate::errors::IngestionError;
use crate::extract::TextExtractor;
use crate::normalize::normalize_text;
use chrono::Utc;
use docforge_common::config::SharedConfig;
use docforge_common::context::{EntityAnnotator, EntityBundle};
use docforge_common::db::{DocumentRecord, DocumentStore};
use docforge_common::document::{Chunk, DocumentType};
use docforge_common::embeddings::Embedder;
use docforge_common::metrics;
use docforge_common::vector::{Metadata, VectorRecord, VectorStore};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Ingestion processor
pub struct IngestionProcessor {
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    documents: Arc<dyn DocumentStore>,
    settings: SharedConfig,
    annotator: EntityAnnotator,
}

impl IngestionProcessor {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        documents: Arc<dyn DocumentStore>,
        settings: SharedConfig,
        annotator: EntityAnnotator,
    ) -> Self {
        Self {
            extractor,
            embedder,
            vector_store,
            documents,
            settings,
            annotator,
        }
    }

    /// Whether the extractor handles this file name
    pub fn supports(&self, file_name: &str) -> bool {
        self.extractor.supports(file_name)
    }

    /// Ingest one uploaded file for a tenant.
    ///
    /// The metadata record is written before the vectors; when indexing
    /// fails both the record and any vectors already written are removed.
    #[instrument(skip(self, bytes), fields(tenant_id = %tenant_id, size = bytes.len()))]
    pub async fn ingest(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<DocumentRecord, IngestionError> {
        let started = Instant::now();
        let mut timings = BTreeMap::new();
        info!("Processing document");

        let text = self
            .extractor
            .extract_text(file_name, bytes)
            .await?
            .ok_or_else(|| IngestionError::EmptyDocument(file_name.to_string()))?;
        let text = normalize_text(&text);
        if text.is_empty() {
            return Err(IngestionError::EmptyDocument(file_name.to_string()));
        }
        timings.insert("extraction_ms", elapsed_ms(started));

        let document_type = DocumentType::detect(file_name, &text);
        let settings = self.settings.snapshot().await;
        let mut chunking = settings.chunking.clone();
        chunking.chunk_size = settings.document_type_profile(document_type).chunk_size;

        let chunk_started = Instant::now();
        let chunks = Chunker::new(chunking).chunk(&text, file_name);
        if chunks.is_empty() {
            return Err(IngestionError::NoChunks(file_name.to_string()));
        }
        timings.insert("chunking_ms", elapsed_ms(chunk_started));
        info!(
            document_type = document_type.as_str(),
            chunk_count = chunks.len(),
            "Text chunked successfully"
        );

        let bundle = self.annotator.annotate(&chunks, document_type);

        let embed_started = Instant::now();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        timings.insert("embedding_ms", elapsed_ms(embed_started));

        let doc_id = Uuid::now_v7();
        let upload_date = Utc::now().fixed_offset();
        let file_path = format!("{}/{}", tenant_id, file_name);
        timings.insert("total_ms", elapsed_ms(started));

        let record = DocumentRecord {
            id: doc_id,
            tenant_id,
            file_name: file_name.to_string(),
            file_path: file_path.clone(),
            file_size: bytes.len() as i64,
            document_type: document_type.as_str().to_string(),
            uploaded_by: user_id.to_string(),
            upload_date,
            chunk_count: chunks.len() as i32,
            entity_summary: serde_json::to_value(&bundle.summary).unwrap_or(Value::Null),
            processing_metadata: processing_metadata(&chunks, &bundle, &timings),
        };
        self.documents.create(record.clone()).await?;

        let namespace = tenant_id.to_string();
        let context = VectorContext {
            tenant_id: &namespace,
            doc_id: &doc_id.to_string(),
            file_name,
            file_path: &file_path,
            user_id,
            upload_date: &upload_date.to_rfc3339(),
            document_type,
        };
        let vectors = build_vectors(&context, &chunks, embeddings, &bundle);

        if let Err(e) = self.vector_store.upsert(vectors, &namespace).await {
            error!(doc_id = %doc_id, error = %e, "Vector upsert failed, removing document record");
            if let Err(cleanup) = self
                .vector_store
                .delete_document(&namespace, &doc_id.to_string())
                .await
            {
                warn!(doc_id = %doc_id, error = %cleanup, "Failed to remove partially written vectors");
            }
            if let Err(cleanup) = self.documents.delete(doc_id, tenant_id).await {
                warn!(doc_id = %doc_id, error = %cleanup, "Failed to remove orphaned document record");
            }
            return Err(e.into());
        }

        metrics::record_ingestion(
            started.elapsed().as_secs_f64(),
            chunks.len(),
            document_type.as_str(),
        );
        info!(
            doc_id = %doc_id,
            chunk_count = chunks.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Document indexed"
        );

        Ok(record)
    }

    /// Remove a document's vectors and metadata.
    ///
    /// Returns false when the tenant has no such document.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, doc_id = %doc_id))]
    pub async fn delete_document(&self, tenant_id: Uuid, doc_id: Uuid) -> Result<bool, IngestionError> {
        if self.documents.get(doc_id, tenant_id).await?.is_none() {
            return Ok(false);
        }

        let removed = self
            .vector_store
            .delete_document(&tenant_id.to_string(), &doc_id.to_string())
            .await?;
        let deleted = self.documents.delete(doc_id, tenant_id).await?;

        info!(vectors_removed = removed, "Document deleted");
        Ok(deleted)
    }

    /// Ingest every supported file in a directory
    #[instrument(skip(self), fields(dir = %dir.display()))]
    pub async fn ingest_directory(
        &self,
        dir: &Path,
        tenant_id: Uuid,
        user_id: &str,
    ) -> Result<Vec<DocumentRecord>, IngestionError> {
        info!("Processing directory");

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut results = Vec::new();
        for path in paths {
            let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            if !self.supports(&file_name) {
                debug!(file_name, "Skipping unsupported file");
                continue;
            }

            let bytes = tokio::fs::read(&path).await?;
            match self.ingest(tenant_id, user_id, &file_name, &bytes).await {
                Ok(record) => {
                    info!(
                        file_name,
                        doc_id = %record.id,
                        chunk_count = record.chunk_count,
                        "File processed successfully"
                    );
                    results.push(record);
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to process file");
                }
            }
        }

        info!(total = results.len(), "Directory processing complete");
        Ok(results)
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Per-document fields copied onto every vector
struct VectorContext<'a> {
    tenant_id: &'a str,
    doc_id: &'a str,
    file_name: &'a str,
    file_path: &'a str,
    user_id: &'a str,
    upload_date: &'a str,
    document_type: DocumentType,
}

fn build_vectors(
    ctx: &VectorContext<'_>,
    chunks: &[Chunk],
    embeddings: Vec<Vec<f32>>,
    bundle: &EntityBundle,
) -> Vec<VectorRecord> {
    chunks
        .iter()
        .zip(embeddings)
        .map(|(chunk, values)| {
            let annotation = bundle.for_chunk(chunk.chunk_index);
            let entities = annotation.map(|a| a.entity_names()).unwrap_or_default();
            let domain_terms = annotation.map(|a| a.domain_terms()).unwrap_or_default();
            let has = |category: &str| annotation.is_some_and(|a| a.has(category));

            let mut metadata = Metadata::new();
            metadata.insert("tenant_id".into(), json!(ctx.tenant_id));
            metadata.insert("doc_id".into(), json!(ctx.doc_id));
            metadata.insert("file_name".into(), json!(ctx.file_name));
            metadata.insert("file_path".into(), json!(ctx.file_path));
            metadata.insert("chunk_index".into(), json!(chunk.chunk_index));
            metadata.insert("text".into(), json!(chunk.text));
            metadata.insert("chunk_type".into(), json!(chunk.chunk_type.as_str()));
            metadata.insert("section_title".into(), json!(chunk.section_title));
            metadata.insert("page_number".into(), json!(chunk.page_number));
            metadata.insert("word_count".into(), json!(chunk.word_count));
            metadata.insert("uploaded_by".into(), json!(ctx.user_id));
            metadata.insert("upload_date".into(), json!(ctx.upload_date));
            metadata.insert("document_type".into(), json!(ctx.document_type.as_str()));
            metadata.insert("entity_count".into(), json!(entities.len()));
            metadata.insert("entities".into(), json!(entities));
            metadata.insert("domain_terms".into(), json!(domain_terms));
            metadata.insert("has_financial_terms".into(), json!(has("financial_terms")));
            metadata.insert("has_technical_terms".into(), json!(has("technical_terms")));
            metadata.insert("has_legal_terms".into(), json!(has("legal_terms")));

            let suffix = Uuid::new_v4().simple().to_string();
            VectorRecord {
                id: format!(
                    "{}_{}_{}_{}",
                    ctx.tenant_id,
                    ctx.file_name,
                    chunk.chunk_index,
                    &suffix[..8]
                ),
                values,
                metadata,
            }
        })
        .collect()
}

fn processing_metadata(
    chunks: &[Chunk],
    bundle: &EntityBundle,
    timings: &BTreeMap<&str, u64>,
) -> Value {
    let mut chunk_types: BTreeMap<&str, usize> = BTreeMap::new();
    for chunk in chunks {
        *chunk_types.entry(chunk.chunk_type.as_str()).or_insert(0) += 1;
    }
    let total_words: usize = chunks.iter().map(|c| c.word_count).sum();
    let avg_chunk_size = if chunks.is_empty() {
        0.0
    } else {
        total_words as f64 / chunks.len() as f64
    };

    json!({
        "chunk_count": chunks.len(),
        "chunk_types": chunk_types,
        "total_words": total_words,
        "avg_chunk_size": avg_chunk_size,
        "entity_summary": bundle.summary.entity_type_counts,
        "key_insights": bundle.summary.key_insights,
        "timings_ms": timings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FileExtractor;
    use async_trait::async_trait;
    use docforge_common::config::EnterpriseConfig;
    use docforge_common::db::InMemoryDocumentStore;
    use docforge_common::embeddings::HashEmbedder;
    use docforge_common::errors::{AppError, Result as AppResult};
    use docforge_common::vector::{InMemoryVectorStore, VectorMatch};

    const REPORT: &str = "DELIVERY REPORT\n\n\
        The carrier network handled every shipment for the quarter with a strong \
        on-time delivery record. Freight volumes grew across each route and the \
        warehouse team reduced transit delays for priority cargo.\n\n\
        CARRIER NOTES\n\n\
        Each carrier reported revenue of $1,200 per route with a margin of 12% \
        and tracking coverage of every shipment in transit during Q3 2024 across \
        the regional delivery network and partner warehouses.";

    fn processor(
        vectors: Arc<dyn VectorStore>,
        documents: Arc<InMemoryDocumentStore>,
    ) -> IngestionProcessor {
        IngestionProcessor::new(
            Arc::new(FileExtractor::new()),
            Arc::new(HashEmbedder::new(64)),
            vectors,
            documents,
            SharedConfig::new(EnterpriseConfig::default()).unwrap(),
            EntityAnnotator::new(),
        )
    }

    struct RejectingStore;

    #[async_trait]
    impl VectorStore for RejectingStore {
        async fn search(&self, _: &[f32], _: &str, _: usize) -> AppResult<Vec<VectorMatch>> {
            Ok(Vec::new())
        }

        async fn upsert(&self, _: Vec<VectorRecord>, _: &str) -> AppResult<()> {
            Err(AppError::SearchError {
                message: "index unavailable".to_string(),
            })
        }

        async fn delete_document(&self, _: &str, _: &str) -> AppResult<usize> {
            Ok(0)
        }
    }

    /// Accepts the first vector of a batch, then fails
    struct PartialStore {
        inner: InMemoryVectorStore,
    }

    #[async_trait]
    impl VectorStore for PartialStore {
        async fn search(&self, v: &[f32], ns: &str, k: usize) -> AppResult<Vec<VectorMatch>> {
            self.inner.search(v, ns, k).await
        }

        async fn upsert(&self, vectors: Vec<VectorRecord>, ns: &str) -> AppResult<()> {
            let first = vectors.into_iter().take(1).collect();
            self.inner.upsert(first, ns).await?;
            Err(AppError::SearchError {
                message: "connection lost".to_string(),
            })
        }

        async fn delete_document(&self, ns: &str, doc_id: &str) -> AppResult<usize> {
            self.inner.delete_document(ns, doc_id).await
        }
    }

    #[tokio::test]
    async fn test_ingest_text_document() {
        let vectors = Arc::new(InMemoryVectorStore::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let processor = processor(vectors.clone(), documents.clone());
        let tenant = Uuid::new_v4();

        let record = processor
            .ingest(tenant, "alice", "report.txt", REPORT.as_bytes())
            .await
            .unwrap();

        assert_eq!(record.document_type, "logistics");
        assert_eq!(record.file_path, format!("{}/report.txt", tenant));
        assert!(record.chunk_count >= 1);
        assert_eq!(
            vectors.count(&tenant.to_string()).await,
            record.chunk_count as usize
        );
        assert_eq!(record.processing_metadata["chunk_count"], json!(record.chunk_count));

        let stored = documents.get(record.id, tenant).await.unwrap();
        assert_eq!(stored, Some(record));
    }

    #[tokio::test]
    async fn test_vector_metadata_carries_annotations() {
        let vectors = Arc::new(InMemoryVectorStore::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let processor = processor(vectors.clone(), documents);
        let tenant = Uuid::new_v4();

        let record = processor
            .ingest(tenant, "alice", "report.txt", REPORT.as_bytes())
            .await
            .unwrap();

        let query = HashEmbedder::new(64).embed(REPORT).await.unwrap();
        let hits = vectors.search(&query, &tenant.to_string(), 10).await.unwrap();
        assert!(!hits.is_empty());

        let doc_id = record.id.to_string();
        for hit in &hits {
            assert_eq!(hit.doc_id(), Some(doc_id.as_str()));
            assert_eq!(hit.document_type(), "logistics");
            assert_eq!(hit.str_field("uploaded_by"), Some("alice"));
            assert!(hit.id.starts_with(&format!("{}_report.txt_", tenant)));
        }
        assert!(hits
            .iter()
            .any(|h| h.string_list("domain_terms").contains(&"carrier")));
    }

    #[tokio::test]
    async fn test_csv_rows_become_chunks() {
        let vectors = Arc::new(InMemoryVectorStore::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let processor = processor(vectors.clone(), documents);
        let tenant = Uuid::new_v4();

        let csv = "carrier,shipments,on_time\nFedEx,120,95%\nUPS,98,91%\nDHL,77,89%\n";
        let record = tokio_test::assert_ok!(
            processor.ingest(tenant, "bob", "carriers.csv", csv.as_bytes()).await
        );

        assert!(record.chunk_count >= 1);
        assert_eq!(
            vectors.count(&tenant.to_string()).await,
            record.chunk_count as usize
        );
    }

    #[tokio::test]
    async fn test_unsupported_file_leaves_no_record() {
        let vectors = Arc::new(InMemoryVectorStore::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let processor = processor(vectors.clone(), documents.clone());
        let tenant = Uuid::new_v4();

        let result = processor.ingest(tenant, "alice", "image.png", b"\x89PNG").await;
        assert!(matches!(result, Err(IngestionError::UnsupportedFileType(_))));

        let result = processor.ingest(tenant, "alice", "blank.txt", b"   \n ").await;
        assert!(matches!(result, Err(IngestionError::EmptyDocument(_))));

        assert!(documents.get_by_tenant(tenant).await.unwrap().is_empty());
        assert_eq!(vectors.count(&tenant.to_string()).await, 0);
    }

    #[tokio::test]
    async fn test_failed_upsert_rolls_back_record() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let processor = processor(Arc::new(RejectingStore), documents.clone());
        let tenant = Uuid::new_v4();

        let result = processor
            .ingest(tenant, "alice", "report.txt", REPORT.as_bytes())
            .await;

        assert!(result.is_err());
        assert!(documents.get_by_tenant(tenant).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_upsert_removes_written_vectors() {
        let store = Arc::new(PartialStore {
            inner: InMemoryVectorStore::new(),
        });
        let documents = Arc::new(InMemoryDocumentStore::new());
        let processor = processor(store.clone(), documents.clone());
        let tenant = Uuid::new_v4();

        let result = processor
            .ingest(tenant, "alice", "report.txt", REPORT.as_bytes())
            .await;

        assert!(result.is_err());
        assert!(documents.get_by_tenant(tenant).await.unwrap().is_empty());
        assert_eq!(store.inner.count(&tenant.to_string()).await, 0);
    }

    #[tokio::test]
    async fn test_delete_document_is_tenant_scoped() {
        let vectors = Arc::new(InMemoryVectorStore::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let processor = processor(vectors.clone(), documents.clone());
        let tenant = Uuid::new_v4();

        let record = processor
            .ingest(tenant, "alice", "report.txt", REPORT.as_bytes())
            .await
            .unwrap();

        assert!(!processor.delete_document(Uuid::new_v4(), record.id).await.unwrap());
        assert!(processor.delete_document(tenant, record.id).await.unwrap());
        assert_eq!(vectors.count(&tenant.to_string()).await, 0);
        assert!(!processor.delete_document(tenant, record.id).await.unwrap());
    }
}
