//! Vector storage and similarity search
//!
//! Provides:
//! - `VectorStore` trait with tenant namespaces
//! - pgvector-backed store over the shared database pool
//! - In-memory cosine store for local runs and tests

use crate::db::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DbBackend, QueryResult, Statement, TransactionTrait};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Chunk metadata stored alongside every vector
pub type Metadata = Map<String, Value>;

/// Vector to be stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// One similarity search hit. Never mutated after the search returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    /// Cosine similarity in [0, 1]
    pub score: f32,
    #[serde(default)]
    pub metadata: Metadata,
}

impl VectorMatch {
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn text(&self) -> &str {
        self.str_field("text").unwrap_or_default()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.str_field("file_name")
    }

    pub fn doc_id(&self) -> Option<&str> {
        self.str_field("doc_id")
    }

    pub fn chunk_type(&self) -> &str {
        self.str_field("chunk_type").unwrap_or("standard")
    }

    pub fn document_type(&self) -> &str {
        self.str_field("document_type").unwrap_or("general")
    }

    /// Stored word count, recomputed from the text when absent
    pub fn word_count(&self) -> usize {
        self.metadata
            .get("word_count")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or_else(|| crate::document::word_count(self.text()))
    }

    /// String list stored under `key`, empty when missing
    pub fn string_list(&self, key: &str) -> Vec<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Trait for vector store backends
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Nearest neighbours of `vector` within `namespace`, best first
    async fn search(&self, vector: &[f32], namespace: &str, top_k: usize)
        -> Result<Vec<VectorMatch>>;

    /// Insert or replace vectors by id
    async fn upsert(&self, vectors: Vec<VectorRecord>, namespace: &str) -> Result<()>;

    /// Remove every vector of a document, returning how many were deleted
    async fn delete_document(&self, namespace: &str, doc_id: &str) -> Result<usize>;
}

/// Cosine similarity mapped into [0, 1]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Exhaustive cosine search over per-namespace vectors
#[derive(Default)]
pub struct InMemoryVectorStore {
    namespaces: RwLock<HashMap<String, Vec<VectorRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vectors stored in a namespace
    pub async fn count(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .await
            .get(namespace)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(
        &self,
        vector: &[f32],
        namespace: &str,
        top_k: usize,
    ) -> Result<Vec<VectorMatch>> {
        let namespaces = self.namespaces.read().await;
        let Some(records) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<VectorMatch> = records
            .iter()
            .map(|r| VectorMatch {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.values),
                metadata: r.metadata.clone(),
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn upsert(&self, vectors: Vec<VectorRecord>, namespace: &str) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        let records = namespaces.entry(namespace.to_string()).or_default();

        for vector in vectors {
            match records.iter_mut().find(|r| r.id == vector.id) {
                Some(existing) => *existing = vector,
                None => records.push(vector),
            }
        }
        Ok(())
    }

    async fn delete_document(&self, namespace: &str, doc_id: &str) -> Result<usize> {
        let mut namespaces = self.namespaces.write().await;
        let Some(records) = namespaces.get_mut(namespace) else {
            return Ok(0);
        };

        let before = records.len();
        records.retain(|r| r.metadata.get("doc_id").and_then(Value::as_str) != Some(doc_id));
        Ok(before - records.len())
    }
}

/// pgvector store on the `document_vectors` table
#[derive(Clone)]
pub struct PgVectorStore {
    pool: DbPool,
}

impl PgVectorStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Convert Vec<f32> to pgvector string format "[1.0,2.0,...]"
fn to_pgvector(values: &[f32]) -> String {
    format!(
        "[{}]",
        values
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

fn decode_match(row: &QueryResult) -> std::result::Result<VectorMatch, sea_orm::DbErr> {
    let metadata = match row.try_get_by_index::<Value>(2)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Ok(VectorMatch {
        id: row.try_get_by_index::<String>(0)?,
        score: row.try_get_by_index::<f64>(1)?.clamp(0.0, 1.0) as f32,
        metadata,
    })
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn search(
        &self,
        vector: &[f32],
        namespace: &str,
        top_k: usize,
    ) -> Result<Vec<VectorMatch>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT
                id,
                (1 - (embedding <=> $1::vector))::float8 AS score,
                metadata
            FROM document_vectors
            WHERE namespace = $2
            ORDER BY embedding <=> $1::vector
            LIMIT $3
            "#,
            vec![
                to_pgvector(vector).into(),
                namespace.into(),
                (top_k as i64).into(),
            ],
        );

        let rows = self
            .pool
            .read()
            .query_all(stmt)
            .await
            .map_err(|e| AppError::SearchError {
                message: format!("Vector search failed: {}", e),
            })?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in rows {
            match decode_match(&row) {
                Ok(m) => matches.push(m),
                Err(e) => warn!(namespace, error = %e, "Skipping undecodable vector row"),
            }
        }

        debug!(namespace, top_k, returned = matches.len(), "pgvector search");
        Ok(matches)
    }

    async fn upsert(&self, vectors: Vec<VectorRecord>, namespace: &str) -> Result<()> {
        // All rows of a batch land together or not at all
        let txn = self.pool.write().begin().await?;
        for vector in vectors {
            let doc_id = vector
                .metadata
                .get("doc_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            let stmt = Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                INSERT INTO document_vectors (id, namespace, doc_id, embedding, metadata)
                VALUES ($1, $2, $3, $4::vector, $5)
                ON CONFLICT (id) DO UPDATE SET
                    embedding = EXCLUDED.embedding,
                    metadata = EXCLUDED.metadata
                "#,
                vec![
                    vector.id.into(),
                    namespace.into(),
                    doc_id.into(),
                    to_pgvector(&vector.values).into(),
                    Value::Object(vector.metadata).into(),
                ],
            );

            txn.execute(stmt).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn delete_document(&self, namespace: &str, doc_id: &str) -> Result<usize> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "DELETE FROM document_vectors WHERE namespace = $1 AND doc_id = $2",
            vec![namespace.into(), doc_id.into()],
        );

        let result = self.pool.write().execute(stmt).await?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::assert_ok;

    fn record(id: &str, values: Vec<f32>, doc_id: &str) -> VectorRecord {
        let mut metadata = Metadata::new();
        metadata.insert("doc_id".into(), json!(doc_id));
        metadata.insert("text".into(), json!(format!("chunk {}", id)));
        VectorRecord {
            id: id.to_string(),
            values,
            metadata,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_search_is_namespaced_and_ranked() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(
                vec![
                    record("a", vec![1.0, 0.0], "d1"),
                    record("b", vec![0.7, 0.7], "d1"),
                ],
                "tenant-a",
            )
            .await
            .unwrap();
        store
            .upsert(vec![record("c", vec![1.0, 0.0], "d2")], "tenant-b")
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], "tenant-a", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].text(), "chunk a");
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_by_document() {
        let store = InMemoryVectorStore::new();
        assert_ok!(store.upsert(vec![record("a", vec![1.0, 0.0], "d1")], "t").await);
        assert_ok!(store.upsert(vec![record("a", vec![0.0, 1.0], "d1")], "t").await);
        assert_ok!(store.upsert(vec![record("b", vec![0.0, 1.0], "d2")], "t").await);
        assert_eq!(store.count("t").await, 2);

        assert_eq!(store.delete_document("t", "d1").await.unwrap(), 1);
        assert_eq!(store.delete_document("t", "missing").await.unwrap(), 0);
        assert_eq!(store.count("t").await, 1);
    }
}
