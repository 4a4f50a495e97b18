//! Query Engine - Drives a query from cache lookup to a cited answer
//!
//! Provides:
//! - Tenant-scoped result caching
//! - Quality gate with general-knowledge fallback
//! - Domain-specific prompting over the optimized context
//! - One bounded retry when the answer reports missing data

use super::annotator::EntityAnnotator;
use super::breadth::{is_analytical, preprocess_query, select_breadth};
use super::missing_data::answer_indicates_missing_data;
use super::optimizer::{ContextOptimizer, OptimizedContext};
use super::prompts;
use crate::cache::{keys, FifoCache};
use crate::config::{EnterpriseConfig, SharedConfig};
use crate::embeddings::Embedder;
use crate::errors::Result;
use crate::llm::Generator;
use crate::metrics;
use crate::vector::{VectorMatch, VectorStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

const QUERY_CACHE: &str = "query";

/// Query to answer for one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Tenant id, also the vector namespace
    pub tenant_id: String,

    /// Raw user query
    pub query: String,

    /// Overrides the base breadth and the final chunk count
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// How the answer was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    DocumentBased,
    GeneralKnowledge,
    Error,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::DocumentBased => "document_based",
            ResponseType::GeneralKnowledge => "general_knowledge",
            ResponseType::Error => "error",
        }
    }
}

/// Pipeline stages, recorded in visit order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    Init,
    CacheCheck,
    Search,
    GeneralKnowledge,
    ContextOptimize,
    Generate,
    RetrySearch,
    GenerateRetry,
    Done,
}

/// Cited source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub file_name: String,
    pub file_id: Option<String>,
    pub file_path: Option<String>,
    pub document_type: String,
    pub section_title: Option<String>,
    pub page_number: Option<u64>,
    pub chunk_text: String,
    pub relevance_score: f32,
    pub word_count: usize,
    pub upload_date: Option<String>,
}

impl SourceInfo {
    fn from_match(m: &VectorMatch) -> Self {
        Self {
            file_name: m.file_name().unwrap_or("unknown").to_string(),
            file_id: m.doc_id().map(str::to_string),
            file_path: m.str_field("file_path").map(str::to_string),
            document_type: m.document_type().to_string(),
            section_title: m
                .str_field("section_title")
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            page_number: m
                .metadata
                .get("page_number")
                .and_then(serde_json::Value::as_u64)
                .filter(|p| *p > 0),
            chunk_text: m.text().to_string(),
            relevance_score: m.score,
            word_count: m.word_count(),
            upload_date: m.str_field("upload_date").map(str::to_string),
        }
    }
}

/// Diagnostics describing how a result was produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub stages: Vec<QueryStage>,
    pub breadth: usize,
    pub analytical: bool,
    pub retried: bool,
    pub total_chunks_analyzed: usize,
    pub chunks_used: usize,
    pub avg_relevance_score: f32,
    pub document_types: Vec<String>,
    /// Per-stage wall time in milliseconds
    pub timings_ms: BTreeMap<String, u64>,
}

/// Answer with its sources and quality signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub answer: String,
    pub sources: Vec<SourceInfo>,
    pub confidence: f32,
    /// Absent for answers not grounded in documents
    pub context_quality: Option<f32>,
    pub response_type: ResponseType,
    pub processing_metadata: ProcessingMetadata,
}

/// Stage log for a single query
struct Trace {
    metadata: ProcessingMetadata,
    started: Instant,
}

impl Trace {
    fn new() -> Self {
        Self {
            metadata: ProcessingMetadata {
                stages: vec![QueryStage::Init],
                ..Default::default()
            },
            started: Instant::now(),
        }
    }

    fn enter(&mut self, stage: QueryStage) {
        self.metadata.stages.push(stage);
    }

    fn time(&mut self, name: &str, since: Instant) {
        *self.metadata.timings_ms.entry(name.to_string()).or_insert(0) +=
            since.elapsed().as_millis() as u64;
    }

    fn finish(mut self, context: Option<&OptimizedContext>) -> ProcessingMetadata {
        self.metadata.stages.push(QueryStage::Done);
        if let Some(context) = context {
            self.metadata.chunks_used = context.chunks.len();
            self.metadata.avg_relevance_score = context.avg_relevance;
            self.metadata.document_types = context.document_types.iter().cloned().collect();
        }
        self.metadata
            .timings_ms
            .insert("total".to_string(), self.started.elapsed().as_millis() as u64);
        self.metadata
    }
}

/// Retrieval-augmented query engine.
///
/// Holds its collaborators explicitly; every query reads one
/// configuration snapshot at entry.
pub struct QueryEngine {
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    generator: Arc<dyn Generator>,
    settings: SharedConfig,
    annotator: EntityAnnotator,
    cache: FifoCache<QueryResult>,
}

impl QueryEngine {
    /// Create an engine; the cache is sized from the current configuration
    pub async fn new(
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        generator: Arc<dyn Generator>,
        settings: SharedConfig,
        annotator: EntityAnnotator,
    ) -> Self {
        let cache_config = settings.snapshot().await.cache;
        let ttl = (cache_config.ttl_hours > 0)
            .then(|| Duration::from_secs(cache_config.ttl_hours * 3600));

        Self {
            embedder,
            vector_store,
            generator,
            settings,
            annotator,
            cache: FifoCache::new(cache_config.max_entries, cache_config.eviction_batch, ttl),
        }
    }

    /// Shared configuration handle
    pub fn settings(&self) -> &SharedConfig {
        &self.settings
    }

    /// Number of cached results
    pub async fn cached_results(&self) -> usize {
        self.cache.len().await
    }

    /// Drop all cached results
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Answer a query. Collaborator failures propagate and nothing is cached.
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id))]
    pub async fn answer(&self, request: &QueryRequest) -> Result<QueryResult> {
        let config = self.settings.snapshot().await;
        let mut trace = Trace::new();

        trace.enter(QueryStage::CacheCheck);
        let cache_key = keys::query(&request.tenant_id, &request.query);
        if config.cache.enabled {
            if let Some(hit) = self.cache.get(&cache_key).await {
                metrics::record_cache(true, QUERY_CACHE);
                debug!(key = %cache_key, "Query cache hit");
                return Ok(hit);
            }
            metrics::record_cache(false, QUERY_CACHE);
        }

        let mut result = self.run(request, &config, trace).await?;
        if !config.response.enable_confidence_scores {
            result.confidence = 0.0;
        }

        if config.cache.enabled {
            self.cache.insert(cache_key, result.clone()).await;
        }

        metrics::record_query(
            result.processing_metadata.timings_ms.get("total").copied().unwrap_or(0) as f64
                / 1000.0,
            result.response_type.as_str(),
            result.processing_metadata.chunks_used,
        );
        info!(
            response_type = result.response_type.as_str(),
            chunks_used = result.processing_metadata.chunks_used,
            retried = result.processing_metadata.retried,
            confidence = result.confidence,
            "Query answered"
        );
        Ok(result)
    }

    async fn run(
        &self,
        request: &QueryRequest,
        config: &EnterpriseConfig,
        mut trace: Trace,
    ) -> Result<QueryResult> {
        let query = request.query.as_str();
        let namespace = request.tenant_id.as_str();

        trace.enter(QueryStage::Search);
        let analytical = is_analytical(query);
        let base_top_k = request.top_k.unwrap_or(config.retrieval.top_k_retrieval);
        let breadth = select_breadth(query, base_top_k, &config.breadth);
        trace.metadata.analytical = analytical;
        trace.metadata.breadth = breadth;

        let stage_start = Instant::now();
        let embedding = self.embedder.embed(&preprocess_query(query)).await?;
        trace.time("embedding", stage_start);

        let stage_start = Instant::now();
        let matches = self.vector_store.search(&embedding, namespace, breadth).await?;
        trace.time("search", stage_start);
        trace.metadata.total_chunks_analyzed = matches.len();

        let best_score = matches.iter().map(|m| m.score).fold(f32::MIN, f32::max);
        if matches.is_empty() || best_score < config.retrieval.similarity_threshold {
            debug!(matches = matches.len(), best_score, "Below similarity threshold");
            return self.general_knowledge(query, config, trace).await;
        }

        trace.enter(QueryStage::ContextOptimize);
        let optimizer = ContextOptimizer::new(config, self.annotator.clone());
        let top_k_final = request.top_k.unwrap_or(config.retrieval.top_k_final);
        let stage_start = Instant::now();
        let mut context = optimizer.optimize(&matches, query, top_k_final);
        trace.time("optimize", stage_start);

        if context.is_empty() {
            debug!("No chunk fit the context budget");
            return self.general_knowledge(query, config, trace).await;
        }

        trace.enter(QueryStage::Generate);
        let stage_start = Instant::now();
        let mut answer = self.generate_grounded(query, &context).await?;
        trace.time("generation", stage_start);

        if answer_indicates_missing_data(&answer)
            && analytical
            && breadth < config.retrieval.retry_breadth_threshold
        {
            trace.metadata.retried = true;
            trace.enter(QueryStage::RetrySearch);
            let retry_breadth = config.retrieval.retry_breadth;
            info!(breadth, retry_breadth, "Answer reports missing data, retrying wider");

            let stage_start = Instant::now();
            let retry_matches = self
                .vector_store
                .search(&embedding, namespace, retry_breadth)
                .await?;
            let retry_context = optimizer.optimize(&retry_matches, query, retry_breadth);

            let mut accepted = false;
            if !retry_context.is_empty() {
                trace.enter(QueryStage::GenerateRetry);
                let retry_answer = self.generate_grounded(query, &retry_context).await?;
                accepted = !answer_indicates_missing_data(&retry_answer)
                    || retry_answer.chars().count() > answer.chars().count();

                if accepted {
                    answer = retry_answer;
                    context = retry_context;
                    trace.metadata.total_chunks_analyzed = retry_matches.len();
                }
            }
            trace.time("retry", stage_start);
            metrics::record_retry(accepted);
            debug!(accepted, "Retry finished");
        }

        if answer.chars().count() < config.quality.min_response_length {
            warn!(length = answer.len(), "Generated answer is unusually short");
        }

        let sources = if config.response.enable_citations {
            format_sources(&context)
        } else {
            Vec::new()
        };

        Ok(QueryResult {
            answer,
            sources,
            confidence: context.confidence,
            context_quality: Some(context.quality_score),
            response_type: ResponseType::DocumentBased,
            processing_metadata: trace.finish(Some(&context)),
        })
    }

    async fn generate_grounded(&self, query: &str, context: &OptimizedContext) -> Result<String> {
        let system = prompts::system_prompt(context.primary_document_type());
        let user = prompts::build_user_prompt(query, &context.chunks);
        self.generator.generate(system, &user).await
    }

    async fn general_knowledge(
        &self,
        query: &str,
        config: &EnterpriseConfig,
        mut trace: Trace,
    ) -> Result<QueryResult> {
        trace.enter(QueryStage::GeneralKnowledge);
        let stage_start = Instant::now();
        let answer = self
            .generator
            .generate(prompts::general_knowledge_prompt(), &prompts::build_general_prompt(query))
            .await?;
        trace.time("generation", stage_start);

        Ok(QueryResult {
            answer,
            sources: Vec::new(),
            confidence: config.response.general_knowledge_confidence,
            context_quality: None,
            response_type: ResponseType::GeneralKnowledge,
            processing_metadata: trace.finish(None),
        })
    }
}

/// One source per file, best relevance first
fn format_sources(context: &OptimizedContext) -> Vec<SourceInfo> {
    let mut seen = HashSet::new();
    let mut sources: Vec<SourceInfo> = context
        .chunks
        .iter()
        .map(|chunk| SourceInfo::from_match(&chunk.base))
        .filter(|source| seen.insert(source.file_name.clone()))
        .collect();

    sources.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;
    use crate::errors::AppError;
    use crate::vector::VectorRecord;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns canned answers in order and records every call
    struct ScriptedGenerator {
        answers: Mutex<VecDeque<String>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedGenerator {
        fn new(answers: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, system: &str, user: &str) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            Ok(self
                .answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| "default answer".to_string()))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    /// Returns fixed matches and records the requested breadth
    struct FixedStore {
        matches: Vec<VectorMatch>,
        breadths: Mutex<Vec<usize>>,
    }

    impl FixedStore {
        fn new(matches: Vec<VectorMatch>) -> Arc<Self> {
            Arc::new(Self {
                matches,
                breadths: Mutex::new(Vec::new()),
            })
        }

        fn breadths(&self) -> Vec<usize> {
            self.breadths.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VectorStore for FixedStore {
        async fn search(&self, _: &[f32], _: &str, top_k: usize) -> Result<Vec<VectorMatch>> {
            self.breadths.lock().unwrap().push(top_k);
            Ok(self.matches.iter().take(top_k).cloned().collect())
        }

        async fn upsert(&self, _: Vec<VectorRecord>, _: &str) -> Result<()> {
            Ok(())
        }

        async fn delete_document(&self, _: &str, _: &str) -> Result<usize> {
            Ok(0)
        }
    }

    struct FailingStore;

    #[async_trait]
    impl VectorStore for FailingStore {
        async fn search(&self, _: &[f32], _: &str, _: usize) -> Result<Vec<VectorMatch>> {
            Err(AppError::SearchError {
                message: "index offline".into(),
            })
        }

        async fn upsert(&self, _: Vec<VectorRecord>, _: &str) -> Result<()> {
            Ok(())
        }

        async fn delete_document(&self, _: &str, _: &str) -> Result<usize> {
            Ok(0)
        }
    }

    fn hit(id: &str, score: f32, file: &str, text: &str) -> VectorMatch {
        let mut metadata = Map::new();
        metadata.insert("doc_id".into(), json!(format!("doc-{}", file)));
        metadata.insert("file_name".into(), json!(file));
        metadata.insert("text".into(), json!(text));
        metadata.insert("chunk_type".into(), json!("standard"));
        metadata.insert("document_type".into(), json!("logistics"));
        VectorMatch {
            id: id.to_string(),
            score,
            metadata,
        }
    }

    async fn engine(store: Arc<dyn VectorStore>, generator: Arc<dyn Generator>) -> QueryEngine {
        let settings = SharedConfig::new(EnterpriseConfig::default()).unwrap();
        QueryEngine::new(
            Arc::new(HashEmbedder::new(64)),
            store,
            generator,
            settings,
            EntityAnnotator::new(),
        )
        .await
    }

    fn request(query: &str) -> QueryRequest {
        QueryRequest {
            tenant_id: "acme".to_string(),
            query: query.to_string(),
            top_k: None,
        }
    }

    #[tokio::test]
    async fn test_low_scores_fall_back_to_general_knowledge() {
        let store = FixedStore::new(vec![
            hit("a", 0.2, "a.txt", "unrelated"),
            hit("b", 0.25, "b.txt", "also unrelated"),
        ]);
        let generator = ScriptedGenerator::new(&["Paris is the capital of France."]);
        let engine = engine(store, generator.clone()).await;

        let result = engine.answer(&request("what is the capital of france")).await.unwrap();
        assert_eq!(result.response_type, ResponseType::GeneralKnowledge);
        assert!(result.sources.is_empty());
        assert!((result.confidence - 0.8).abs() < 1e-6);
        assert_eq!(result.context_quality, None);
        assert!(result
            .processing_metadata
            .stages
            .contains(&QueryStage::GeneralKnowledge));
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_confidence_withheld_when_disabled() {
        let mut config = EnterpriseConfig::default();
        config.response.enable_confidence_scores = false;
        let store = FixedStore::new(vec![hit("a", 0.9, "fleet.txt", "Trucks are serviced monthly")]);
        let engine = QueryEngine::new(
            Arc::new(HashEmbedder::new(64)),
            store,
            ScriptedGenerator::new(&["Monthly."]),
            SharedConfig::new(config).unwrap(),
            EntityAnnotator::new(),
        )
        .await;

        let result = engine.answer(&request("how often are trucks serviced")).await.unwrap();
        assert_eq!(result.response_type, ResponseType::DocumentBased);
        assert_eq!(result.confidence, 0.0);
        assert!(result.context_quality.is_some());
    }

    #[tokio::test]
    async fn test_empty_index_falls_back_to_general_knowledge() {
        let generator = ScriptedGenerator::new(&["general answer"]);
        let engine = engine(FixedStore::new(Vec::new()), generator).await;

        let result = engine.answer(&request("hello there")).await.unwrap();
        assert_eq!(result.response_type, ResponseType::GeneralKnowledge);
    }

    #[tokio::test]
    async fn test_grounded_answer_with_deduplicated_sources() {
        let store = FixedStore::new(vec![
            hit("a1", 0.9, "fleet.txt", "Trucks are serviced monthly"),
            hit("a2", 0.8, "fleet.txt", "Service logs are kept for a year"),
            hit("b1", 0.7, "routes.txt", "Route planning happens weekly"),
        ]);
        let generator = ScriptedGenerator::new(&["Trucks are serviced monthly per fleet.txt."]);
        let engine = engine(store, generator.clone()).await;

        let result = engine.answer(&request("how often are trucks serviced")).await.unwrap();
        assert_eq!(result.response_type, ResponseType::DocumentBased);
        assert!(result.context_quality.is_some());
        let files: Vec<&str> = result.sources.iter().map(|s| s.file_name.as_str()).collect();
        assert_eq!(files, vec!["fleet.txt", "routes.txt"]);
        assert!((result.sources[0].relevance_score - 0.9).abs() < 1e-6);

        let calls = generator.calls.lock().unwrap();
        assert!(calls[0].0.contains("logistics"));
        assert!(calls[0].1.contains("Source 1: fleet.txt (Relevance: 0.900)"));
    }

    #[tokio::test]
    async fn test_missing_data_triggers_one_wider_retry() {
        let store = FixedStore::new(vec![
            hit("a", 0.9, "shipments.csv", "Record 1: carrier=FedEx | on_time=yes"),
            hit("b", 0.8, "shipments.csv", "Record 2: carrier=UPS | on_time=no"),
        ]);
        let generator = ScriptedGenerator::new(&[
            "The on-time data is missing for several carriers.",
            "FedEx was on time for all shipments and UPS was late once.",
        ]);
        let engine = engine(store.clone(), generator.clone()).await;

        // "highest" is analytical without stronger signals, so breadth is 20
        let result = engine
            .answer(&request("which carrier has the highest on-time rate"))
            .await
            .unwrap();

        assert_eq!(store.breadths(), vec![20, 50]);
        assert_eq!(generator.call_count(), 2);
        assert!(result.processing_metadata.retried);
        assert!(result.answer.starts_with("FedEx"));
        assert!(result
            .processing_metadata
            .stages
            .contains(&QueryStage::GenerateRetry));
    }

    #[tokio::test]
    async fn test_shorter_retry_still_missing_keeps_original() {
        let store = FixedStore::new(vec![hit(
            "a",
            0.9,
            "shipments.csv",
            "Record 1: carrier=FedEx | on_time=yes",
        )]);
        let original = "Only FedEx appears; the on-time data is missing for other carriers.";
        let generator = ScriptedGenerator::new(&[original, "Data is missing."]);
        let engine = engine(store.clone(), generator.clone()).await;

        let result = engine
            .answer(&request("which carrier has the highest on-time rate"))
            .await
            .unwrap();

        assert_eq!(generator.call_count(), 2);
        assert_eq!(store.breadths().len(), 2);
        assert_eq!(result.answer, original);
    }

    #[tokio::test]
    async fn test_no_retry_for_conversational_queries() {
        let store = FixedStore::new(vec![hit("a", 0.9, "notes.txt", "Meeting notes")]);
        let generator = ScriptedGenerator::new(&["The data is missing from the notes."]);
        let engine = engine(store.clone(), generator.clone()).await;

        let result = engine.answer(&request("what did the meeting cover")).await.unwrap();
        assert_eq!(generator.call_count(), 1);
        assert_eq!(store.breadths(), vec![8]);
        assert!(!result.processing_metadata.retried);
    }

    #[tokio::test]
    async fn test_cache_hit_returns_identical_result() {
        let store = FixedStore::new(vec![hit("a", 0.9, "fleet.txt", "Trucks are serviced monthly")]);
        let generator = ScriptedGenerator::new(&["first answer", "second answer"]);
        let engine = engine(store.clone(), generator.clone()).await;

        let first = engine.answer(&request("How often are trucks serviced?")).await.unwrap();
        let second = engine.answer(&request("how often are trucks serviced")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(generator.call_count(), 1);
        assert_eq!(store.breadths().len(), 1);
        assert_eq!(engine.cached_results().await, 1);
    }

    #[tokio::test]
    async fn test_cache_is_scoped_per_tenant() {
        let store = FixedStore::new(vec![hit("a", 0.9, "fleet.txt", "Trucks are serviced monthly")]);
        let generator = ScriptedGenerator::new(&["first", "second"]);
        let engine = engine(store, generator.clone()).await;

        engine.answer(&request("fleet service")).await.unwrap();
        let other = QueryRequest {
            tenant_id: "globex".to_string(),
            ..request("fleet service")
        };
        let result = engine.answer(&other).await.unwrap();
        assert_eq!(result.answer, "second");
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_collaborator_failure_propagates_uncached() {
        let generator = ScriptedGenerator::new(&["unused"]);
        let engine = engine(Arc::new(FailingStore), generator.clone()).await;

        let err = engine.answer(&request("anything")).await.unwrap_err();
        assert!(matches!(err, AppError::SearchError { .. }));
        assert_eq!(generator.call_count(), 0);
        assert_eq!(engine.cached_results().await, 0);
    }
}
