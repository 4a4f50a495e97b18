//! Retrieval and generation tunables
//!
//! Provides:
//! - Sectioned [`EnterpriseConfig`] with validated ranges
//! - Per-document-type profiles
//! - [`SharedConfig`], the runtime-updatable handle used by the query engine

use crate::document::DocumentType;
use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use validator::{Validate, ValidationError};

/// Process-wide RAG tunables
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, Validate)]
pub struct EnterpriseConfig {
    #[serde(default)]
    #[validate(nested)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    #[validate(nested)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    #[validate(nested)]
    pub breadth: BreadthConfig,

    #[serde(default)]
    #[validate(nested)]
    pub ranking: RankingConfig,

    #[serde(default)]
    #[validate(nested)]
    pub response: ResponseConfig,

    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub quality: QualityConfig,
}

/// Document chunking
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_chunk_overlap"))]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    #[serde(default = "default_chunk_size")]
    #[validate(range(min = 100, max = 5000))]
    pub chunk_size: usize,

    /// Characters shared between neighbouring chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Hard cap on chunks produced for one document
    #[serde(default = "default_max_chunks")]
    #[validate(range(min = 1))]
    pub max_chunks_per_document: usize,

    /// Chunks shorter than this are merged into their predecessor
    #[serde(default = "default_min_chunk_words")]
    pub min_chunk_words: usize,
}

/// Retrieval thresholds and budgets
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate)]
pub struct RetrievalConfig {
    /// Best raw score below this sends the query down the general-knowledge path
    #[serde(default = "default_similarity_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub similarity_threshold: f32,

    /// Matches scoring below this are dropped before ranking
    #[serde(default = "default_min_context_relevance")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_context_relevance: f32,

    /// Token budget for the assembled context
    #[serde(default = "default_max_context_tokens")]
    #[validate(range(min = 1000, max = 20000))]
    pub max_context_tokens: usize,

    /// Candidate pool size for non-analytical queries
    #[serde(default = "default_top_k_retrieval")]
    #[validate(range(min = 1, max = 200))]
    pub top_k_retrieval: usize,

    /// Chunks passed to the generator when the request does not say
    #[serde(default = "default_top_k_final")]
    #[validate(range(min = 1, max = 100))]
    pub top_k_final: usize,

    /// Missing-data retry only fires when the first breadth was below this
    #[serde(default = "default_retry_breadth_threshold")]
    pub retry_breadth_threshold: usize,

    /// Breadth and final chunk count used by the retry pass
    #[serde(default = "default_retry_breadth")]
    #[validate(range(min = 1, max = 200))]
    pub retry_breadth: usize,
}

/// Candidate pool sizes for analytical queries
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate)]
pub struct BreadthConfig {
    /// Query asks about all/every/total/complete
    #[serde(default = "default_exhaustive_breadth")]
    #[validate(range(min = 1, max = 200))]
    pub exhaustive: usize,

    /// Query compares groups
    #[serde(default = "default_comparison_breadth")]
    #[validate(range(min = 1, max = 200))]
    pub comparison: usize,

    /// Query averages or asks for performance per group
    #[serde(default = "default_aggregate_breadth")]
    #[validate(range(min = 1, max = 200))]
    pub aggregate: usize,

    /// Any other analytical query
    #[serde(default = "default_analytical_breadth")]
    #[validate(range(min = 1, max = 200))]
    pub analytical: usize,
}

/// Heuristic boost weights and caps
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate)]
pub struct RankingConfig {
    #[serde(default = "default_entity_match_weight")]
    pub entity_match_weight: f32,
    #[serde(default = "default_domain_term_weight")]
    pub domain_term_weight: f32,
    #[serde(default = "default_document_type_bonus")]
    pub document_type_bonus: f32,
    #[serde(default = "default_entity_boost_cap")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub entity_boost_cap: f32,

    #[serde(default = "default_record_pattern_boost")]
    pub record_pattern_boost: f32,
    #[serde(default = "default_structured_row_boost")]
    pub structured_row_boost: f32,
    /// Subtracted from column-only header chunks
    #[serde(default = "default_header_penalty")]
    pub header_penalty: f32,
    #[serde(default = "default_field_match_boost")]
    pub carrier_field_boost: f32,
    #[serde(default = "default_field_match_boost")]
    pub on_time_field_boost: f32,
    #[serde(default = "default_data_boost_cap")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub data_boost_cap: f32,

    /// Estimated tokens per whitespace-separated word
    #[serde(default = "default_tokens_per_word")]
    #[validate(range(min = 0.1, max = 10.0))]
    pub tokens_per_word: f32,
}

/// Generation settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate)]
pub struct ResponseConfig {
    #[serde(default = "default_temperature")]
    #[validate(range(min = 0.0, max = 2.0))]
    pub temperature: f32,

    #[serde(default = "default_max_output_tokens")]
    #[validate(range(min = 100, max = 8000))]
    pub max_output_tokens: u32,

    #[serde(default = "default_true")]
    pub enable_citations: bool,

    /// When off, results report a confidence of 0
    #[serde(default = "default_true")]
    pub enable_confidence_scores: bool,

    /// Confidence reported for ungrounded answers
    #[serde(default = "default_general_knowledge_confidence")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub general_knowledge_confidence: f32,
}

/// Query result cache
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_size")]
    #[validate(range(min = 1))]
    pub max_entries: usize,

    /// Oldest entries dropped at once when the cache is full
    #[serde(default = "default_eviction_batch")]
    #[validate(range(min = 1))]
    pub eviction_batch: usize,

    /// Entry lifetime in hours (0 keeps entries until evicted)
    #[serde(default = "default_cache_ttl_hours")]
    pub ttl_hours: u64,
}

/// Answer length expectations
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QualityConfig {
    #[serde(default = "default_min_response_length")]
    pub min_response_length: usize,

    #[serde(default = "default_max_response_length")]
    pub max_response_length: usize,
}

/// Specialised settings for one document type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentTypeProfile {
    pub document_type: DocumentType,
    pub chunk_size: usize,
    pub similarity_threshold: f32,
    pub temperature: f32,
    pub prompt_style: &'static str,
}

fn default_chunk_size() -> usize { 1200 }
fn default_chunk_overlap() -> usize { 200 }
fn default_max_chunks() -> usize { 100 }
fn default_min_chunk_words() -> usize { 20 }
fn default_similarity_threshold() -> f32 { 0.5 }
fn default_min_context_relevance() -> f32 { 0.4 }
fn default_max_context_tokens() -> usize { 6000 }
fn default_top_k_retrieval() -> usize { 8 }
fn default_top_k_final() -> usize { 8 }
fn default_retry_breadth_threshold() -> usize { 40 }
fn default_retry_breadth() -> usize { 50 }
fn default_exhaustive_breadth() -> usize { 50 }
fn default_comparison_breadth() -> usize { 40 }
fn default_aggregate_breadth() -> usize { 30 }
fn default_analytical_breadth() -> usize { 20 }
fn default_entity_match_weight() -> f32 { 0.1 }
fn default_domain_term_weight() -> f32 { 0.05 }
fn default_document_type_bonus() -> f32 { 0.1 }
fn default_entity_boost_cap() -> f32 { 0.3 }
fn default_record_pattern_boost() -> f32 { 0.4 }
fn default_structured_row_boost() -> f32 { 0.3 }
fn default_header_penalty() -> f32 { 0.2 }
fn default_field_match_boost() -> f32 { 0.2 }
fn default_data_boost_cap() -> f32 { 0.5 }
fn default_tokens_per_word() -> f32 { 1.3 }
fn default_temperature() -> f32 { 0.0 }
fn default_max_output_tokens() -> u32 { 4000 }
fn default_general_knowledge_confidence() -> f32 { 0.8 }
fn default_cache_size() -> usize { 500 }
fn default_eviction_batch() -> usize { 50 }
fn default_cache_ttl_hours() -> u64 { 24 }
fn default_min_response_length() -> usize { 50 }
fn default_max_response_length() -> usize { 3000 }
fn default_true() -> bool { true }

fn validate_chunk_overlap(chunking: &ChunkingConfig) -> std::result::Result<(), ValidationError> {
    if chunking.chunk_overlap >= chunking.chunk_size {
        let mut err = ValidationError::new("chunk_overlap");
        err.message = Some("chunk overlap must be less than chunk size".into());
        return Err(err);
    }
    Ok(())
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_chunks_per_document: default_max_chunks(),
            min_chunk_words: default_min_chunk_words(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            min_context_relevance: default_min_context_relevance(),
            max_context_tokens: default_max_context_tokens(),
            top_k_retrieval: default_top_k_retrieval(),
            top_k_final: default_top_k_final(),
            retry_breadth_threshold: default_retry_breadth_threshold(),
            retry_breadth: default_retry_breadth(),
        }
    }
}

impl Default for BreadthConfig {
    fn default() -> Self {
        Self {
            exhaustive: default_exhaustive_breadth(),
            comparison: default_comparison_breadth(),
            aggregate: default_aggregate_breadth(),
            analytical: default_analytical_breadth(),
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            entity_match_weight: default_entity_match_weight(),
            domain_term_weight: default_domain_term_weight(),
            document_type_bonus: default_document_type_bonus(),
            entity_boost_cap: default_entity_boost_cap(),
            record_pattern_boost: default_record_pattern_boost(),
            structured_row_boost: default_structured_row_boost(),
            header_penalty: default_header_penalty(),
            carrier_field_boost: default_field_match_boost(),
            on_time_field_boost: default_field_match_boost(),
            data_boost_cap: default_data_boost_cap(),
            tokens_per_word: default_tokens_per_word(),
        }
    }
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            enable_citations: true,
            enable_confidence_scores: true,
            general_knowledge_confidence: default_general_knowledge_confidence(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_cache_size(),
            eviction_batch: default_eviction_batch(),
            ttl_hours: default_cache_ttl_hours(),
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_response_length: default_min_response_length(),
            max_response_length: default_max_response_length(),
        }
    }
}

impl EnterpriseConfig {
    /// Validate all ranges, mapping failures to a configuration error
    pub fn ensure_valid(&self) -> Result<()> {
        self.validate().map_err(|e| AppError::ConfigurationInvalid {
            message: e.to_string(),
        })
    }

    /// Specialised settings for a document type
    pub fn document_type_profile(&self, document_type: DocumentType) -> DocumentTypeProfile {
        let (chunk_size, similarity_threshold, temperature) = match document_type {
            DocumentType::Financial => (1000, 0.8, 0.0),
            DocumentType::Legal => (1500, 0.85, 0.0),
            DocumentType::Technical => (1200, 0.75, 0.1),
            DocumentType::Policy => (1000, 0.8, 0.0),
            DocumentType::Logistics => (
                self.chunking.chunk_size,
                self.retrieval.similarity_threshold,
                0.0,
            ),
            DocumentType::General => (
                self.chunking.chunk_size,
                self.retrieval.similarity_threshold,
                self.response.temperature,
            ),
        };

        DocumentTypeProfile {
            document_type,
            chunk_size: chunk_size.max(self.chunking.chunk_overlap + 1),
            similarity_threshold,
            temperature,
            prompt_style: document_type.prompt_style(),
        }
    }

    /// Profiles for every document type, in priority order
    pub fn document_type_profiles(&self) -> Vec<DocumentTypeProfile> {
        DocumentType::PRIORITY
            .iter()
            .map(|t| self.document_type_profile(*t))
            .collect()
    }
}

/// Partial update accepted from the admin surface
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigUpdate {
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub similarity_threshold: Option<f32>,
    pub min_context_relevance: Option<f32>,
    pub max_context_tokens: Option<usize>,
    pub top_k_final: Option<usize>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub enable_cache: Option<bool>,
}

impl ConfigUpdate {
    fn apply_to(&self, config: &mut EnterpriseConfig) {
        if let Some(v) = self.chunk_size {
            config.chunking.chunk_size = v;
        }
        if let Some(v) = self.chunk_overlap {
            config.chunking.chunk_overlap = v;
        }
        if let Some(v) = self.similarity_threshold {
            config.retrieval.similarity_threshold = v;
        }
        if let Some(v) = self.min_context_relevance {
            config.retrieval.min_context_relevance = v;
        }
        if let Some(v) = self.max_context_tokens {
            config.retrieval.max_context_tokens = v;
        }
        if let Some(v) = self.top_k_final {
            config.retrieval.top_k_final = v;
        }
        if let Some(v) = self.temperature {
            config.response.temperature = v;
        }
        if let Some(v) = self.max_output_tokens {
            config.response.max_output_tokens = v;
        }
        if let Some(v) = self.enable_cache {
            config.cache.enabled = v;
        }
    }
}

/// Runtime-updatable configuration handle.
///
/// Updates are validated on a copy and only swapped in when valid, so a
/// rejected update leaves the previous configuration in effect.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    current: Arc<RwLock<EnterpriseConfig>>,
    startup: Arc<EnterpriseConfig>,
}

impl SharedConfig {
    /// Wrap a validated configuration
    pub fn new(config: EnterpriseConfig) -> Result<Self> {
        config.ensure_valid()?;
        Ok(Self {
            current: Arc::new(RwLock::new(config.clone())),
            startup: Arc::new(config),
        })
    }

    /// Copy of the configuration currently in effect
    pub async fn snapshot(&self) -> EnterpriseConfig {
        self.current.read().await.clone()
    }

    /// Apply a partial update
    pub async fn update(&self, update: &ConfigUpdate) -> Result<EnterpriseConfig> {
        let mut guard = self.current.write().await;
        let mut candidate = guard.clone();
        update.apply_to(&mut candidate);
        candidate.ensure_valid()?;

        *guard = candidate.clone();
        info!(?update, "Enterprise configuration updated");
        Ok(candidate)
    }

    /// Replace the whole configuration
    pub async fn replace(&self, config: EnterpriseConfig) -> Result<()> {
        config.ensure_valid()?;
        *self.current.write().await = config;
        Ok(())
    }

    /// Restore the configuration loaded at startup
    pub async fn reset(&self) -> EnterpriseConfig {
        let startup = (*self.startup).clone();
        *self.current.write().await = startup.clone();
        info!("Enterprise configuration reset to startup values");
        startup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EnterpriseConfig::default();
        assert!(config.ensure_valid().is_ok());
        assert_eq!(config.retrieval.top_k_final, 8);
        assert_eq!(config.cache.max_entries, 500);
    }

    #[test]
    fn overlap_must_be_below_chunk_size() {
        let mut config = EnterpriseConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(matches!(
            config.ensure_valid(),
            Err(AppError::ConfigurationInvalid { .. })
        ));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut config = EnterpriseConfig::default();
        config.retrieval.max_context_tokens = 500;
        assert!(config.ensure_valid().is_err());

        let mut config = EnterpriseConfig::default();
        config.response.temperature = 2.5;
        assert!(config.ensure_valid().is_err());

        let mut config = EnterpriseConfig::default();
        config.retrieval.similarity_threshold = 1.2;
        assert!(config.ensure_valid().is_err());
    }

    #[test]
    fn profiles_follow_document_type() {
        let config = EnterpriseConfig::default();
        let legal = config.document_type_profile(DocumentType::Legal);
        assert_eq!(legal.chunk_size, 1500);
        assert_eq!(legal.prompt_style, "legal_expert");

        let general = config.document_type_profile(DocumentType::General);
        assert_eq!(general.chunk_size, config.chunking.chunk_size);
        assert_eq!(config.document_type_profiles().len(), 6);
    }

    #[tokio::test]
    async fn invalid_update_keeps_previous_config() {
        let shared = SharedConfig::new(EnterpriseConfig::default()).unwrap();

        let bad = ConfigUpdate {
            max_output_tokens: Some(50),
            ..Default::default()
        };
        assert!(shared.update(&bad).await.is_err());
        assert_eq!(shared.snapshot().await.response.max_output_tokens, 4000);

        let good = ConfigUpdate {
            similarity_threshold: Some(0.6),
            enable_cache: Some(false),
            ..Default::default()
        };
        let updated = shared.update(&good).await.unwrap();
        assert_eq!(updated.retrieval.similarity_threshold, 0.6);
        assert!(!shared.snapshot().await.cache.enabled);
    }

    #[tokio::test]
    async fn reset_restores_startup_values() {
        let shared = SharedConfig::new(EnterpriseConfig::default()).unwrap();
        shared
            .update(&ConfigUpdate {
                chunk_size: Some(800),
                ..Default::default()
            })
            .await
            .unwrap();

        let restored = shared.reset().await;
        assert_eq!(restored.chunking.chunk_size, 1200);
        assert_eq!(shared.snapshot().await, EnterpriseConfig::default());
    }
}
