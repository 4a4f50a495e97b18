//! Context Optimizer - Re-scores, groups, and selects retrieved chunks
//!
//! Provides:
//! - Entity-aware and data-aware score boosts
//! - Per-document grouping for source diversity
//! - Token-bounded greedy selection
//! - Confidence and quality metrics for the selected context

use super::annotator::{domain_terms_for, EntityAnnotation, EntityAnnotator};
use super::breadth::is_analytical;
use crate::config::{EnterpriseConfig, RankingConfig, RetrievalConfig};
use crate::document::{word_count, ChunkType, DocumentType};
use crate::vector::VectorMatch;
use regex_lite::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::LazyLock;
use tracing::debug;

static KEY_VALUE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+=\S").expect("static pattern"));

/// Structured record text: `|`-separated `key=value` pairs
pub fn is_record_chunk(text: &str) -> bool {
    text.contains('|') && KEY_VALUE_PATTERN.is_match(text)
}

fn has_field(lower_text: &str, field: &str) -> bool {
    lower_text.contains(&format!("{}=", field)) || lower_text.contains(&format!("{}:", field))
}

/// A search hit with its ranking adjustments
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMatch {
    #[serde(flatten)]
    pub base: VectorMatch,
    pub entity_boost: f32,
    pub data_boost: f32,
    /// Raw score plus boosts; may exceed 1.0 or fall below the raw score
    pub enhanced_score: f32,
}

impl ScoredMatch {
    /// Raw similarity score
    pub fn score(&self) -> f32 {
        self.base.score
    }

    fn group_key(&self) -> String {
        self.base
            .doc_id()
            .or_else(|| self.base.file_name())
            .unwrap_or("unknown")
            .to_string()
    }
}

/// Chunks chosen for generation, in selection order
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizedContext {
    pub chunks: Vec<ScoredMatch>,
    pub confidence: f32,
    pub quality_score: f32,
    pub document_types: BTreeSet<String>,
    pub avg_relevance: f32,
    /// Estimated tokens of the selected chunks
    pub total_tokens: f32,
}

impl OptimizedContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Most frequent document type, ties broken by type priority
    pub fn primary_document_type(&self) -> DocumentType {
        let mut counts: HashMap<DocumentType, usize> = HashMap::new();
        for chunk in &self.chunks {
            *counts
                .entry(DocumentType::parse(chunk.base.document_type()))
                .or_insert(0) += 1;
        }

        let best = counts.values().copied().max().unwrap_or(0);
        DocumentType::PRIORITY
            .into_iter()
            .find(|t| best > 0 && counts.get(t) == Some(&best))
            .unwrap_or(DocumentType::General)
    }
}

/// Query-time chunk ranking and selection
pub struct ContextOptimizer {
    retrieval: RetrievalConfig,
    ranking: RankingConfig,
    annotator: EntityAnnotator,
}

impl ContextOptimizer {
    /// Build from a configuration snapshot
    pub fn new(config: &EnterpriseConfig, annotator: EntityAnnotator) -> Self {
        Self {
            retrieval: config.retrieval.clone(),
            ranking: config.ranking.clone(),
            annotator,
        }
    }

    /// Select at most `top_k_final` chunks within the token budget
    pub fn optimize(&self, matches: &[VectorMatch], query: &str, top_k_final: usize) -> OptimizedContext {
        let analytical = is_analytical(query);
        let query_signals = self.annotator.annotate_query(query);

        let scored: Vec<ScoredMatch> = matches
            .iter()
            .filter(|m| m.score >= self.retrieval.min_context_relevance)
            .map(|m| {
                let entity_boost = self.entity_boost(m, &query_signals);
                let data_boost = if analytical {
                    self.data_boost(m, query)
                } else {
                    0.0
                };
                ScoredMatch {
                    base: m.clone(),
                    entity_boost,
                    data_boost,
                    enhanced_score: m.score + entity_boost + data_boost,
                }
            })
            .collect();

        let groups = group_by_document(scored);
        let selected = self.select(groups, analytical, top_k_final);

        debug!(
            candidates = matches.len(),
            selected = selected.0.len(),
            tokens = selected.1,
            analytical,
            "Context optimized"
        );
        summarize(selected.0, selected.1)
    }

    fn entity_boost(&self, m: &VectorMatch, query: &EntityAnnotation) -> f32 {
        let query_names: HashSet<String> = query.entity_names().into_iter().collect();
        let query_terms: HashSet<String> = query.domain_terms().into_iter().collect();

        let chunk_names: HashSet<String> = m
            .string_list("entities")
            .into_iter()
            .map(str::to_lowercase)
            .collect();
        let chunk_terms: HashSet<String> = m
            .string_list("domain_terms")
            .into_iter()
            .map(str::to_lowercase)
            .collect();

        let mut boost = query_names.intersection(&chunk_names).count() as f32
            * self.ranking.entity_match_weight;
        boost += query_terms.intersection(&chunk_terms).count() as f32
            * self.ranking.domain_term_weight;

        let vocabulary = domain_terms_for(DocumentType::parse(m.document_type()));
        if query_terms.iter().any(|t| vocabulary.contains(&t.as_str())) {
            boost += self.ranking.document_type_bonus;
        }

        boost.min(self.ranking.entity_boost_cap)
    }

    fn data_boost(&self, m: &VectorMatch, query: &str) -> f32 {
        let text = m.text();
        let lower_text = text.to_lowercase();
        let lower_query = query.to_lowercase();
        let chunk_type = ChunkType::parse(m.chunk_type());
        let record = is_record_chunk(text);

        let mut boost = 0.0;
        if record {
            boost += self.ranking.record_pattern_boost;
        }
        if chunk_type == Some(ChunkType::StructuredRow) {
            boost += self.ranking.structured_row_boost;
        }
        if chunk_type == Some(ChunkType::StructuredHeader) && text.contains("Columns:") && !record {
            boost -= self.ranking.header_penalty;
        }
        if lower_query.contains("carrier") && has_field(&lower_text, "carrier") {
            boost += self.ranking.carrier_field_boost;
        }
        if ["delivery", "on-time", "performance"]
            .iter()
            .any(|t| lower_query.contains(t))
            && has_field(&lower_text, "on_time")
        {
            boost += self.ranking.on_time_field_boost;
        }

        boost.min(self.ranking.data_boost_cap)
    }

    fn select(
        &self,
        groups: Vec<Vec<ScoredMatch>>,
        analytical: bool,
        top_k_final: usize,
    ) -> (Vec<ScoredMatch>, f32) {
        let budget = self.retrieval.max_context_tokens as f32;
        let mut selected = Vec::new();
        let mut total_tokens = 0.0f32;

        'documents: for group in groups {
            for candidate in order_within_document(group, analytical) {
                if selected.len() >= top_k_final {
                    break 'documents;
                }
                let cost = word_count(candidate.base.text()) as f32 * self.ranking.tokens_per_word;
                if total_tokens + cost > budget {
                    continue;
                }
                total_tokens += cost;
                selected.push(candidate);
            }
        }

        (selected, total_tokens)
    }
}

/// Partition by source document, best raw score first; ties keep
/// first-seen order
fn group_by_document(scored: Vec<ScoredMatch>) -> Vec<Vec<ScoredMatch>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<ScoredMatch>> = Vec::new();

    for m in scored {
        let key = m.group_key();
        match index.get(&key) {
            Some(&i) => groups[i].push(m),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![m]);
            }
        }
    }

    let best = |g: &Vec<ScoredMatch>| g.iter().map(ScoredMatch::score).fold(f32::MIN, f32::max);
    groups.sort_by(|a, b| best(b).total_cmp(&best(a)));
    groups
}

fn by_enhanced_desc(a: &ScoredMatch, b: &ScoredMatch) -> std::cmp::Ordering {
    b.enhanced_score.total_cmp(&a.enhanced_score)
}

fn order_within_document(group: Vec<ScoredMatch>, analytical: bool) -> Vec<ScoredMatch> {
    if !analytical {
        let mut ordered = group;
        ordered.sort_by(by_enhanced_desc);
        return ordered;
    }

    let (mut records, mut others): (Vec<_>, Vec<_>) =
        group.into_iter().partition(|m| is_record_chunk(m.base.text()));
    records.sort_by(by_enhanced_desc);
    others.sort_by(by_enhanced_desc);
    records.extend(others);
    records
}

fn summarize(chunks: Vec<ScoredMatch>, total_tokens: f32) -> OptimizedContext {
    if chunks.is_empty() {
        return OptimizedContext::default();
    }

    let n = chunks.len() as f32;
    let avg_relevance = chunks.iter().map(ScoredMatch::score).sum::<f32>() / n;

    let distinct_docs = chunks
        .iter()
        .map(ScoredMatch::group_key)
        .collect::<HashSet<_>>()
        .len() as f32;

    let mut type_counts: HashMap<&str, usize> = HashMap::new();
    for chunk in &chunks {
        *type_counts.entry(chunk.base.document_type()).or_insert(0) += 1;
    }
    let max_same_type = type_counts.values().copied().max().unwrap_or(0) as f32;

    let quality_score = (0.4 * avg_relevance
        + 0.2 * (distinct_docs / n)
        + 0.2 * (n / 5.0).min(1.0)
        + 0.2 * (max_same_type / n))
        .min(1.0);

    let document_types = type_counts.keys().map(|t| t.to_string()).collect();

    OptimizedContext {
        confidence: avg_relevance.clamp(0.0, 1.0),
        quality_score,
        document_types,
        avg_relevance,
        total_tokens,
        chunks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn hit(id: &str, score: f32, doc: &str, text: &str, chunk_type: &str) -> VectorMatch {
        let mut metadata = Map::new();
        metadata.insert("doc_id".into(), json!(doc));
        metadata.insert("file_name".into(), json!(format!("{}.xlsx", doc)));
        metadata.insert("text".into(), json!(text));
        metadata.insert("chunk_type".into(), json!(chunk_type));
        metadata.insert("document_type".into(), json!("logistics"));
        VectorMatch {
            id: id.to_string(),
            score,
            metadata,
        }
    }

    fn optimizer(configure: impl FnOnce(&mut EnterpriseConfig)) -> ContextOptimizer {
        let mut config = EnterpriseConfig::default();
        configure(&mut config);
        ContextOptimizer::new(&config, EntityAnnotator::new())
    }

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    #[test]
    fn test_empty_input_gives_empty_context() {
        let context = optimizer(|_| {}).optimize(&[], "anything", 8);
        assert!(context.is_empty());
        assert_eq!(context.confidence, 0.0);
        assert_eq!(context.quality_score, 0.0);
    }

    #[test]
    fn test_all_below_relevance_is_empty() {
        let matches = vec![
            hit("a", 0.2, "d1", "text one", "standard"),
            hit("b", 0.35, "d2", "text two", "standard"),
        ];
        let context = optimizer(|_| {}).optimize(&matches, "what happened", 8);
        assert!(context.is_empty());
        assert_eq!(context.confidence, 0.0);
        assert_eq!(context.quality_score, 0.0);
    }

    #[test]
    fn test_respects_token_budget_and_top_k() {
        // 500 words cost 650 tokens, so two fit in 1500
        let matches: Vec<VectorMatch> = (0..10)
            .map(|i| hit(&format!("c{}", i), 0.9 - i as f32 * 0.01, &format!("d{}", i), &words(500), "standard"))
            .collect();

        let opt = optimizer(|c| c.retrieval.max_context_tokens = 1500);
        let context = opt.optimize(&matches, "summary please", 8);
        assert_eq!(context.chunks.len(), 2);
        assert!(context.total_tokens <= 1500.0);

        let opt = optimizer(|c| c.retrieval.max_context_tokens = 20000);
        let context = opt.optimize(&matches, "summary please", 3);
        assert_eq!(context.chunks.len(), 3);
    }

    #[test]
    fn test_oversized_chunks_are_skipped_not_fatal() {
        let matches = vec![
            hit("big", 0.95, "d1", &words(2000), "standard"),
            hit("small", 0.6, "d1", &words(10), "standard"),
        ];
        let opt = optimizer(|c| c.retrieval.max_context_tokens = 1000);
        let context = opt.optimize(&matches, "summary please", 8);
        assert_eq!(context.chunks.len(), 1);
        assert_eq!(context.chunks[0].base.id, "small");
    }

    #[test]
    fn test_budget_too_small_selects_nothing() {
        let matches = vec![hit("big", 0.95, "d1", &words(2000), "standard")];
        let opt = optimizer(|c| c.retrieval.max_context_tokens = 1000);
        assert!(opt.optimize(&matches, "summary", 8).is_empty());
    }

    #[test]
    fn test_record_chunks_lead_for_analytical_queries() {
        let matches = vec![
            hit("header", 0.95, "d1", "SHEET: Shipments\nColumns: carrier, on_time", "structured_header"),
            hit("prose", 0.9, "d1", "General notes on delivery operations", "standard"),
            hit("row", 0.5, "d1", "Record 1: carrier=FedEx | on_time=yes", "structured_row"),
        ];
        let context = optimizer(|_| {}).optimize(
            &matches,
            "what is the average delivery performance by carrier",
            8,
        );

        let first_other = context
            .chunks
            .iter()
            .position(|c| !is_record_chunk(c.base.text()))
            .unwrap();
        let last_record = context
            .chunks
            .iter()
            .rposition(|c| is_record_chunk(c.base.text()))
            .unwrap();
        assert!(last_record < first_other);
        assert_eq!(context.chunks[0].base.id, "row");
    }

    #[test]
    fn test_boosts_never_exceed_caps() {
        let mut m = hit(
            "row",
            0.5,
            "d1",
            "Record 1: carrier=FedEx | on_time=yes | revenue=10",
            "structured_row",
        );
        m.metadata.insert("entities".into(), json!(["fedex", "ups", "dhl", "usps"]));
        m.metadata.insert(
            "domain_terms".into(),
            json!(["carrier", "delivery", "shipment", "route", "freight", "revenue"]),
        );

        let opt = optimizer(|_| {});
        let context = opt.optimize(
            &[m],
            "average carrier delivery performance for shipment route freight revenue",
            8,
        );
        let chunk = &context.chunks[0];
        let ranking = RankingConfig::default();
        assert!(chunk.entity_boost <= ranking.entity_boost_cap + f32::EPSILON);
        assert!(chunk.data_boost <= ranking.data_boost_cap + f32::EPSILON);
        assert!(chunk.entity_boost > 0.0);
        assert!(
            (chunk.enhanced_score - (chunk.score() + chunk.entity_boost + chunk.data_boost)).abs()
                < 1e-6
        );
    }

    #[test]
    fn test_header_penalty_for_analytical_queries() {
        let header = hit(
            "h",
            0.8,
            "d1",
            "SHEET: Shipments\nColumns: id, weight",
            "structured_header",
        );
        let context = optimizer(|_| {}).optimize(&[header], "total count of shipments", 8);
        assert!(context.chunks[0].data_boost < 0.0);
        assert!(context.chunks[0].enhanced_score < context.chunks[0].score());
    }

    #[test]
    fn test_documents_ordered_by_best_raw_score() {
        let matches = vec![
            hit("a1", 0.6, "doc-a", "alpha one", "standard"),
            hit("b1", 0.9, "doc-b", "beta one", "standard"),
            hit("a2", 0.7, "doc-a", "alpha two", "standard"),
        ];
        let context = optimizer(|_| {}).optimize(&matches, "tell me about it", 8);
        let ids: Vec<&str> = context.chunks.iter().map(|c| c.base.id.as_str()).collect();
        assert_eq!(ids, vec!["b1", "a2", "a1"]);
    }

    #[test]
    fn test_metrics() {
        let matches = vec![
            hit("a", 0.8, "d1", "alpha", "standard"),
            hit("b", 0.6, "d2", "beta", "standard"),
        ];
        let context = optimizer(|_| {}).optimize(&matches, "tell me", 8);
        assert!((context.avg_relevance - 0.7).abs() < 1e-6);
        assert!((context.confidence - 0.7).abs() < 1e-6);
        // 0.4*0.7 + 0.2*1 + 0.2*0.4 + 0.2*1
        assert!((context.quality_score - 0.76).abs() < 1e-5);
        assert!(context.document_types.contains("logistics"));
        assert_eq!(context.primary_document_type(), DocumentType::Logistics);
    }

    #[test]
    fn test_primary_type_tie_uses_priority() {
        let mut legal = hit("l", 0.8, "d1", "alpha", "standard");
        legal.metadata.insert("document_type".into(), Value::from("legal"));
        let mut financial = hit("f", 0.7, "d2", "beta", "standard");
        financial.metadata.insert("document_type".into(), Value::from("financial"));

        let context = optimizer(|_| {}).optimize(&[legal, financial], "tell me", 8);
        assert_eq!(context.primary_document_type(), DocumentType::Financial);
    }

    #[test]
    fn test_primary_type_follows_majority() {
        let financial = |id: &str, score: f32| {
            let mut m = hit(id, score, id, "quarterly figures", "standard");
            m.metadata.insert("document_type".into(), Value::from("financial"));
            m
        };
        // one logistics chunk among financial ones does not pick the logistics prompt
        let matches = vec![
            hit("l", 0.9, "log", "route notes", "standard"),
            financial("f1", 0.8),
            financial("f2", 0.7),
        ];
        let context = optimizer(|_| {}).optimize(&matches, "tell me", 8);
        assert_eq!(context.chunks.len(), 3);
        assert_eq!(context.primary_document_type(), DocumentType::Financial);
    }
}
