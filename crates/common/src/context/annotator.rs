//! Entity and domain-term annotation
//!
//! Lightweight signals used only for ranking:
//! - Named entities from an optional recognizer
//! - Domain-term matches per document type
//! - Money amounts, percentages, time periods, key numbers

use crate::document::{Chunk, DocumentType};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};

static MONEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$[\d,]+(?:\.\d{2})?").expect("static pattern"));

static PERCENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?%").expect("static pattern"));

static NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,3}(?:,\d{3})*(?:\.\d+)?\b").expect("static pattern"));

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:Q[1-4]|January|February|March|April|May|June|July|August|September|October|November|December|\d{1,2}/\d{1,2}/\d{4}|\d{4})\b",
    )
    .expect("static pattern")
});

const FINANCIAL_TERMS: &[&str] = &[
    "revenue", "profit", "loss", "margin", "roi", "ebitda", "cash flow",
    "quarterly", "annual", "budget", "forecast", "earnings",
];
const BUSINESS_TERMS: &[&str] = &[
    "strategy", "initiative", "project", "milestone", "deadline",
    "stakeholder", "customer", "client", "vendor", "supplier",
];
const TECHNICAL_TERMS: &[&str] = &[
    "api", "database", "server", "application", "system", "platform",
    "integration", "deployment", "configuration", "architecture",
];
const LEGAL_TERMS: &[&str] = &[
    "contract", "agreement", "clause", "compliance", "regulation",
    "policy", "procedure", "requirement", "obligation", "liability",
];
const LOGISTICS_TERMS: &[&str] = &[
    "shipment", "delivery", "carrier", "freight", "route",
    "on-time", "warehouse", "tracking", "transit", "cargo",
];

/// Maximum key numbers kept per chunk
const MAX_KEY_NUMBERS: usize = 10;

pub const FINANCIAL_AMOUNTS: &str = "financial_amounts";
pub const PERCENTAGES: &str = "percentages";
pub const TIME_PERIODS: &str = "time_periods";
pub const KEY_NUMBERS: &str = "key_numbers";

/// Domain vocabulary consulted for a document type
pub fn domain_terms_for(document_type: DocumentType) -> &'static [&'static str] {
    match document_type {
        DocumentType::Financial => FINANCIAL_TERMS,
        DocumentType::Technical => TECHNICAL_TERMS,
        DocumentType::Legal => LEGAL_TERMS,
        DocumentType::Logistics => LOGISTICS_TERMS,
        DocumentType::Policy | DocumentType::General => BUSINESS_TERMS,
    }
}

/// Entity found by a recognizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedEntity {
    pub name: String,
    /// people, organizations, locations, ...
    pub entity_type: String,
    pub salience: f32,
}

/// Optional named-entity recognition backend
pub trait EntityRecognizer: Send + Sync {
    fn recognize(&self, text: &str) -> Vec<NamedEntity>;
}

/// Signals extracted from one chunk or query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityAnnotation {
    pub chunk_index: usize,
    pub entities: Vec<NamedEntity>,
    /// Category name to matched values, e.g. `logistics_terms`, `percentages`
    pub terms: BTreeMap<String, Vec<String>>,
}

impl EntityAnnotation {
    /// Lowercased entity names
    pub fn entity_names(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.name.to_lowercase()).collect()
    }

    /// Values of every `*_terms` category
    pub fn domain_terms(&self) -> Vec<String> {
        self.terms
            .iter()
            .filter(|(key, _)| key.ends_with("_terms"))
            .flat_map(|(_, values)| values.iter().cloned())
            .collect()
    }

    pub fn term_count(&self) -> usize {
        self.terms.values().map(Vec::len).sum()
    }

    pub fn has(&self, category: &str) -> bool {
        self.terms.get(category).is_some_and(|v| !v.is_empty())
    }
}

/// Counts and highlights across a whole document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub entity_type_counts: BTreeMap<String, usize>,
    pub top_entities: Vec<NamedEntity>,
    pub term_counts: BTreeMap<String, usize>,
    pub key_insights: Vec<String>,
}

/// Per-chunk annotations plus deduplicated totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityBundle {
    pub annotations: Vec<EntityAnnotation>,
    pub entities: Vec<NamedEntity>,
    pub terms: BTreeMap<String, Vec<String>>,
    pub summary: EntitySummary,
}

impl EntityBundle {
    /// Annotation for a chunk position, if that chunk had text
    pub fn for_chunk(&self, chunk_index: usize) -> Option<&EntityAnnotation> {
        self.annotations.iter().find(|a| a.chunk_index == chunk_index)
    }
}

/// Pattern-based annotator with an optional entity recognizer
#[derive(Clone, Default)]
pub struct EntityAnnotator {
    recognizer: Option<Arc<dyn EntityRecognizer>>,
}

fn contains_term(haystack: &str, term: &str) -> bool {
    haystack.match_indices(term).any(|(i, _)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + term.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn find_all(pattern: &Regex, text: &str) -> Vec<String> {
    pattern.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}

impl EntityAnnotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recognizer(recognizer: Arc<dyn EntityRecognizer>) -> Self {
        Self {
            recognizer: Some(recognizer),
        }
    }

    fn recognize(&self, text: &str) -> Vec<NamedEntity> {
        self.recognizer
            .as_ref()
            .map(|r| r.recognize(text))
            .unwrap_or_default()
    }

    fn extract_patterns(text: &str, document_type: DocumentType) -> BTreeMap<String, Vec<String>> {
        let mut terms = BTreeMap::new();

        let money = find_all(&MONEY_PATTERN, text);
        if !money.is_empty() {
            terms.insert(FINANCIAL_AMOUNTS.to_string(), money);
        }

        let percentages = find_all(&PERCENT_PATTERN, text);
        if !percentages.is_empty() {
            terms.insert(PERCENTAGES.to_string(), percentages);
        }

        if document_type == DocumentType::Financial {
            let mut numbers = find_all(&NUMBER_PATTERN, text);
            numbers.truncate(MAX_KEY_NUMBERS);
            if !numbers.is_empty() {
                terms.insert(KEY_NUMBERS.to_string(), numbers);
            }
        }

        let periods: BTreeSet<String> = find_all(&DATE_PATTERN, text).into_iter().collect();
        if !periods.is_empty() {
            terms.insert(TIME_PERIODS.to_string(), periods.into_iter().collect());
        }

        terms
    }

    fn annotate_text(&self, text: &str, document_type: DocumentType) -> EntityAnnotation {
        let lower = text.to_lowercase();
        let mut terms = Self::extract_patterns(text, document_type);

        let matched: Vec<String> = domain_terms_for(document_type)
            .iter()
            .filter(|t| contains_term(&lower, t))
            .map(|t| t.to_string())
            .collect();
        if !matched.is_empty() {
            terms.insert(format!("{}_terms", document_type.as_str()), matched);
        }

        EntityAnnotation {
            chunk_index: 0,
            entities: self.recognize(text),
            terms,
        }
    }

    /// Annotate every non-empty chunk of a document
    pub fn annotate(&self, chunks: &[Chunk], document_type: DocumentType) -> EntityBundle {
        let mut bundle = EntityBundle::default();

        for chunk in chunks.iter().filter(|c| !c.text.trim().is_empty()) {
            let mut annotation = self.annotate_text(&chunk.text, document_type);
            annotation.chunk_index = chunk.chunk_index;

            for entity in &annotation.entities {
                let seen = bundle
                    .entities
                    .iter()
                    .any(|e| e.name.eq_ignore_ascii_case(&entity.name));
                if !seen {
                    bundle.entities.push(entity.clone());
                }
            }
            for (category, values) in &annotation.terms {
                let totals = bundle.terms.entry(category.clone()).or_default();
                for value in values {
                    push_unique(totals, value.clone());
                }
            }
            bundle.annotations.push(annotation);
        }

        bundle.summary = summarize(&bundle.entities, &bundle.terms);
        bundle
    }

    /// Annotate a query; its document type is unknown, so every
    /// domain vocabulary is consulted
    pub fn annotate_query(&self, query: &str) -> EntityAnnotation {
        let lower = query.to_lowercase();
        let mut terms = Self::extract_patterns(query, DocumentType::General);

        for (name, vocabulary) in [
            ("financial", FINANCIAL_TERMS),
            ("business", BUSINESS_TERMS),
            ("technical", TECHNICAL_TERMS),
            ("legal", LEGAL_TERMS),
            ("logistics", LOGISTICS_TERMS),
        ] {
            let matched: Vec<String> = vocabulary
                .iter()
                .filter(|t| contains_term(&lower, t))
                .map(|t| t.to_string())
                .collect();
            if !matched.is_empty() {
                terms.insert(format!("{}_terms", name), matched);
            }
        }

        EntityAnnotation {
            chunk_index: 0,
            entities: self.recognize(query),
            terms,
        }
    }
}

fn summarize(entities: &[NamedEntity], terms: &BTreeMap<String, Vec<String>>) -> EntitySummary {
    let mut entity_type_counts = BTreeMap::new();
    for entity in entities {
        *entity_type_counts.entry(entity.entity_type.clone()).or_insert(0) += 1;
    }

    let mut top_entities = entities.to_vec();
    top_entities.sort_by(|a, b| b.salience.total_cmp(&a.salience));
    top_entities.truncate(10);

    let term_counts: BTreeMap<String, usize> =
        terms.iter().map(|(k, v)| (k.clone(), v.len())).collect();

    let mut key_insights = Vec::new();
    let people = entity_type_counts.get("people").copied().unwrap_or(0);
    if people > 3 {
        key_insights.push(format!("Document mentions {} key individuals", people));
    }
    let organizations = entity_type_counts.get("organizations").copied().unwrap_or(0);
    if organizations > 2 {
        key_insights.push(format!("References {} organizations or companies", organizations));
    }
    if let Some(n) = term_counts.get(FINANCIAL_AMOUNTS) {
        key_insights.push(format!("Contains {} financial amounts", n));
    }
    if let Some(n) = term_counts.get(PERCENTAGES) {
        key_insights.push(format!("Includes {} percentage values", n));
    }
    if let Some(n) = term_counts.get(TIME_PERIODS) {
        key_insights.push(format!("References {} time periods", n));
    }

    EntitySummary {
        entity_type_counts,
        top_entities,
        term_counts,
        key_insights,
    }
}
