//! Document and chunk types shared by ingestion and retrieval

use serde::{Deserialize, Serialize};
use std::fmt;

/// Business domain a document belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Logistics,
    Financial,
    Legal,
    Technical,
    Policy,
    General,
}

const LOGISTICS_KEYWORDS: &[&str] = &[
    "shipment", "delivery", "carrier", "freight", "logistics", "transport",
    "tracking", "warehouse", "inventory", "route", "cargo",
];
const FINANCIAL_KEYWORDS: &[&str] = &[
    "revenue", "profit", "budget", "financial", "invoice", "balance sheet",
    "earnings", "expense",
];
const LEGAL_KEYWORDS: &[&str] = &[
    "contract", "agreement", "legal", "clause", "liability",
    "terms and conditions", "compliance",
];
const TECHNICAL_KEYWORDS: &[&str] = &[
    "api", "technical", "specification", "architecture", "system",
    "configuration", "implementation",
];
const POLICY_KEYWORDS: &[&str] = &["policy", "procedure", "guideline", "handbook", "regulation"];

impl DocumentType {
    /// Tie-break order when several types are equally represented
    pub const PRIORITY: [DocumentType; 6] = [
        DocumentType::Logistics,
        DocumentType::Financial,
        DocumentType::Legal,
        DocumentType::Technical,
        DocumentType::Policy,
        DocumentType::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Logistics => "logistics",
            DocumentType::Financial => "financial",
            DocumentType::Legal => "legal",
            DocumentType::Technical => "technical",
            DocumentType::Policy => "policy",
            DocumentType::General => "general",
        }
    }

    /// Parse a stored type name; unknown names map to `General`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "logistics" => DocumentType::Logistics,
            "financial" => DocumentType::Financial,
            "legal" => DocumentType::Legal,
            "technical" => DocumentType::Technical,
            "policy" => DocumentType::Policy,
            _ => DocumentType::General,
        }
    }

    /// Position in [`Self::PRIORITY`]
    pub fn priority(&self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|t| t == self)
            .unwrap_or(Self::PRIORITY.len())
    }

    /// System prompt family used for answers grounded in this type
    pub fn prompt_style(&self) -> &'static str {
        match self {
            DocumentType::Logistics => "logistics_analyst",
            DocumentType::Financial => "financial_analyst",
            DocumentType::Legal => "legal_expert",
            DocumentType::Technical => "technical_expert",
            DocumentType::Policy => "policy_expert",
            DocumentType::General => "general_expert",
        }
    }

    /// Detect the type from file name and content keywords.
    ///
    /// Checks run in priority order and the first keyword hit wins.
    pub fn detect(file_name: &str, content: &str) -> Self {
        let haystack = format!("{} {}", file_name, content).to_lowercase();
        let table: [(DocumentType, &[&str]); 5] = [
            (DocumentType::Logistics, LOGISTICS_KEYWORDS),
            (DocumentType::Financial, FINANCIAL_KEYWORDS),
            (DocumentType::Legal, LEGAL_KEYWORDS),
            (DocumentType::Technical, TECHNICAL_KEYWORDS),
            (DocumentType::Policy, POLICY_KEYWORDS),
        ];

        table
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| haystack.contains(k)))
            .map(|(t, _)| *t)
            .unwrap_or(DocumentType::General)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a chunk was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Standard,
    Section,
    StructuredHeader,
    #[serde(alias = "structured_data")]
    StructuredRow,
    Fallback,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Standard => "standard",
            ChunkType::Section => "section",
            ChunkType::StructuredHeader => "structured_header",
            ChunkType::StructuredRow => "structured_row",
            ChunkType::Fallback => "fallback",
        }
    }

    /// Parse a stored chunk type name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "standard" => Some(ChunkType::Standard),
            "section" => Some(ChunkType::Section),
            "structured_header" => Some(ChunkType::StructuredHeader),
            "structured_row" | "structured_data" => Some(ChunkType::StructuredRow),
            "fallback" => Some(ChunkType::Fallback),
            _ => None,
        }
    }
}

/// A contiguous span of extracted document text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub chunk_type: ChunkType,
    pub section_title: String,
    pub word_count: usize,
    /// 1-based page, 0 when unknown
    pub page_number: u32,
    pub chunk_index: usize,
}

impl Chunk {
    /// Build a chunk, deriving the word count from the text
    pub fn new(
        text: impl Into<String>,
        chunk_type: ChunkType,
        section_title: impl Into<String>,
        page_number: u32,
    ) -> Self {
        let text = text.into();
        let word_count = word_count(&text);
        Self {
            text,
            chunk_type,
            section_title: section_title.into(),
            word_count,
            page_number,
            chunk_index: 0,
        }
    }
}

/// Whitespace-token count
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
