//! Query Engine Core Components
//!
//! The query engine turns a tenant query into a cited answer:
//! - Query classification and retrieval breadth
//! - Entity and domain-term annotation
//! - Context optimization under a token budget
//! - Prompt construction
//! - Orchestration with caching, fallback and retry

mod annotator;
mod breadth;
mod missing_data;
mod optimizer;
mod orchestrator;
mod prompts;

pub use annotator::{
    domain_terms_for, EntityAnnotation, EntityAnnotator, EntityBundle, EntityRecognizer,
    EntitySummary, NamedEntity,
};
pub use breadth::{is_analytical, preprocess_query, select_breadth};
pub use missing_data::answer_indicates_missing_data;
pub use optimizer::{is_record_chunk, ContextOptimizer, OptimizedContext, ScoredMatch};
pub use orchestrator::{
    ProcessingMetadata, QueryEngine, QueryRequest, QueryResult, QueryStage, ResponseType,
    SourceInfo,
};
pub use prompts::{build_user_prompt, general_knowledge_prompt, system_prompt};
