//! Prompt templates for answer generation

use super::optimizer::ScoredMatch;
use crate::document::DocumentType;

const LOGISTICS_PROMPT: &str = "You are a logistics operations analyst. Work from the shipment, \
carrier and delivery records provided. When asked for metrics such as averages, on-time rates or \
carrier comparisons, compute them from the individual records, show the figures you used, and \
say plainly when the records do not cover part of the question.";

const FINANCIAL_PROMPT: &str = "You are a financial analyst. Answer from the statements, budgets \
and reports provided. Quote exact amounts and periods, compute ratios where asked, and keep \
estimates clearly separate from reported figures.";

const LEGAL_PROMPT: &str = "You are a legal document specialist. Answer from the contracts and \
agreements provided. Cite the clause or section a statement relies on, keep obligations and \
rights distinct, and do not give legal advice beyond what the documents state.";

const TECHNICAL_PROMPT: &str = "You are a technical documentation expert. Answer from the \
specifications and manuals provided. Be precise about configuration values, interfaces and \
version details, and reference the section each detail comes from.";

const POLICY_PROMPT: &str = "You are a policy and procedures specialist. Answer from the policies, \
handbooks and guidelines provided. State the applicable rule, who it applies to and any \
exceptions the documents mention.";

const GENERAL_PROMPT: &str = "You are an enterprise knowledge assistant. Answer from the company \
documents provided, cite the sources you rely on, and keep the answer concise and factual.";

const GENERAL_KNOWLEDGE_PROMPT: &str = "You are a helpful enterprise assistant. No company \
documents matched this question, so answer from general knowledge. Say that the answer is not \
based on the organization's documents, and keep it concise.";

const INSTRUCTIONS: &str = "**Instructions:**\n\
1. Answer using only the information in the context documents above.\n\
2. Cite sources by file name when you use them.\n\
3. For calculations, work from the individual records and show the result.\n\
4. If the context lacks information needed for a complete answer, state what information is missing.\n\
5. Keep the answer clear and well structured.";

/// System prompt for a prompt style (see [`DocumentType::prompt_style`])
pub fn system_prompt(document_type: DocumentType) -> &'static str {
    match document_type.prompt_style() {
        "logistics_analyst" => LOGISTICS_PROMPT,
        "financial_analyst" => FINANCIAL_PROMPT,
        "legal_expert" => LEGAL_PROMPT,
        "technical_expert" => TECHNICAL_PROMPT,
        "policy_expert" => POLICY_PROMPT,
        _ => GENERAL_PROMPT,
    }
}

/// System prompt for answers without document grounding
pub fn general_knowledge_prompt() -> &'static str {
    GENERAL_KNOWLEDGE_PROMPT
}

/// User prompt listing every selected chunk as a numbered source
pub fn build_user_prompt(query: &str, chunks: &[ScoredMatch]) -> String {
    let context = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "Source {}: {} (Relevance: {:.3})\n{}",
                i + 1,
                chunk.base.file_name().unwrap_or("unknown"),
                chunk.score(),
                chunk.base.text()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Based on the provided context documents, answer the following question.\n\n\
         **Question:** {}\n\n\
         **Context Documents:**\n{}\n\n\
         {}",
        query, context, INSTRUCTIONS
    )
}

/// User prompt for the general-knowledge path
pub fn build_general_prompt(query: &str) -> String {
    format!("**Question:** {}\n\nAnswer from general knowledge.", query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::VectorMatch;
    use serde_json::json;

    #[test]
    fn test_user_prompt_lists_sources() {
        let mut base = VectorMatch {
            id: "c1".into(),
            score: 0.8765,
            metadata: Default::default(),
        };
        base.metadata.insert("file_name".into(), json!("q3.pdf"));
        base.metadata.insert("text".into(), json!("Revenue grew 12%"));
        let chunk = ScoredMatch {
            base,
            entity_boost: 0.0,
            data_boost: 0.0,
            enhanced_score: 0.8765,
        };

        let prompt = build_user_prompt("How did revenue change?", &[chunk]);
        assert!(prompt.contains("**Question:** How did revenue change?"));
        assert!(prompt.contains("Source 1: q3.pdf (Relevance: 0.877)\nRevenue grew 12%"));
        assert!(prompt.contains("state what information is missing"));
    }

    #[test]
    fn test_system_prompt_per_type() {
        assert!(system_prompt(DocumentType::Logistics).contains("logistics"));
        assert!(system_prompt(DocumentType::Legal).contains("legal"));
        assert_eq!(system_prompt(DocumentType::General), GENERAL_PROMPT);
    }
}
