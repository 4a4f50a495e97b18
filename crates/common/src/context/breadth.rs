//! Query classification and retrieval breadth
//!
//! Provides:
//! - Analytical query detection
//! - Candidate pool sizing for the vector search
//! - Query preprocessing (abbreviation expansion)

use crate::config::BreadthConfig;

/// Substrings marking a query that aggregates, ranks, or compares data
const ANALYTICAL_KEYWORDS: &[&str] = &[
    "average", "avg", "mean", "sum", "total", "count", "percentage", "%",
    "best", "worst", "top", "bottom", "highest", "lowest", "maximum", "minimum",
    "compare", "comparison", "versus", "vs", "against", "between",
    "performance", "efficiency", "rate", "ratio", "metric", "kpi",
    "wise", "by carrier", "by region", "by type", "group by",
    "breakdown", "trend", "analysis", "analytics", "statistics", "stats",
    "distribution", "correlation", "variance", "deviation",
];

/// Tier signals: short tokens that must match a whole word, and stems
/// that match any word starting with them ("compared", "averages")
struct Signals {
    words: &'static [&'static str],
    stems: &'static [&'static str],
}

impl Signals {
    fn matches(&self, word: &str) -> bool {
        self.words.contains(&word) || self.stems.iter().any(|s| word.starts_with(s))
    }
}

const EXHAUSTIVE_SIGNALS: Signals = Signals {
    words: &["all"],
    stems: &["every", "total", "complet"],
};
const COMPARISON_SIGNALS: Signals = Signals {
    words: &["vs"],
    stems: &["compar", "versus", "between"],
};
const AGGREGATE_SIGNALS: Signals = Signals {
    words: &["mean", "wise"],
    stems: &["averag", "performance"],
};

const ABBREVIATIONS: &[(&str, &str)] = &[
    ("ai", "artificial intelligence"),
    ("ml", "machine learning"),
    ("api", "application programming interface"),
    ("roi", "return on investment"),
    ("kpi", "key performance indicator"),
];

/// Case-insensitive substring match against the analytical keyword set
pub fn is_analytical(query: &str) -> bool {
    let lower = query.to_lowercase();
    ANALYTICAL_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn words(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Number of candidates to request from the vector store
pub fn select_breadth(query: &str, base_top_k: usize, tiers: &BreadthConfig) -> usize {
    if !is_analytical(query) {
        return base_top_k;
    }

    let words = words(query);
    let has_any = |signals: &Signals| words.iter().any(|w| signals.matches(w));

    if has_any(&EXHAUSTIVE_SIGNALS) {
        tiers.exhaustive
    } else if has_any(&COMPARISON_SIGNALS) {
        tiers.comparison
    } else if has_any(&AGGREGATE_SIGNALS) {
        tiers.aggregate
    } else {
        tiers.analytical
    }
}

/// Lowercase and expand standalone business abbreviations
pub fn preprocess_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| {
            let lower = token.to_lowercase();
            let start = lower.find(|c: char| c.is_alphanumeric());
            let end = lower.rfind(|c: char| c.is_alphanumeric());

            let (Some(start), Some(end)) = (start, end) else {
                return lower;
            };
            // rfind yields a byte index of the last char's start
            let end = end + lower[end..].chars().next().map_or(1, char::len_utf8);
            let core = &lower[start..end];

            match ABBREVIATIONS.iter().find(|(abbr, _)| *abbr == core) {
                Some((_, expansion)) => format!("{}{}{}", &lower[..start], expansion, &lower[end..]),
                None => lower,
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analytical_detection() {
        assert!(is_analytical("What is the average delivery time by carrier"));
        assert!(is_analytical("on-time %"));
        assert!(!is_analytical("hello, how are you"));
    }

    #[test]
    fn test_breadth_tiers() {
        let tiers = BreadthConfig::default();
        assert_eq!(
            select_breadth("what is the average delivery time by carrier", 8, &tiers),
            tiers.aggregate
        );
        assert_eq!(select_breadth("hello, how are you", 8, &tiers), 8);
        assert_eq!(select_breadth("total shipments per region", 8, &tiers), tiers.exhaustive);
        assert_eq!(select_breadth("compare FedEx vs UPS", 8, &tiers), tiers.comparison);
        assert_eq!(select_breadth("highest freight cost", 8, &tiers), tiers.analytical);
    }

    #[test]
    fn test_inflected_signals_keep_their_tier() {
        let tiers = BreadthConfig::default();
        assert_eq!(
            select_breadth("which carrier performed better compared to ups", 8, &tiers),
            tiers.comparison
        );
        assert_eq!(select_breadth("monthly averages of freight cost", 8, &tiers), tiers.aggregate);
        assert_eq!(select_breadth("shipment totals per carrier", 8, &tiers), tiers.exhaustive);
        assert_eq!(select_breadth("everything about delivery rate", 8, &tiers), tiers.exhaustive);
        assert_eq!(select_breadth("completed orders count", 8, &tiers), tiers.exhaustive);
    }

    #[test]
    fn test_signal_words_match_whole_words() {
        let tiers = BreadthConfig::default();
        // "small" contains "all" but is not the word "all"
        assert_eq!(select_breadth("smallest shipment stats", 8, &tiers), tiers.analytical);
    }

    #[test]
    fn test_preprocess_expands_abbreviations() {
        assert_eq!(
            preprocess_query("What is our ROI on AI projects?"),
            "what is our return on investment on artificial intelligence projects?"
        );
        assert_eq!(preprocess_query("  Email   domain "), "email domain");
        assert_eq!(preprocess_query("kpi."), "key performance indicator.");
    }
}
