//! Detection of answers that report missing data

const MISSING_DATA_PHRASES: &[&str] = &[
    "data is missing",
    "information is missing",
    "not possible to determine",
    "cannot be performed",
    "data linking",
    "additional data",
    "no field",
    "no information",
    "cannot find",
    "not available in",
    "missing information",
];

/// True when a generated answer says the context lacked the needed data
pub fn answer_indicates_missing_data(answer: &str) -> bool {
    let lower = answer.to_lowercase();
    MISSING_DATA_PHRASES.iter().any(|p| lower.contains(p))
}
