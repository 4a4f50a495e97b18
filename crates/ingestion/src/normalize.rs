//! Text normalization applied before chunking

use regex_lite::Regex;
use std::sync::LazyLock;

static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n\s*\n").expect("static pattern"));
static HORIZONTAL_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("static pattern"));
static HYPHEN_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w)-(?:[ ]|[ ]?\n[ ]?)(\w)").expect("static pattern"));
static CAMEL_JOIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z])([A-Z])").expect("static pattern"));

/// Clean extracted text for chunking
pub fn normalize_text(text: &str) -> String {
    let text = text
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{2013}', '\u{2014}'], "-")
        .replace("\r\n", "\n");

    let text = HORIZONTAL_SPACE.replace_all(&text, " ");
    let text = EXCESS_NEWLINES.replace_all(&text, "\n\n");
    let text = HYPHEN_BREAK.replace_all(&text, "${1}${2}");
    let text = CAMEL_JOIN.replace_all(&text, "${1} ${2}");

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_and_newlines() {
        assert_eq!(normalize_text("a  \t b\n\n\n\nc"), "a b\n\nc");
    }

    #[test]
    fn test_quotes_and_dashes() {
        assert_eq!(
            normalize_text("\u{201C}on time\u{201D} \u{2014} it\u{2019}s fine"),
            "\"on time\" - it's fine"
        );
    }

    #[test]
    fn test_hyphenation_and_camel_case() {
        assert_eq!(normalize_text("logis-\ntics report"), "logistics report");
        assert_eq!(normalize_text("deliveryTimes"), "delivery Times");
    }
}
