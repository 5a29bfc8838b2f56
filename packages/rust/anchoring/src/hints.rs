//! Structural hint detection for anchors.

use std::sync::LazyLock;

use regex::Regex;

static XREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?i:section|article|exhibit|schedule|item|annex|appendix)s?\s+(?:\d+[\w.\-()]*|[IVXLC]+\b|[A-Z]\b)",
    )
    .expect("valid regex")
});

const MAX_HEADING_CHARS: usize = 120;
const MIN_UPPERCASE_RATIO: f64 = 0.85;

/// Mentions a cross-reference such as "Section 3.2" or "Exhibit 10.1".
pub fn is_xref_like(text: &str) -> bool {
    XREF.is_match(text)
}

/// Short single line, no terminal punctuation, almost entirely uppercase.
pub fn is_heading_like_text(text: &str) -> bool {
    let t = text.trim();
    let len = t.chars().count();
    if len == 0 || len > MAX_HEADING_CHARS || t.contains('\n') {
        return false;
    }
    if t.ends_with(['.', ':', ';', ',', '!', '?']) {
        return false;
    }
    let letters: Vec<char> = t.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return false;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    upper as f64 / letters.len() as f64 > MIN_UPPERCASE_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xref_patterns() {
        assert!(is_xref_like("See Section 3.2 of the agreement"));
        assert!(is_xref_like("filed as Exhibit 10.1"));
        assert!(is_xref_like("ITEM 1A. RISK FACTORS"));
        assert!(is_xref_like("Article IV"));
        assert!(!is_xref_like("this section describes"));
        assert!(!is_xref_like("Itemized costs 2023"));
    }

    #[test]
    fn heading_patterns() {
        assert!(is_heading_like_text("RISK FACTORS"));
        assert!(is_heading_like_text("PART II"));
        assert!(!is_heading_like_text("Risk factors"));
        assert!(!is_heading_like_text("WE MAKE WIDGETS."));
        assert!(!is_heading_like_text("2023"));
        assert!(!is_heading_like_text("LINE ONE\nLINE TWO"));
    }
}
