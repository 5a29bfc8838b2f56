//! Whitespace-tolerant literal search.
//!
//! Canonical whitespace is formatting, so a run of whitespace in the needle
//! matches any run of whitespace (line breaks included) in the haystack.

use std::ops::Range;

use regex::{Regex, RegexBuilder};
use tracing::warn;

/// Compiled program size allowed for one needle (the `regex` default).
const PATTERN_SIZE_LIMIT: usize = 10 * (1 << 20);

/// Compile `needle` into a pattern matching its tokens separated by any whitespace.
pub(crate) fn tolerant_pattern(needle: &str) -> Option<Regex> {
    compile_tolerant(needle, PATTERN_SIZE_LIMIT)
}

fn compile_tolerant(needle: &str, size_limit: usize) -> Option<Regex> {
    let tokens: Vec<String> = needle.split_whitespace().map(regex::escape).collect();
    if tokens.is_empty() {
        return None;
    }
    match RegexBuilder::new(&tokens.join(r"\s+")).size_limit(size_limit).build() {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(needle_chars = needle.chars().count(), error = %e, "needle too large for literal search");
            None
        }
    }
}

/// Byte ranges of non-overlapping matches inside `haystack[from..to]` that do
/// not cut through a word at either end.
pub(crate) fn find_all(re: &Regex, haystack: &str, from: usize, to: usize) -> Vec<Range<usize>> {
    let Some(region) = haystack.get(from..to) else {
        return Vec::new();
    };
    re.find_iter(region)
        .map(|m| from + m.start()..from + m.end())
        .filter(|r| on_word_edges(haystack, r))
        .collect()
}

/// First match inside `haystack[from..to]`.
pub(crate) fn find_first(re: &Regex, haystack: &str, from: usize, to: usize) -> Option<Range<usize>> {
    let region = haystack.get(from..to)?;
    re.find_iter(region)
        .map(|m| from + m.start()..from + m.end())
        .find(|r| on_word_edges(haystack, r))
}

fn on_word_edges(haystack: &str, range: &Range<usize>) -> bool {
    let matched = &haystack[range.clone()];
    let first_inner = matched.chars().next();
    let last_inner = matched.chars().next_back();
    let before = haystack[..range.start].chars().next_back();
    let after = haystack[range.end..].chars().next();

    let joins = |inner: Option<char>, outer: Option<char>| {
        matches!((inner, outer), (Some(i), Some(o)) if i.is_alphanumeric() && o.is_alphanumeric())
    };
    !joins(first_inner, before) && !joins(last_inner, after)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_runs_are_interchangeable() {
        let re = tolerant_pattern("net   sales\n2023").expect("pattern");
        let hay = "Total net sales 2023 and net\n\nsales  2023";
        let found = find_all(&re, hay, 0, hay.len());
        assert_eq!(found.len(), 2);
        assert_eq!(&hay[found[0].clone()], "net sales 2023");
    }

    #[test]
    fn rejects_partial_words() {
        let re = tolerant_pattern("1,000").expect("pattern");
        let hay = "11,000 and 1,000";
        let found = find_all(&re, hay, 0, hay.len());
        assert_eq!(found, vec![11..16]);
    }

    #[test]
    fn punctuation_edges_are_fine() {
        let re = tolerant_pattern("(a)").expect("pattern");
        assert_eq!(find_first(&re, "x(a)y", 0, 5), Some(1..4));
    }

    #[test]
    fn region_is_respected() {
        let re = tolerant_pattern("a").expect("pattern");
        assert_eq!(find_first(&re, "a b a", 1, 5), Some(4..5));
        assert!(tolerant_pattern("   ").is_none());
    }

    #[test]
    fn oversized_needle_yields_no_pattern() {
        let needle = "revenue grew ".repeat(200);
        assert!(compile_tolerant(&needle, 64).is_none());
        assert!(compile_tolerant(&needle, PATTERN_SIZE_LIMIT).is_some());
    }
}
