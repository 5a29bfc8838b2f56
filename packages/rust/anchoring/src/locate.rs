//! Reverse Highlighter: map an excerpt back onto canonical offsets.
//!
//! Exact (whitespace-tolerant) matches are returned with full confidence.
//! Otherwise anchors whose stored context and text hashes still verify
//! against the canonical text are scored by token containment.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};
use unicode_segmentation::UnicodeSegmentation;

use filingprep_canonical::normalize_inline;
use filingprep_shared::{
    Anchor, AnchorConfig, CanonicalDocument, CanonicalSpan, HighlightConfig, TextIndex,
};

use crate::hash::{context_hashes, text_hash};
use crate::search;

static ANCHOR_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"⟦[^⟦⟧]*⟧").expect("valid regex"));

/// One candidate location of an excerpt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Located {
    pub range: CanonicalSpan,
    /// 1.0 for an exact match, below that for a hash-verified fallback.
    pub confidence: f64,
    /// Tightest anchor containing the range, or the anchor matched by fallback.
    pub anchor_id: Option<String>,
}

/// Remove `⟦anchor-id⟧` markers a prompt view may have left in an excerpt.
pub fn strip_anchor_markers(excerpt: &str) -> String {
    ANCHOR_MARKER.replace_all(excerpt, " ").into_owned()
}

struct Token {
    word: String,
    chars: Range<usize>,
}

/// An anchor that still verifies against the canonical text.
struct Candidate {
    anchor: usize,
    tokens: Vec<Token>,
    vocabulary: HashSet<String>,
}

/// Read-only query engine over one finished document.
pub struct Highlighter<'a> {
    text: &'a str,
    index: TextIndex,
    anchors: &'a [Anchor],
    candidates: Vec<Candidate>,
    config: HighlightConfig,
}

impl<'a> Highlighter<'a> {
    pub fn new(
        text: &'a str,
        anchors: &'a [Anchor],
        anchor_config: &AnchorConfig,
        config: &HighlightConfig,
    ) -> Self {
        let index = TextIndex::new(text);
        let len = index.char_len();
        let mut candidates = Vec::new();
        let mut stale = 0usize;

        for (i, anchor) in anchors.iter().enumerate() {
            let span = anchor.span;
            if span.is_empty() || span.to > len {
                stale += 1;
                continue;
            }
            let (before, after) = context_hashes(text, &index, span, anchor_config.context_window);
            if before != anchor.context_hash_before
                || after != anchor.context_hash_after
                || text_hash(text, &index, span) != anchor.text_hash
            {
                stale += 1;
                continue;
            }

            let byte_start = index.byte_of(span.from);
            let tokens: Vec<Token> = index
                .slice(text, span.range())
                .unicode_word_indices()
                .map(|(b, w)| {
                    let start = byte_start + b;
                    Token {
                        word: w.to_lowercase(),
                        chars: index.char_of(start)..index.char_of(start + w.len()),
                    }
                })
                .collect();
            let vocabulary = tokens.iter().map(|t| t.word.clone()).collect();
            candidates.push(Candidate {
                anchor: i,
                tokens,
                vocabulary,
            });
        }

        if stale > 0 {
            warn!(stale, "anchors no longer match canonical text; excluded from fallback");
        }

        Self {
            text,
            index,
            anchors,
            candidates,
            config: config.clone(),
        }
    }

    /// Ranked locations of `excerpt`; empty when nothing clears the threshold.
    pub fn locate(&self, excerpt: &str) -> Vec<Located> {
        let needle = normalize_inline(&strip_anchor_markers(excerpt));
        if needle.is_empty() {
            return Vec::new();
        }

        let mut found = self.exact(&needle);
        if found.is_empty() {
            found = self.fallback(&needle);
            debug!(candidates = found.len(), "no exact match; used context-verified fallback");
        }

        found.sort_by(rank);
        let mut seen = HashSet::new();
        found.retain(|l| seen.insert(l.range));
        found.truncate(self.config.max_results);
        found
    }

    fn exact(&self, needle: &str) -> Vec<Located> {
        let Some(pattern) = search::tolerant_pattern(needle) else {
            return Vec::new();
        };
        search::find_all(&pattern, self.text, 0, self.text.len())
            .into_iter()
            .map(|bytes| {
                let range = CanonicalSpan {
                    from: self.index.char_of(bytes.start),
                    to: self.index.char_of(bytes.end),
                };
                Located {
                    range,
                    confidence: 1.0,
                    anchor_id: self.tightest_containing(range),
                }
            })
            .collect()
    }

    fn tightest_containing(&self, range: CanonicalSpan) -> Option<String> {
        self.anchors
            .iter()
            .filter(|a| a.span.contains(&range))
            .min_by(|a, b| a.span.len().cmp(&b.span.len()).then_with(|| a.id.cmp(&b.id)))
            .map(|a| a.id.clone())
    }

    fn fallback(&self, needle: &str) -> Vec<Located> {
        let words: Vec<String> = needle.unicode_words().map(str::to_lowercase).collect();
        if words.is_empty() {
            return Vec::new();
        }
        let distinct: HashSet<&str> = words.iter().map(String::as_str).collect();

        let mut out = Vec::new();
        for candidate in &self.candidates {
            let present = distinct
                .iter()
                .filter(|w| candidate.vocabulary.contains(**w))
                .count();
            let score = present as f64 / distinct.len() as f64;
            if score < self.config.min_similarity {
                continue;
            }
            let anchor = &self.anchors[candidate.anchor];
            out.push(Located {
                range: narrow(&candidate.tokens, &words).unwrap_or(anchor.span),
                confidence: score * self.config.fallback_confidence_ceiling,
                anchor_id: Some(anchor.id.clone()),
            });
        }
        out
    }
}

/// The anchor sub-span covered by the longest run of excerpt tokens that
/// appears contiguously in the anchor, when that run has two or more tokens.
fn narrow(tokens: &[Token], words: &[String]) -> Option<CanonicalSpan> {
    let mut best: Option<(usize, usize)> = None; // (end index in tokens, run length)
    let mut prev = vec![0usize; words.len() + 1];
    for (i, token) in tokens.iter().enumerate() {
        let mut row = vec![0usize; words.len() + 1];
        for (j, word) in words.iter().enumerate() {
            if token.word == *word {
                row[j + 1] = prev[j] + 1;
                if best.is_none_or(|(_, len)| row[j + 1] > len) {
                    best = Some((i, row[j + 1]));
                }
            }
        }
        prev = row;
    }
    let (end, len) = best?;
    (len >= 2).then(|| CanonicalSpan {
        from: tokens[end + 1 - len].chars.start,
        to: tokens[end].chars.end,
    })
}

/// Confidence descending, then earliest offset, then longest span.
fn rank(a: &Located, b: &Located) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then(a.range.from.cmp(&b.range.from))
        .then(b.range.len().cmp(&a.range.len()))
        .then_with(|| a.anchor_id.cmp(&b.anchor_id))
}

/// One-shot lookup against a document and its anchors.
pub fn locate(
    excerpt: &str,
    doc: &CanonicalDocument,
    anchors: &[Anchor],
    anchor_config: &AnchorConfig,
    config: &HighlightConfig,
) -> Vec<Located> {
    Highlighter::new(&doc.text, anchors, anchor_config, config).locate(excerpt)
}
