//! Character-level normalization shared by the canonicalizer and the table
//! resolver, so cell text always matches what lands in canonical text.

use crate::entities::decode_entities;

/// Normalize one source character, emitting zero or more canonical characters.
///
/// Typographic quotes and dashes fold to ASCII, the ellipsis expands to three
/// dots, exotic spaces become a plain space and zero-width characters vanish.
pub fn normalize_char(c: char, mut emit: impl FnMut(char)) {
    match c {
        '\u{2018}' | '\u{2019}' | '\u{201b}' | '\u{2032}' | '\u{2039}' | '\u{203a}' => emit('\''),
        '\u{201c}' | '\u{201d}' | '\u{201e}' | '\u{201f}' | '\u{2033}' | '\u{ab}' | '\u{bb}' => {
            emit('"')
        }
        '\u{201a}' => emit(','),
        '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}' | '\u{2212}' => {
            emit('-')
        }
        '\u{2026}' => {
            emit('.');
            emit('.');
            emit('.');
        }
        '\u{a0}' | '\u{2000}'..='\u{200a}' | '\u{202f}' | '\u{205f}' | '\u{3000}' | '\t' => {
            emit(' ')
        }
        '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{2060}' | '\u{feff}' | '\u{ad}' => {}
        '\u{b}' | '\u{c}' => emit('\n'),
        c if c.is_control() && c != '\n' && c != '\r' => {}
        c => emit(c),
    }
}

/// Normalize already-decoded inline text: fold characters and collapse every
/// whitespace run (line breaks included) to one space, trimmed.
pub fn normalize_inline(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        normalize_char(c, |n| {
            if n.is_whitespace() {
                pending_space = true;
            } else {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(n);
            }
        });
    }
    out
}

/// Like [`normalize_inline`], decoding character references first.
pub fn normalize_markup_text(text: &str) -> String {
    normalize_inline(&decode_entities(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(c: char) -> String {
        let mut out = String::new();
        normalize_char(c, |n| out.push(n));
        out
    }

    #[test]
    fn folds_smart_punctuation() {
        assert_eq!(fold('\u{2019}'), "'");
        assert_eq!(fold('\u{201c}'), "\"");
        assert_eq!(fold('\u{2014}'), "-");
        assert_eq!(fold('\u{2026}'), "...");
        assert_eq!(fold('\u{a0}'), " ");
        assert_eq!(fold('\u{200b}'), "");
        assert_eq!(fold('é'), "é");
    }

    #[test]
    fn inline_collapses_whitespace() {
        assert_eq!(normalize_inline("  Net\n\tsales\u{a0} "), "Net sales");
        assert_eq!(normalize_inline("\u{2018}quoted\u{2019}"), "'quoted'");
        assert_eq!(normalize_inline(" \n "), "");
    }

    #[test]
    fn markup_text_decodes_first() {
        assert_eq!(normalize_markup_text("R&amp;D&nbsp;costs"), "R&D costs");
    }
}
