//! Stable SHA-256 hashing of canonical text windows.

use sha2::{Digest, Sha256};

use filingprep_shared::{CanonicalSpan, TextIndex};

/// Lowercase hex SHA-256 of `content`.
pub fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hashes of the `window` characters before and after `span`, clipped at the
/// document bounds.
pub fn context_hashes(
    text: &str,
    index: &TextIndex,
    span: CanonicalSpan,
    window: usize,
) -> (String, String) {
    let before = index.slice(text, span.from.saturating_sub(window)..span.from);
    let after = index.slice(text, span.to..span.to.saturating_add(window));
    (sha256_hex(before), sha256_hex(after))
}

/// Hash of the span text itself.
pub fn text_hash(text: &str, index: &TextIndex, span: CanonicalSpan) -> String {
    sha256_hex(index.slice(text, span.range()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn windows_clip_at_bounds() {
        let text = "héllo world";
        let index = TextIndex::new(text);
        let span = CanonicalSpan { from: 0, to: 5 };
        let (before, after) = context_hashes(text, &index, span, 80);
        assert_eq!(before, sha256_hex(""));
        assert_eq!(after, sha256_hex(" world"));
        assert_eq!(text_hash(text, &index, span), sha256_hex("héllo"));
    }

    #[test]
    fn window_is_counted_in_characters() {
        let text = "€€€abc€€€";
        let index = TextIndex::new(text);
        let span = CanonicalSpan { from: 3, to: 6 };
        let (before, after) = context_hashes(text, &index, span, 2);
        assert_eq!(before, sha256_hex("€€"));
        assert_eq!(after, sha256_hex("€€"));
    }

    #[test]
    fn identical_windows_hash_identically() {
        let a = "prefix text ANCHOR suffix";
        let b = "other prefix text ANCHOR suffix";
        let (ia, ib) = (TextIndex::new(a), TextIndex::new(b));
        let sa = CanonicalSpan { from: 12, to: 18 };
        let sb = CanonicalSpan { from: 18, to: 24 };
        let (before_a, after_a) = context_hashes(a, &ia, sa, 5);
        let (before_b, after_b) = context_hashes(b, &ib, sb, 5);
        assert_eq!(before_a, before_b);
        assert_eq!(after_a, after_b);
    }
}
