//! Anchor Builder and Reverse Highlighter.
//!
//! [`build_anchors`] turns a canonical document and its resolved tables into
//! stable, hash-checked anchors. [`Highlighter`] maps excerpts of that text
//! back to canonical offsets, exactly when possible and through
//! context-verified anchors otherwise.

mod builder;
mod hash;
mod hints;
mod locate;
mod search;

pub use builder::{build_anchors, AnchorSet};
pub use hash::{context_hashes, sha256_hex, text_hash};
pub use hints::{is_heading_like_text, is_xref_like};
pub use locate::{locate, strip_anchor_markers, Highlighter, Located};
