//! Byte-level tag lexer for HTML and legacy SGML markup.
//!
//! Only tag structure is recognized; nothing here interprets content. All
//! delimiters are ASCII, so scanning bytes never splits a UTF-8 sequence.

/// Elements whose content never renders. Their bodies are raw text, so the
/// closing tag is found by literal search rather than by lexing.
pub(crate) const SKIP_CONTENT_TAGS: &[&str] = &["script", "style", "noscript", "template", "title"];

/// Elements that can never have content.
pub(crate) const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements that start a new block of canonical text.
pub(crate) const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "caption", "center", "dd", "details",
    "dir", "div", "dl", "dt", "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2",
    "h3", "h4", "h5", "h6", "header", "hr", "html", "legend", "li", "main", "menu", "nav", "ol",
    "p", "page", "pre", "section", "summary", "table", "tbody", "tfoot", "thead", "tr", "ul",
];

/// Tags recognized in plain-text input (legacy SGML table markers).
const LEGACY_TAGS: &[&str] = &["table", "caption", "s", "c", "fn", "page"];

const ROW_CELL_TAGS: &[&str] = &["tr", "td", "th"];

#[derive(Debug)]
pub(crate) struct Tag<'a> {
    /// Lowercased element name.
    pub name: String,
    pub is_end: bool,
    pub self_closing: bool,
    /// Raw attribute text between the name and `>`.
    pub attrs: &'a str,
}

#[derive(Debug)]
pub(crate) enum Markup<'a> {
    Tag(Tag<'a>),
    /// Comment, doctype, CDATA or processing instruction.
    Ignorable,
}

#[derive(Debug)]
pub(crate) struct Lexed<'a> {
    pub markup: Markup<'a>,
    /// Byte offset just past the construct.
    pub end: usize,
    /// False when the input ended before the closing `>`.
    pub terminated: bool,
}

/// Lex markup at `at` (which must hold `<`) under the given mode.
pub(crate) fn lex(raw: &str, at: usize, markup: bool) -> Option<Lexed<'_>> {
    if markup {
        lex_html(raw, at)
    } else {
        lex_legacy(raw, at)
    }
}

/// Lex an HTML construct. Returns `None` when the `<` is literal text.
pub(crate) fn lex_html(raw: &str, at: usize) -> Option<Lexed<'_>> {
    let bytes = raw.as_bytes();
    if raw[at..].starts_with("<!--") {
        return Some(match raw[at + 4..].find("-->") {
            Some(pos) => Lexed {
                markup: Markup::Ignorable,
                end: at + 4 + pos + 3,
                terminated: true,
            },
            None => Lexed {
                markup: Markup::Ignorable,
                end: raw.len(),
                terminated: false,
            },
        });
    }

    let mut j = at + 1;
    if matches!(bytes.get(j), Some(b'!') | Some(b'?')) {
        return Some(match raw[j..].find('>') {
            Some(pos) => Lexed {
                markup: Markup::Ignorable,
                end: j + pos + 1,
                terminated: true,
            },
            None => Lexed {
                markup: Markup::Ignorable,
                end: raw.len(),
                terminated: false,
            },
        });
    }

    let is_end = bytes.get(j) == Some(&b'/');
    if is_end {
        j += 1;
    }
    if !bytes.get(j).is_some_and(u8::is_ascii_alphabetic) {
        return None;
    }

    let name_start = j;
    while j < bytes.len() && is_name_byte(bytes[j]) {
        j += 1;
    }
    let name = raw[name_start..j].to_ascii_lowercase();

    // Attribute quoting in legacy filings is too often unbalanced to trust;
    // the first `>` ends the tag.
    let attr_start = j;
    match raw[attr_start..].find('>') {
        Some(pos) => {
            let attrs = &raw[attr_start..attr_start + pos];
            Some(Lexed {
                markup: Markup::Tag(Tag {
                    name,
                    is_end,
                    self_closing: attrs.trim_end().ends_with('/'),
                    attrs,
                }),
                end: attr_start + pos + 1,
                terminated: true,
            })
        }
        None => Some(Lexed {
            markup: Markup::Tag(Tag {
                name,
                is_end,
                self_closing: false,
                attrs: &raw[attr_start..],
            }),
            end: raw.len(),
            terminated: false,
        }),
    }
}

/// Lex a legacy SGML table marker in plain text. Anything else is literal.
pub(crate) fn lex_legacy(raw: &str, at: usize) -> Option<Lexed<'_>> {
    let bytes = raw.as_bytes();
    let mut j = at + 1;
    let is_end = bytes.get(j) == Some(&b'/');
    if is_end {
        j += 1;
    }
    let name_start = j;
    while j < bytes.len() && bytes[j].is_ascii_alphanumeric() {
        j += 1;
    }
    if bytes.get(j) != Some(&b'>') || j == name_start {
        return None;
    }
    let name = raw[name_start..j].to_ascii_lowercase();
    if !LEGACY_TAGS.contains(&name.as_str()) {
        return None;
    }
    Some(Lexed {
        markup: Markup::Tag(Tag {
            name,
            is_end,
            self_closing: false,
            attrs: "",
        }),
        end: j + 1,
        terminated: true,
    })
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':')
}

/// Parse `name="value"` pairs out of raw attribute text. Names are lowercased.
pub(crate) fn attributes(attrs: &str) -> Vec<(String, String)> {
    let bytes = attrs.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            i += 1;
        }
        let name_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && !matches!(bytes[i], b'=' | b'/')
        {
            i += 1;
        }
        if name_start == i {
            break;
        }
        let name = attrs[name_start..i].to_ascii_lowercase();

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if bytes.get(i) != Some(&b'=') {
            out.push((name, String::new()));
            continue;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }

        let value = match bytes.get(i) {
            Some(&q) if q == b'"' || q == b'\'' => {
                let start = i + 1;
                let end = attrs[start..]
                    .find(q as char)
                    .map_or(attrs.len(), |p| start + p);
                i = (end + 1).min(attrs.len());
                &attrs[start..end]
            }
            _ => {
                let start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                &attrs[start..i]
            }
        };
        out.push((name, value.to_string()));
    }
    out
}

/// Whether an element is non-rendering by name or by its hiding attributes.
///
/// `attr` looks up an attribute value by lowercase name.
pub fn is_hidden<'v>(name: &str, attr: impl Fn(&str) -> Option<&'v str>) -> bool {
    if SKIP_CONTENT_TAGS.contains(&name) {
        return true;
    }
    if attr("hidden").is_some() {
        return true;
    }
    attr("style").is_some_and(|style| {
        let compact: String = style
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        compact.contains("display:none") || compact.contains("visibility:hidden")
    })
}

/// Byte offset just past the end of a non-rendering element opened by `tag`
/// (whose start tag ends at `end`), or `None` if the element renders or is
/// never closed.
pub(crate) fn skip_extent(raw: &str, tag: &Tag<'_>, end: usize, markup: bool) -> Option<usize> {
    if !markup || tag.is_end || tag.self_closing || VOID_TAGS.contains(&tag.name.as_str()) {
        return None;
    }
    let attrs = attributes(tag.attrs);
    let lookup = |key: &str| {
        attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };
    if !is_hidden(&tag.name, lookup) {
        return None;
    }
    if SKIP_CONTENT_TAGS.contains(&tag.name.as_str()) {
        find_raw_close(raw, end, &tag.name)
    } else {
        find_closing(raw, end, &tag.name, true).map(|(_, close_end)| close_end)
    }
}

/// Find `</name>` by literal, case-insensitive search (raw-text elements).
pub(crate) fn find_raw_close(raw: &str, from: usize, name: &str) -> Option<usize> {
    let bytes = raw.as_bytes();
    let mut i = from;
    while let Some(pos) = raw[i..].find("</") {
        let at = i + pos;
        let name_end = at + 2 + name.len();
        if name_end <= raw.len()
            && bytes[at + 2..name_end].eq_ignore_ascii_case(name.as_bytes())
            && !bytes.get(name_end).is_some_and(|b| is_name_byte(*b))
        {
            return Some(raw[name_end..].find('>').map_or(raw.len(), |p| name_end + p + 1));
        }
        i = at + 2;
    }
    None
}

/// Find the end tag matching an element named `name` opened before `from`,
/// honoring nesting. Returns `(close_start, close_end)`.
pub(crate) fn find_closing(
    raw: &str,
    from: usize,
    name: &str,
    markup: bool,
) -> Option<(usize, usize)> {
    let mut depth = 1usize;
    let mut i = from;
    while let Some(pos) = raw[i..].find('<') {
        let at = i + pos;
        let Some(lexed) = lex(raw, at, markup) else {
            i = at + 1;
            continue;
        };
        if let Markup::Tag(tag) = &lexed.markup {
            if tag.name == name {
                if tag.is_end {
                    depth -= 1;
                    if depth == 0 {
                        return Some((at, lexed.end));
                    }
                } else if !tag.self_closing {
                    depth += 1;
                }
            }
        }
        i = lexed.end;
    }
    None
}

/// Whether a table body declares row or cell tags.
pub(crate) fn has_row_markup(fragment: &str) -> bool {
    let mut i = 0;
    while let Some(pos) = fragment[i..].find('<') {
        let at = i + pos;
        match lex_html(fragment, at) {
            Some(lexed) => {
                if let Markup::Tag(tag) = &lexed.markup {
                    if !tag.is_end && ROW_CELL_TAGS.contains(&tag.name.as_str()) {
                        return true;
                    }
                }
                i = lexed.end;
            }
            None => i = at + 1,
        }
    }
    false
}
