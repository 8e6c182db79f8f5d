// src/ingest/normalize.rs
//! Markup fragment → canonical plain text.

use once_cell::sync::OnceCell;
use regex::Regex;

fn re(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static normalizer regex"))
}

/// Minimal entity table. Anything else is left as-is.
const ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&amp;", "&"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    ("&lt;", "<"),
    ("&gt;", ">"),
];

/// Normalize markup to plain text.
///
/// Script/style blocks are dropped with their content, block-level closers
/// and `<br>` become newlines, remaining tags are stripped and a handful of
/// named entities decoded. Horizontal whitespace runs collapse to one space,
/// at most one blank line survives between paragraphs, and the result is
/// trimmed. Total: every input yields a string.
pub fn normalize_text(markup: &str) -> String {
    if markup.is_empty() {
        return String::new();
    }

    static RE_SCRIPT: OnceCell<Regex> = OnceCell::new();
    static RE_STYLE: OnceCell<Regex> = OnceCell::new();
    static RE_BLOCK_END: OnceCell<Regex> = OnceCell::new();
    static RE_BR: OnceCell<Regex> = OnceCell::new();
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    static RE_HSPACE: OnceCell<Regex> = OnceCell::new();
    static RE_BLANKS: OnceCell<Regex> = OnceCell::new();

    // 1) Drop script/style blocks entirely
    let out = re(&RE_SCRIPT, r"(?is)<script\b.*?</script\s*>").replace_all(markup, "");
    let out = re(&RE_STYLE, r"(?is)<style\b.*?</style\s*>").replace_all(&out, "");

    // 2) Block closers and <br> → newline
    let out = re(
        &RE_BLOCK_END,
        r"(?i)</(?:p|div|h\d|li|blockquote|section|article|header|footer)\s*>",
    )
    .replace_all(&out, "\n");
    let out = re(&RE_BR, r"(?i)<br\s*/?>\n?").replace_all(&out, "\n");

    // 3) Strip remaining tags
    let out = re(&RE_TAGS, r"<[^>]+>").replace_all(&out, "");

    // 4) Entities, in table order
    let mut text = out.into_owned();
    for (entity, plain) in ENTITIES {
        if text.contains(entity) {
            text = text.replace(entity, plain);
        }
    }

    // 5) Whitespace folding
    let text = re(&RE_HSPACE, r"[\t ]+").replace_all(&text, " ");
    let text = re(&RE_BLANKS, r"\n{3,}").replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Borrow at most `max` characters of `s`, cut on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
