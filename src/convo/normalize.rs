//! Text normalization applied before comparing bot text with expectations

use regex::Regex;
use std::sync::LazyLock;

static BLOCK_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?p[^>]*>|<br[^>]*>").expect("valid regex"));
static ANY_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static HSPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\S\n]+").expect("valid regex"));
static NEWLINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{2,}").expect("valid regex"));

const ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    // Last, so "&amp;lt;" decodes to "&lt;" and not "<"
    ("&amp;", "&"),
];

/// Normalize text for comparison.
///
/// With `cleanup` set: paragraph and line-break tags become spaces, all other
/// tags are removed, a fixed set of HTML entities is decoded and runs of
/// whitespace collapse to a single space. Every line is trimmed either way.
pub fn normalize_text(text: &str, cleanup: bool) -> String {
    if !cleanup {
        return text.trim().to_string();
    }
    let text = BLOCK_TAG_RE.replace_all(text, " ");
    let text = ANY_TAG_RE.replace_all(&text, "");
    let mut text = text.into_owned();
    for (entity, replacement) in ENTITIES {
        if text.contains(entity) {
            text = text.replace(entity, replacement);
        }
    }
    let text = text.replace("\r\n", "\n");
    let text = HSPACE_RE.replace_all(&text, " ");
    let text = NEWLINES_RE.replace_all(&text, "\n");
    text.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
