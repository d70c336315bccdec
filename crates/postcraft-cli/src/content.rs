//! Post-processing of generated text before it is written to disk.

use std::sync::LazyLock;

use regex::Regex;

static IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@import\s+url\([^)]*\);?").expect("Invalid @import regex"));

/// Web fonts the card templates ask for, and the system fonts that replace them.
const FONT_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("'Noto Serif SC'", "'Arial', 'Helvetica', sans-serif"),
    ("'Noto Sans SC'", "'Arial', 'Helvetica', sans-serif"),
    ("'Space Mono'", "'Courier New', monospace"),
];

/// Section labels models like to echo back at the start of a line.
const LABELS: &[&str] = &[
    "1. 标题", "2. 正文", "标题:", "标题：", "正文:", "正文：", "Title:", "Body:",
];

/// Clean generated SVG markup.
///
/// Strips a surrounding ```` ```svg ```` fence, drops `@import url(...)` rules,
/// and swaps web fonts for system fonts so the card renders offline.
pub fn clean_svg(raw: &str) -> String {
    let mut text = raw.trim();
    for fence in ["```svg", "```xml", "```"] {
        if let Some(rest) = text.strip_prefix(fence) {
            text = rest;
            break;
        }
    }
    let text = text.strip_suffix("```").unwrap_or(text).trim();

    let mut cleaned = IMPORT_RE.replace_all(text, "").into_owned();
    for (from, to) in FONT_SUBSTITUTIONS {
        cleaned = cleaned.replace(from, to);
    }
    cleaned
}

/// Clean generated copy: drop label lines and blank lines.
///
/// A label followed by text on the same line (`标题: Foo`) keeps the text.
pub fn clean_copy(raw: &str) -> String {
    raw.lines()
        .map(strip_label)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// First usable line of a generated title, without labels, heading marks or quotes.
pub fn clean_title(raw: &str) -> String {
    let first = clean_copy(raw)
        .lines()
        .next()
        .unwrap_or_default()
        .trim_start_matches('#')
        .trim()
        .to_string();

    for (open, close) in [('"', '"'), ('“', '”'), ('《', '》'), ('「', '」')] {
        if let Some(inner) = first
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
        {
            return inner.trim().to_string();
        }
    }
    first
}

fn strip_label(line: &str) -> &str {
    let line = line.trim();
    for label in LABELS {
        if let Some(rest) = line.strip_prefix(label) {
            return rest.trim();
        }
    }
    line
}
