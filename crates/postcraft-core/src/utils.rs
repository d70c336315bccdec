//! Utility helpers: string truncation, folder-name sanitizing, secret masking.

/// Truncate a string to `max_len` characters, adding "..." if truncated.
/// Unicode-safe.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

/// Sanitize a title for use as an output folder name.
///
/// Replaces `<>:"/\|?*` with `_`, collapses whitespace, caps the length at
/// `max_len` characters, and falls back to `"untitled"` when nothing is left.
pub fn sanitize_folder_name(name: &str, max_len: usize) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(max_len).collect();
    let trimmed = capped.trim_end();

    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Mask a secret for display: first 8 and last 4 characters kept when long enough.
pub fn mask_key(key: &str) -> String {
    let len = key.chars().count();
    if len > 12 {
        let head: String = key.chars().take(8).collect();
        let tail: String = key.chars().skip(len - 4).collect();
        format!("{head}{}{tail}", "*".repeat(len - 12))
    } else {
        "*".repeat(len)
    }
}
