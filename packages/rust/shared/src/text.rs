//! Text cleanup shared by the model-facing crates.

use std::sync::LazyLock;

use regex::Regex;

/// Remove reasoning blocks some local models emit before their answer.
///
/// Handles `<think>` and `<thinking>` pairs, and an opening tag that is never
/// closed (everything after it is dropped). Runs of three or more newlines are
/// collapsed to one blank line.
pub fn strip_thinking_tags(text: &str) -> String {
    static CLOSED_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)<(think|thinking)>.*?</(think|thinking)>").expect("valid regex")
    });
    static OPEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)<(think|thinking)>.*$").expect("valid regex"));
    static BLANKS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    let text = CLOSED_RE.replace_all(text, "");
    let text = OPEN_RE.replace(&text, "");
    let text = BLANKS_RE.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Truncate to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(1);
    let mut out: String = text.chars().take(keep).collect();
    out.push('…');
    out
}

/// Like [`truncate_chars`], but `max` counts UTF-16 code units, the way
/// Telegram measures message length. Characters are never split.
pub fn truncate_utf16(text: &str, max: usize) -> String {
    if text.encode_utf16().count() <= max {
        return text.to_string();
    }
    let budget = max.saturating_sub('…'.len_utf16());
    let mut used = 0;
    let mut out = String::new();
    for c in text.chars() {
        used += c.len_utf16();
        if used > budget {
            break;
        }
        out.push(c);
    }
    out.push('…');
    out
}
