//! Turns free-form model output into a [`StructuredSummary`].
//!
//! Backends are asked for four headed sections, but models drift: headings
//! arrive as `## Summary`, `[Summary]`, `Summary:` or bold text, bullets use
//! any marker, and sometimes a section is missing entirely.

use std::sync::LazyLock;

use regex::Regex;
use reeldigest_shared::text::strip_thinking_tags;
use reeldigest_shared::{ReelDigestError, Result, StructuredSummary};

const MAX_FALLBACK_BULLETS: usize = 5;
const NO_KEY_POINTS: &str = "No key points could be extracted.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Summary,
    KeyPoints,
    Tools,
    Visual,
}

const SECTION_NAMES: &[(&str, Section)] = &[
    ("visual observations", Section::Visual),
    ("tools & skills", Section::Tools),
    ("tools and skills", Section::Tools),
    ("key points", Section::KeyPoints),
    ("highlights", Section::KeyPoints),
    ("summary", Section::Summary),
];

pub fn parse_summary(raw: &str) -> Result<StructuredSummary> {
    static BOLD_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("valid regex"));

    let text = strip_thinking_tags(raw);
    if text.trim().is_empty() {
        return Err(ReelDigestError::Summarize(
            "backend returned empty output".into(),
        ));
    }

    let mut current: Option<Section> = None;
    let mut preamble = Vec::new();
    let mut summary = Vec::new();
    let mut out = StructuredSummary::default();

    for line in text.lines() {
        let line = BOLD_RE.replace_all(line, "$1");
        let line = line.trim();

        if let Some((section, rest)) = match_heading(line) {
            current = Some(section);
            if rest.is_empty() {
                continue;
            }
            push_line(section, rest, &mut summary, &mut out);
            continue;
        }
        if line.is_empty() {
            continue;
        }
        match current {
            Some(section) => push_line(section, line, &mut summary, &mut out),
            None => preamble.push(line.to_string()),
        }
    }

    out.summary = summary.join(" ");
    if out.summary.is_empty() {
        out.summary = if preamble.is_empty() {
            text.trim().to_string()
        } else {
            preamble.join(" ")
        };
    }

    if out.bullet_points.is_empty() {
        out.bullet_points = fallback_bullets(&out.summary);
    }
    if out.bullet_points.is_empty() {
        out.bullet_points.push(NO_KEY_POINTS.to_string());
    }

    Ok(out)
}

fn push_line(section: Section, line: &str, summary: &mut Vec<String>, out: &mut StructuredSummary) {
    if section == Section::Summary {
        summary.push(strip_bullet(line).to_string());
        return;
    }
    let item = strip_bullet(line);
    if item.is_empty() || is_none_marker(item) {
        return;
    }
    let target = match section {
        Section::KeyPoints => &mut out.bullet_points,
        Section::Tools => &mut out.tools_and_skills,
        Section::Visual => &mut out.visual_observations,
        Section::Summary => unreachable!("handled above"),
    };
    target.push(item.to_string());
}

/// Recognize a section heading and return any text after it on the line.
fn match_heading(line: &str) -> Option<(Section, &str)> {
    let without_hash = line.trim_start_matches('#');
    let had_hash = without_hash.len() != line.len();
    let body = without_hash.trim_start();

    let mut bracketed = false;
    for (open, close) in [('[', ']'), ('【', '】')] {
        if let Some(inner) = body.strip_prefix(open) {
            if let Some(end) = inner.find(close) {
                let (name, after) = inner.split_at(end);
                let after = &after[close.len_utf8()..];
                let section = lookup_section(name.trim())?;
                return Some((section, trim_separator(after)));
            }
        }
        bracketed = bracketed || body.starts_with(open);
    }
    if bracketed {
        return None;
    }

    let lower = body.to_lowercase();
    for (name, section) in SECTION_NAMES {
        if lower.starts_with(name) && body.is_char_boundary(name.len()) {
            let rest = &body[name.len()..];
            let trimmed = rest.trim_start();
            if trimmed.is_empty() {
                return Some((*section, ""));
            }
            if trimmed.starts_with(':') || trimmed.starts_with('：') {
                return Some((*section, trim_separator(trimmed)));
            }
            if had_hash {
                return Some((*section, trimmed));
            }
            return None;
        }
    }
    None
}

fn lookup_section(name: &str) -> Option<Section> {
    let lower = name.to_lowercase();
    SECTION_NAMES
        .iter()
        .find(|(n, _)| *n == lower)
        .map(|(_, s)| *s)
}

fn trim_separator(s: &str) -> &str {
    s.trim_start()
        .trim_start_matches([':', '：'])
        .trim()
}

fn strip_bullet(line: &str) -> &str {
    static BULLET_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(?:[•·*\-]\s*|\d+[.)]\s+)").expect("valid regex"));
    match BULLET_RE.find(line) {
        Some(m) => line[m.end()..].trim(),
        None => line.trim(),
    }
}

fn is_none_marker(item: &str) -> bool {
    let lower = item.trim_matches(|c: char| c == '`' || c == '.').to_lowercase();
    matches!(lower.as_str(), "none" | "n/a" | "nothing notable")
}

/// Sentences longer than ten characters, when the model gave no bullets.
fn fallback_bullets(summary: &str) -> Vec<String> {
    summary
        .split(['.', '!', '?', '。', '！', '？'])
        .map(str::trim)
        .filter(|s| s.chars().count() > 10)
        .take(MAX_FALLBACK_BULLETS)
        .map(str::to_string)
        .collect()
}
