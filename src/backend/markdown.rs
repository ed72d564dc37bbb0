//! Deterministic Markdown cleanup applied to every parsed document.
//!
//! Two sources feed in: raw text-layer extraction (hard line wraps,
//! hyphenated breaks, stray form feeds) and vision-LLM transcriptions
//! (occasional outer code fences despite the prompt). The passes below are
//! pure `&str → String` functions run in a fixed order.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean a whole assembled document.
///
/// 1. CRLF / CR → LF, form feeds → blank line
/// 2. Strip invisible Unicode (BOM, zero-width, soft hyphen)
/// 3. Trim trailing whitespace per line
/// 4. Collapse runs of blank lines to one
/// 5. Exactly one trailing newline
pub fn clean_document(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

/// Shape one page of text-layer output into Markdown paragraphs: rejoin
/// words hyphenated across a line break and drop empty leading lines.
pub fn text_layer_to_markdown(raw: &str) -> String {
    let s = normalise_line_endings(raw);
    let s = RE_HYPHEN_BREAK.replace_all(&s, "$1$2");
    s.trim_matches('\n').to_string()
}

/// Strip the outer ```` ```markdown ```` fence vision models sometimes add.
pub fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rules ────────────────────────────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```$").unwrap());

// "transfor-\nmation" → "transformation". Capitalised continuations are left alone.
static RE_HYPHEN_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{L})-\n(\p{Ll})").unwrap());

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn normalise_line_endings(input: &str) -> String {
    input
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\u{000C}', "\n\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\u{FEFF}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{00AD}'))
        .collect()
}

fn trim_trailing_whitespace(input: &str) -> String {
    input.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n").into_owned()
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        "\n".to_string()
    } else {
        format!("{trimmed}\n")
    }
}
