//! Post-processing: deterministic cleanup of one rewritten chunk.
//!
//! Well-prompted models still wrap their answer in ```` ```markdown ````
//! fences, open with "Here is the converted text:", or emit CRLF and
//! zero-width characters. These rules fix such quirks without touching
//! content. They run on rewritten chunks only; pass-through chunks keep the
//! extracted text exactly.
//!
//! ## Rule Order
//!
//! Fences and preambles are stripped first so the later line-based rules
//! see the real content; line endings are normalised before any rule that
//! splits on `\n`.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to a model answer for the chunk `source`.
///
/// 1. Strip an outer Markdown fence
/// 2. Drop a conversational preamble line, unless `source` starts with it
/// 3. Normalise line endings (CRLF → LF)
/// 4. Trim trailing whitespace per line
/// 5. Remove invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 6. Collapse runs of blank lines to one
/// 7. Ensure a blank line before each heading
///
/// The result has no leading or trailing blank lines; the reassembler owns
/// the separators between chunks.
pub fn clean_markdown(input: &str, source: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = strip_preamble(&s, source);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = remove_invisible_chars(&s);
    let s = collapse_blank_lines(&s);
    let s = normalise_heading_spacing(&s);
    s.trim_matches('\n').to_string()
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\r?\n(.*?)\r?\n```$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Drop a conversational preamble ───────────────────────────────────

static RE_PREAMBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:sure[,!.]?\s*)?here(?:'s| is)\b[^\n]{0,120}:\s*\n").unwrap()
});

fn strip_preamble(input: &str, source: &str) -> String {
    let Some(found) = RE_PREAMBLE.find(input) else {
        return input.to_string();
    };
    let line = squash_whitespace(found.as_str());
    if squash_whitespace(source).starts_with(&line) {
        return input.to_string();
    }
    // A fence may follow the preamble.
    strip_markdown_fences(&input[found.end()..])
}

fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Rule 3: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 6: Collapse blank-line runs ─────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

// ── Rule 7: Blank line before headings ───────────────────────────────────────

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+\S").unwrap());

fn normalise_heading_spacing(input: &str) -> String {
    let mut result = String::with_capacity(input.len() + 64);
    let mut in_code = false;
    for line in input.lines() {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
        }
        if !in_code && RE_HEADING.is_match(line) && !result.is_empty() {
            let trimmed = result.trim_end_matches('\n').len();
            result.truncate(trimmed);
            result.push_str("\n\n");
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}
