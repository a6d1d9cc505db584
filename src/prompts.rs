//! Rewrite instructions sent alongside each chunk.
//!
//! Every prompt lives here so the default behaviour changes in exactly one
//! place and tests can inspect the rendered text without a model.
//!
//! Callers override the template via
//! [`crate::config::ConversionConfig::instruction`]; the template may use
//! `{chunk}`, `{total}` and `{pages}` placeholders.

/// Default instruction for turning one chunk of extracted PDF text into
/// Markdown.
pub const DEFAULT_INSTRUCTION: &str = r#"Convert this text, chunk {chunk} of {total} from {pages} of a PDF document, to well-formatted Markdown.

Rules:
- Preserve ALL text content and its order. Do not summarise or shorten.
- Preserve headings, lists, tables, and other structural elements.
- Mark headings with #, ## or ### based on their importance.
- For lists, use proper Markdown list syntax.
- For tables, use GFM pipe table syntax.
- Do not add any explanatory text or commentary.
- Do NOT wrap the output in ```markdown fences.
- Start directly with the content."#;

/// Appended when the chunk carries overlap from the previous chunk.
const CONTEXT_SECTION: &str = r#"

For continuity only, the previous chunk ended with the text below. It has already been converted: do NOT repeat it in your output.

"""
{context}
""""#;

/// Human-readable page span for the `{pages}` placeholder (1-based).
pub fn page_label(first: usize, last: usize) -> String {
    if first == last {
        format!("page {}", first + 1)
    } else {
        format!("pages {}-{}", first + 1, last + 1)
    }
}

/// Fill in a template for one chunk.
///
/// `chunk` is 0-based; the rendered text counts from 1. `pages` is the
/// chunk's 0-based `(first, last)` page span.
pub fn render_instruction(
    template: &str,
    chunk: usize,
    total: usize,
    pages: (usize, usize),
    context: Option<&str>,
) -> String {
    let mut out = template
        .replace("{chunk}", &(chunk + 1).to_string())
        .replace("{total}", &total.to_string())
        .replace("{pages}", &page_label(pages.0, pages.1));

    if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
        out.push_str(&CONTEXT_SECTION.replace("{context}", context));
    }
    out
}
