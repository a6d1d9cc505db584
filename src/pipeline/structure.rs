//! Structure model: classify blocks and rank heading sizes.
//!
//! Both the planner (where may a chunk end?) and the reassembler (what
//! depth should this heading have?) need the same answer to "is this block a
//! heading, and how important is it". [`StructureProfile`] computes that
//! once per document from font statistics, so neither side falls back to ad
//! hoc string checks of its own.
//!
//! ## Policy
//!
//! * **Body size** is the font size (to the nearest half point) that carries
//!   the most characters.
//! * **Heading candidates** are short, single-line blocks that are either
//!   set noticeably larger than the body, bold, or numbered like a section
//!   title. Page furniture (bare page numbers) is never a heading.
//! * **Depth** ranks the distinct heading sizes from largest to smallest.

use crate::block::{BlockKind, HeadingHint, TextBlock};
use crate::config::StructureOptions;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static RE_NUMBERED_TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\d+(?:\.\d+)*\.?|[IVXLC]{1,6}\.)\s+\p{Lu}").unwrap()
});

static RE_PAGE_FURNITURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:page\s+)?(?:\d{1,4}|[ivxlc]{1,6})(?:\s*(?:/|of)\s*\d{1,4})?$").unwrap()
});

/// Applied to trimmed lines, so every match is an interior gap.
static RE_COLUMN_GAP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\t| \| | {3,}").unwrap());

static RE_LINE_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:(?:#{1,6}|>|[-*+])\s+)+").unwrap());

/// Headings deeper than this are clamped.
const MAX_DEPTH: u8 = 6;

/// Font statistics for one document.
#[derive(Debug, Clone)]
pub struct StructureProfile {
    /// Body size in half points.
    body_key: i32,
    /// Distinct heading sizes in half points, largest first.
    heading_keys: Vec<i32>,
    options: StructureOptions,
}

impl StructureProfile {
    /// Build the profile for a whole block sequence.
    pub fn from_blocks(blocks: &[TextBlock], options: &StructureOptions) -> Self {
        let mut weight: HashMap<i32, usize> = HashMap::new();
        for block in blocks {
            *weight.entry(size_key(block.font_size)).or_default() += block.char_len();
        }
        // Ties go to the smaller size: body text is rarely the larger one.
        let body_key = weight
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(k, _)| *k)
            .unwrap_or(0);

        let mut profile = Self {
            body_key,
            heading_keys: Vec::new(),
            options: options.clone(),
        };

        let mut keys: Vec<i32> = blocks
            .iter()
            .filter(|b| profile.classify(b) == BlockKind::HeadingCandidate)
            .map(|b| size_key(b.font_size))
            .collect();
        keys.sort_unstable_by(|a, b| b.cmp(a));
        keys.dedup();
        profile.heading_keys = keys;
        profile
    }

    /// Body font size in points.
    pub fn body_size(&self) -> f32 {
        self.body_key as f32 / 2.0
    }

    pub fn options(&self) -> &StructureOptions {
        &self.options
    }

    /// Structural role of a single block.
    pub fn classify(&self, block: &TextBlock) -> BlockKind {
        let text = block.text.trim();
        if text.is_empty() || RE_PAGE_FURNITURE.is_match(text) {
            return BlockKind::Other;
        }
        if text
            .lines()
            .any(|line| RE_COLUMN_GAP.find_iter(line.trim()).count() >= 2)
        {
            return BlockKind::TableRow;
        }
        if self.is_heading(block, text) {
            return BlockKind::HeadingCandidate;
        }
        BlockKind::Paragraph
    }

    fn is_heading(&self, block: &TextBlock, text: &str) -> bool {
        let char_len = text.chars().count();
        if char_len > self.options.heading_max_chars {
            return false;
        }
        // A heading may wrap once; anything longer is a paragraph.
        if text.lines().filter(|l| !l.trim().is_empty()).count() > 2 {
            return false;
        }
        if text.ends_with(['.', ',', ';']) && !RE_NUMBERED_TITLE.is_match(text) {
            return false;
        }
        if !text.chars().next().is_some_and(|c| c.is_uppercase() || c.is_numeric()) {
            return false;
        }

        let body = self.body_size();
        let larger = body > 0.0 && block.font_size >= body * self.options.heading_size_ratio;
        let bold = block.font_flags.is_bold() && size_key(block.font_size) >= self.body_key;
        let numbered = char_len <= 80
            && text.split_whitespace().count() <= 10
            && RE_NUMBERED_TITLE.is_match(text);

        larger || bold || numbered
    }

    /// Depth for a heading of this font size: 1 for the largest heading
    /// size in the document, 2 for the next, and so on.
    pub fn heading_depth(&self, font_size: f32) -> u8 {
        let key = size_key(font_size);
        let rank = self
            .heading_keys
            .iter()
            .position(|k| *k <= key)
            .unwrap_or(self.heading_keys.len());
        (rank as u8 + 1).min(MAX_DEPTH)
    }

    /// The hint the reassembler needs for this block, if it is a heading.
    pub fn heading_hint(&self, block: &TextBlock) -> Option<HeadingHint> {
        if self.classify(block) != BlockKind::HeadingCandidate {
            return None;
        }
        let joined = block.text.split_whitespace().collect::<Vec<_>>().join(" ");
        let key = normalise_line(&joined);
        if key.is_empty() {
            return None;
        }
        Some(HeadingHint {
            key,
            depth: self.heading_depth(block.font_size),
        })
    }

    /// Whether the boundary between two consecutive blocks is a paragraph
    /// gap: enough vertical whitespace, a jump back up the page (new
    /// column), or the edge of a table.
    pub fn is_gap(&self, prev: &TextBlock, next: &TextBlock) -> bool {
        if prev.page != next.page {
            return false;
        }
        let prev_table = self.classify(prev) == BlockKind::TableRow;
        let next_table = self.classify(next) == BlockKind::TableRow;
        if prev_table != next_table {
            return true;
        }
        if next.bbox.y1 > 0.0 && next.bbox.y0 + 0.5 < prev.bbox.y0 {
            return true;
        }
        let whitespace = next.bbox.y0 - prev.bbox.y1;
        let size = prev.font_size.max(next.font_size);
        size > 0.0 && whitespace >= self.options.gap_factor * size
    }
}

/// Font size rounded to the nearest half point.
fn size_key(size: f32) -> i32 {
    (size * 2.0).round() as i32
}

/// Normalise one line for comparison: Markdown markers, emphasis, case,
/// surrounding whitespace and trailing `:`/`.` are ignored.
///
/// `"## **Section 5**"` and `"Section 5"` both normalise to `"section 5"`.
pub fn normalise_line(line: &str) -> String {
    let stripped = RE_LINE_MARKERS.replace(line.trim(), "");
    let stripped = stripped.trim_end_matches('#');
    let cleaned: String = stripped
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '`'))
        .collect();
    let joined = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    joined.trim_end_matches([':', '.']).to_lowercase()
}
