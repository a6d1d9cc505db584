//! Chunk planning: partition the block stream into model-sized chunks.
//!
//! ## Algorithm
//!
//! Blocks are walked in document order and accumulated into a candidate
//! chunk. When the next block would push the candidate past the budget, the
//! candidate is closed at the best boundary it contains, searching from the
//! most recent boundary backwards:
//!
//! 1. a page break, or the boundary just before a heading candidate;
//! 2. otherwise a paragraph gap (whitespace, column change, table edge);
//! 3. otherwise a hard cut right before the incoming block.
//!
//! Blocks after the cut carry over into the next candidate. A block that is
//! larger than the budget on its own becomes a single-block chunk: its text
//! is never truncated or split.
//!
//! Chunks are contiguous runs of blocks, so the planner works on index
//! ranges and prefix sums and only materialises chunks at the end.

use crate::block::{BlockKind, HeadingHint, TextBlock};
use crate::config::{ConversionConfig, StructureOptions};
use crate::error::ChunkMdError;
use crate::pipeline::structure::StructureProfile;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::debug;

/// Joins block texts inside a chunk.
pub const BLOCK_SEPARATOR: &str = "\n\n";

const SEPARATOR_CHARS: usize = 2;

/// Why a chunk ended where it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundaryHint {
    /// The next chunk starts on a new page.
    PageBreak,
    /// The next chunk starts with a heading.
    Heading,
    /// Cut at a paragraph gap.
    Gap,
    /// No structural boundary fit the budget, or the chunk is a single
    /// oversized block.
    Forced,
    /// The document ended.
    EndOfInput,
}

/// A bounded-size, ordered group of blocks rewritten as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// 0-based position in document order.
    pub index: usize,
    pub blocks: Vec<TextBlock>,
    /// Characters in [`Chunk::text`]; `context` is not counted.
    pub char_count: usize,
    pub boundary_hint: BoundaryHint,
    /// Tail of the previous chunk, shown to the model for continuity only.
    pub context: Option<String>,
    /// Headings in this chunk with their document-level depth.
    pub headings: Vec<HeadingHint>,
}

impl Chunk {
    /// The authoritative text sent for rewriting.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join(BLOCK_SEPARATOR)
    }

    /// First and last page (0-based) covered by this chunk.
    pub fn page_span(&self) -> (usize, usize) {
        let first = self.blocks.first().map(|b| b.page).unwrap_or(0);
        let last = self.blocks.last().map(|b| b.page).unwrap_or(first);
        (first, last)
    }

    /// True when this chunk is over budget because of one oversized block.
    pub fn is_forced_overflow(&self, max_chunk_chars: usize) -> bool {
        self.blocks.len() == 1 && self.char_count > max_chunk_chars
    }
}

/// Planner settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOptions {
    pub max_chunk_chars: usize,
    pub overlap_chars: usize,
    pub structure: StructureOptions,
}

impl PlanOptions {
    pub fn new(max_chunk_chars: usize, overlap_chars: usize) -> Self {
        Self {
            max_chunk_chars,
            overlap_chars,
            structure: StructureOptions::default(),
        }
    }

    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            max_chunk_chars: config.max_chunk_chars,
            overlap_chars: config.overlap_chars,
            structure: config.structure.clone(),
        }
    }
}

/// Stateless chunk planner.
#[derive(Debug, Clone)]
pub struct Planner {
    options: PlanOptions,
}

impl Planner {
    pub fn new(options: PlanOptions) -> Result<Self, ChunkMdError> {
        if options.max_chunk_chars == 0 {
            return Err(ChunkMdError::InvalidConfig(
                "max_chunk_chars must be ≥ 1".into(),
            ));
        }
        if options.overlap_chars >= options.max_chunk_chars {
            return Err(ChunkMdError::InvalidConfig(format!(
                "overlap_chars ({}) must be smaller than max_chunk_chars ({})",
                options.overlap_chars, options.max_chunk_chars
            )));
        }
        Ok(Self { options })
    }

    pub fn options(&self) -> &PlanOptions {
        &self.options
    }

    /// Plan with a profile computed from `blocks` themselves.
    pub fn plan(&self, blocks: &[TextBlock]) -> Vec<Chunk> {
        let profile = StructureProfile::from_blocks(blocks, &self.options.structure);
        self.plan_with_profile(blocks, &profile)
    }

    /// Plan with an existing profile (e.g. one computed over a whole
    /// document when only some pages are being planned).
    pub fn plan_with_profile(&self, blocks: &[TextBlock], profile: &StructureProfile) -> Vec<Chunk> {
        let ranges = self.partition(blocks, profile);
        let mut chunks: Vec<Chunk> = Vec::with_capacity(ranges.len());

        for (index, (range, boundary_hint)) in ranges.into_iter().enumerate() {
            let members = blocks[range].to_vec();
            let headings = members
                .iter()
                .filter_map(|b| profile.heading_hint(b))
                .collect();
            let context = chunks
                .last()
                .and_then(|prev| overlap_tail(&prev.text(), self.options.overlap_chars));
            let mut chunk = Chunk {
                index,
                blocks: members,
                char_count: 0,
                boundary_hint,
                context,
                headings,
            };
            chunk.char_count = chunk.text().chars().count();
            debug!(
                "Chunk {}: {} blocks, {} chars, closed at {:?}",
                index,
                chunk.blocks.len(),
                chunk.char_count,
                chunk.boundary_hint
            );
            chunks.push(chunk);
        }

        chunks
    }

    /// Compute chunk ranges and their closing hints.
    fn partition(
        &self,
        blocks: &[TextBlock],
        profile: &StructureProfile,
    ) -> Vec<(Range<usize>, BoundaryHint)> {
        let max = self.options.max_chunk_chars;
        let kinds: Vec<BlockKind> = blocks.iter().map(|b| profile.classify(b)).collect();

        let mut prefix = Vec::with_capacity(blocks.len() + 1);
        prefix.push(0usize);
        for b in blocks {
            prefix.push(prefix[prefix.len() - 1] + b.char_len());
        }
        let span_len = |r: Range<usize>| -> usize {
            if r.is_empty() {
                0
            } else {
                prefix[r.end] - prefix[r.start] + SEPARATOR_CHARS * (r.len() - 1)
            }
        };
        let boundary = |k: usize| boundary_at(blocks, &kinds, profile, k);

        let mut out = Vec::new();
        let mut start = 0usize;

        for i in 0..blocks.len() {
            let len = blocks[i].char_len();

            if len > max {
                if start < i {
                    out.push((start..i, boundary(i).unwrap_or(BoundaryHint::Forced)));
                }
                debug!("Block {} alone is {} chars (budget {}): forced overflow", i, len, max);
                out.push((i..i + 1, BoundaryHint::Forced));
                start = i + 1;
                continue;
            }

            while start < i && span_len(start..i) + SEPARATOR_CHARS + len > max {
                let (cut, hint) = best_cut(start, i, &boundary);
                out.push((start..cut, hint));
                start = cut;
            }
        }

        if start < blocks.len() {
            out.push((start..blocks.len(), BoundaryHint::EndOfInput));
        }
        out
    }
}

/// Classify the boundary between `blocks[k - 1]` and `blocks[k]`.
///
/// A heading is never separated from the content that follows it, so the
/// boundary right after a heading candidate is not a structural boundary.
fn boundary_at(
    blocks: &[TextBlock],
    kinds: &[BlockKind],
    profile: &StructureProfile,
    k: usize,
) -> Option<BoundaryHint> {
    let (prev, next) = (&blocks[k - 1], &blocks[k]);
    if kinds[k - 1] == BlockKind::HeadingCandidate {
        return None;
    }
    if prev.page != next.page {
        Some(BoundaryHint::PageBreak)
    } else if kinds[k] == BlockKind::HeadingCandidate {
        Some(BoundaryHint::Heading)
    } else if profile.is_gap(prev, next) {
        Some(BoundaryHint::Gap)
    } else {
        None
    }
}

/// Pick where to close the candidate `start..end`. Returns a cut `k` with
/// `start < k <= end`; blocks `k..end` carry over.
fn best_cut(
    start: usize,
    end: usize,
    boundary: &impl Fn(usize) -> Option<BoundaryHint>,
) -> (usize, BoundaryHint) {
    let mut gap = None;
    for k in (start + 1..=end).rev() {
        match boundary(k) {
            Some(hint @ (BoundaryHint::PageBreak | BoundaryHint::Heading)) => return (k, hint),
            Some(BoundaryHint::Gap) if gap.is_none() => gap = Some(k),
            _ => {}
        }
    }
    match gap {
        Some(k) => (k, BoundaryHint::Gap),
        None => (end, BoundaryHint::Forced),
    }
}

/// The last `overlap` characters of `text`, widened back to the start of
/// their line when that line starts close enough, otherwise moved forward
/// to the next word so the context never starts mid-word.
fn overlap_tail(text: &str, overlap: usize) -> Option<String> {
    if overlap == 0 || text.is_empty() {
        return None;
    }
    let total = text.chars().count();
    let skip = total.saturating_sub(overlap);
    let cut = text
        .char_indices()
        .nth(skip)
        .map(|(b, _)| b)
        .unwrap_or(0);

    let line_start = text[..cut].rfind('\n').map(|p| p + 1).unwrap_or(0);
    let start = if text[line_start..cut].chars().count() <= overlap {
        line_start
    } else {
        text[cut..]
            .find(char::is_whitespace)
            .map(|p| cut + p)
            .unwrap_or(cut)
    };

    let tail = text[start..].trim();
    (!tail.is_empty()).then(|| tail.to_string())
}

/// Plan `blocks` with default structure heuristics.
///
/// A zero budget is treated as 1 and the overlap is clamped below the
/// budget, so this never fails; use [`Planner::new`] to get errors instead.
pub fn plan(blocks: &[TextBlock], max_chunk_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    let max = max_chunk_chars.max(1);
    let options = PlanOptions::new(max, overlap_chars.min(max - 1));
    Planner { options }.plan(blocks)
}

/// Check a plan against the planner's invariants.
///
/// Coverage (every block exactly once, in order), contiguous indices,
/// accurate `char_count`, and the size budget except for single-block
/// overflow. A failure here is a planner defect, never an input problem.
pub fn verify_plan(
    chunks: &[Chunk],
    blocks: &[TextBlock],
    max_chunk_chars: usize,
) -> Result<(), ChunkMdError> {
    let mut cursor = 0usize;
    for (position, chunk) in chunks.iter().enumerate() {
        if chunk.index != position {
            return Err(ChunkMdError::Planning(format!(
                "chunk at position {} has index {}",
                position, chunk.index
            )));
        }
        if chunk.blocks.is_empty() {
            return Err(ChunkMdError::Planning(format!("chunk {} is empty", chunk.index)));
        }
        let end = cursor + chunk.blocks.len();
        if end > blocks.len() || blocks[cursor..end] != chunk.blocks[..] {
            return Err(ChunkMdError::Planning(format!(
                "chunk {} does not continue the block sequence at block {}",
                chunk.index, cursor
            )));
        }
        cursor = end;

        let counted = chunk.text().chars().count();
        if counted != chunk.char_count {
            return Err(ChunkMdError::Planning(format!(
                "chunk {} reports {} chars but holds {}",
                chunk.index, chunk.char_count, counted
            )));
        }
        if chunk.char_count > max_chunk_chars && !chunk.is_forced_overflow(max_chunk_chars) {
            return Err(ChunkMdError::Planning(format!(
                "chunk {} has {} chars, over the {} budget",
                chunk.index, chunk.char_count, max_chunk_chars
            )));
        }
    }
    if cursor != blocks.len() {
        return Err(ChunkMdError::Planning(format!(
            "plan covers {} of {} blocks",
            cursor,
            blocks.len()
        )));
    }
    Ok(())
}
