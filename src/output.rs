//! Output types returned by the conversion functions.

use crate::error::{ChunkError, ChunkMdError, ReassemblyWarning};
use crate::pipeline::plan::{BoundaryHint, Chunk};
use serde::{Deserialize, Serialize};

/// Result of rewriting one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    /// 0-based planning index.
    pub index: usize,
    /// 0-based `(first, last)` page span of the chunk.
    pub pages: (usize, usize),
    /// Cleaned model output, or the chunk's own text when `error` is set.
    pub markdown: String,
    pub duration_ms: u64,
    /// Retries used (0 = first attempt succeeded).
    pub retries: u32,
    pub error: Option<ChunkError>,
}

impl ChunkResult {
    /// True when the model output was used.
    pub fn is_rewritten(&self) -> bool {
        self.error.is_none()
    }
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionStats {
    pub total_blocks: usize,
    pub total_chunks: usize,
    pub rewritten_chunks: usize,
    pub failed_chunks: usize,
    /// Chunks closed by a hard cut or holding one oversized block.
    pub forced_chunks: usize,
    pub input_chars: usize,
    pub output_chars: usize,
    pub extract_duration_ms: u64,
    pub rewrite_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a conversion produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// The assembled document.
    pub markdown: String,
    /// Per-chunk results, sorted by index.
    pub chunks: Vec<ChunkResult>,
    pub warnings: Vec<ReassemblyWarning>,
    pub stats: ConversionStats,
}

impl ConversionOutput {
    /// Chunks that fell back to pass-through.
    pub fn failed_chunks(&self) -> impl Iterator<Item = &ChunkResult> {
        self.chunks.iter().filter(|c| !c.is_rewritten())
    }

    /// Treat any pass-through chunk as an error.
    pub fn into_result(self) -> Result<Self, ChunkMdError> {
        if self.stats.failed_chunks == 0 {
            Ok(self)
        } else {
            Err(ChunkMdError::PartialFailure {
                rewritten: self.stats.rewritten_chunks,
                failed: self.stats.failed_chunks,
                total: self.stats.total_chunks,
            })
        }
    }
}

/// One planned chunk, without its text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub index: usize,
    pub pages: (usize, usize),
    pub blocks: usize,
    pub chars: usize,
    pub boundary: BoundaryHint,
    pub headings: Vec<String>,
    pub forced_overflow: bool,
    pub context_chars: usize,
}

/// What [`crate::inspect`] reports: the plan a conversion would use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_blocks: usize,
    pub total_chars: usize,
    pub max_chunk_chars: usize,
    pub overlap_chars: usize,
    pub body_font_size: f32,
    pub chunks: Vec<ChunkSummary>,
}

impl PlanSummary {
    pub fn from_plan(
        chunks: &[Chunk],
        total_blocks: usize,
        max_chunk_chars: usize,
        overlap_chars: usize,
        body_font_size: f32,
    ) -> Self {
        let summaries: Vec<ChunkSummary> = chunks
            .iter()
            .map(|c| ChunkSummary {
                index: c.index,
                pages: c.page_span(),
                blocks: c.blocks.len(),
                chars: c.char_count,
                boundary: c.boundary_hint,
                headings: c.headings.iter().map(|h| h.key.clone()).collect(),
                forced_overflow: c.is_forced_overflow(max_chunk_chars),
                context_chars: c.context.as_ref().map_or(0, |s| s.chars().count()),
            })
            .collect();
        Self {
            total_blocks,
            total_chars: summaries.iter().map(|c| c.chars).sum(),
            max_chunk_chars,
            overlap_chars,
            body_font_size,
            chunks: summaries,
        }
    }
}
