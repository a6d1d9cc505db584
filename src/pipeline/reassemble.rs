//! Reassembly: stitch processed chunks back into one document.
//!
//! ## Steps
//!
//! 1. Sort by planning index; report duplicate and missing indices.
//! 2. Seam de-duplication: when a chunk was sent with overlap context and
//!    the model echoed it, the echoed lead lines are dropped. A run is only
//!    dropped when it lines up exactly with the previous chunk's tail, every
//!    dropped line comes from the context, *and* the answer opens with more
//!    copies of the run than the chunk's own source text does.
//! 3. Heading normalisation: heading depths in rewritten chunks are mapped
//!    onto the document's font-size ranking carried in [`HeadingHint`]s.
//! 4. Join with a single blank line.
//!
//! Nothing here is fatal. Anything that cannot be resolved confidently is
//! left as the model wrote it and reported as a [`ReassemblyWarning`].

use crate::block::HeadingHint;
use crate::config::StructureOptions;
use crate::error::ReassemblyWarning;
use crate::output::ChunkResult;
use crate::pipeline::plan::Chunk;
use crate::pipeline::structure::normalise_line;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

static RE_MD_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})(\s+\S.*)$").unwrap());

const MAX_HEADING_DEPTH: i32 = 6;

/// Non-blank lines compared at the start of a chunk.
const LEAD_LINES: usize = 32;

/// Where a chunk's Markdown came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkOrigin {
    Rewritten,
    /// The rewrite failed; `markdown_text` is the extracted text.
    PassThrough,
}

/// A chunk after the rewrite stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedChunk {
    pub index: usize,
    pub markdown_text: String,
    pub origin: ChunkOrigin,
    /// Overlap context the chunk was sent with.
    pub context: Option<String>,
    pub headings: Vec<HeadingHint>,
    /// Normalised leading lines of the chunk's extracted text.
    pub source_lead: Vec<String>,
}

impl ProcessedChunk {
    /// Pair a rewrite result with the chunk it came from.
    pub fn from_result(chunk: &Chunk, result: &ChunkResult) -> Self {
        Self {
            index: chunk.index,
            markdown_text: result.markdown.clone(),
            origin: if result.is_rewritten() {
                ChunkOrigin::Rewritten
            } else {
                ChunkOrigin::PassThrough
            },
            context: chunk.context.clone(),
            headings: chunk.headings.clone(),
            source_lead: lead_lines(&chunk.text()),
        }
    }

    /// A chunk whose text is used as-is.
    pub fn pass_through(chunk: &Chunk) -> Self {
        let text = chunk.text();
        Self {
            index: chunk.index,
            source_lead: lead_lines(&text),
            markdown_text: text,
            origin: ChunkOrigin::PassThrough,
            context: chunk.context.clone(),
            headings: chunk.headings.clone(),
        }
    }
}

/// First non-blank lines of `text`, normalised for seam comparison.
pub fn lead_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(normalise_line)
        .filter(|l| !l.is_empty())
        .take(LEAD_LINES)
        .collect()
}

/// The assembled Markdown plus what could not be resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub markdown: String,
    pub warnings: Vec<ReassemblyWarning>,
}

/// Marker placed before a chunk that was not rewritten.
pub fn pass_through_marker(index: usize) -> String {
    format!("<!-- chunkmd: chunk {} passed through unmodified -->", index)
}

/// Reassemble with default thresholds.
pub fn reassemble(processed: Vec<ProcessedChunk>) -> Document {
    Reassembler::default().reassemble(processed)
}

#[derive(Debug, Clone)]
pub struct Reassembler {
    max_seam_lines: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(&StructureOptions::default())
    }
}

impl Reassembler {
    pub fn new(options: &StructureOptions) -> Self {
        Self {
            max_seam_lines: options.max_seam_lines,
        }
    }

    pub fn reassemble(&self, mut processed: Vec<ProcessedChunk>) -> Document {
        processed.sort_by_key(|c| c.index);

        let mut warnings = Vec::new();
        let mut sections: Vec<String> = Vec::with_capacity(processed.len());
        // Normalised non-blank lines at the end of the output so far.
        let mut prev_tail: Vec<String> = Vec::new();
        let mut carry_delta: Option<i32> = None;
        let mut expected = 0usize;
        let mut last_index: Option<usize> = None;

        for chunk in processed {
            if last_index == Some(chunk.index) {
                warnings.push(ReassemblyWarning::DuplicateChunk { index: chunk.index });
                continue;
            }
            for index in expected..chunk.index {
                warnings.push(ReassemblyWarning::MissingChunk { index });
            }
            expected = chunk.index + 1;
            last_index = Some(chunk.index);

            let mut lines: Vec<String> = chunk.markdown_text.lines().map(str::to_string).collect();

            match chunk.origin {
                ChunkOrigin::Rewritten => {
                    if let Some(w) = self.dedup_seam(
                        &mut lines,
                        &prev_tail,
                        chunk.context.as_deref(),
                        &chunk.source_lead,
                        chunk.index,
                    ) {
                        warnings.push(w);
                    }
                    let (delta, warning) =
                        normalise_headings(&mut lines, &chunk.headings, carry_delta, chunk.index);
                    carry_delta = delta;
                    warnings.extend(warning);
                }
                ChunkOrigin::PassThrough => {
                    warnings.push(ReassemblyWarning::PassThrough { index: chunk.index });
                }
            }

            trim_blank_edges(&mut lines);
            if lines.is_empty() {
                debug!("Chunk {}: nothing left to emit", chunk.index);
                continue;
            }

            prev_tail = lines
                .iter()
                .rev()
                .map(|l| normalise_line(l))
                .filter(|l| !l.is_empty())
                .take(self.max_seam_lines)
                .collect();
            prev_tail.reverse();

            let body = lines.join("\n");
            sections.push(match chunk.origin {
                ChunkOrigin::Rewritten => body,
                ChunkOrigin::PassThrough => format!("{}\n\n{}", pass_through_marker(chunk.index), body),
            });
        }

        for w in &warnings {
            warn!("Reassembly: {}", w);
        }

        let mut markdown = sections.join("\n\n");
        if !markdown.is_empty() {
            markdown.push('\n');
        }
        Document { markdown, warnings }
    }

    /// Drop lead lines of `lines` that repeat the previous chunk's tail.
    ///
    /// A repeat the source itself has at the same spot is content, not an
    /// echo, and stays.
    fn dedup_seam(
        &self,
        lines: &mut Vec<String>,
        prev_tail: &[String],
        context: Option<&str>,
        source_lead: &[String],
        index: usize,
    ) -> Option<ReassemblyWarning> {
        let context = context?;
        if prev_tail.is_empty() {
            return None;
        }
        // Joined so a paragraph the model re-flowed onto one line still
        // matches the wrapped lines it came from.
        let context_text = context
            .lines()
            .map(normalise_line)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let from_context = |line: &str| context_text.contains(line);

        let lead: Vec<(usize, String)> = lines
            .iter()
            .enumerate()
            .map(|(i, l)| (i, normalise_line(l)))
            .filter(|(_, l)| !l.is_empty())
            .take(LEAD_LINES)
            .collect();
        let lead_text = lead
            .iter()
            .map(|(_, l)| l.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let source_text = source_lead.join(" ");

        let longest = lead.len().min(prev_tail.len()).min(self.max_seam_lines);
        for k in (1..=longest).rev() {
            let tail = &prev_tail[prev_tail.len() - k..];
            let aligned = lead[..k].iter().map(|(_, l)| l).eq(tail.iter());
            if !aligned || !lead[..k].iter().all(|(_, l)| from_context(l)) {
                continue;
            }
            let run = tail.join(" ");
            if leading_copies(&lead_text, &run) <= leading_copies(&source_text, &run) {
                debug!("Chunk {}: {} seam line(s) repeat the source, kept", index, k);
                continue;
            }
            let cut = lead[k - 1].0 + 1;
            lines.drain(..cut);
            debug!("Chunk {}: dropped {} echoed seam line(s)", index, k);
            return None;
        }

        let first = &lead.first()?.1;
        (prev_tail.contains(first)
            && from_context(first)
            && leading_copies(&source_text, first) == 0)
            .then_some(ReassemblyWarning::SeamUnresolved { index })
    }
}

/// How many times `text` starts with `run`, back to back, on word bounds.
fn leading_copies(text: &str, run: &str) -> usize {
    if run.is_empty() {
        return 0;
    }
    let mut copies = 0;
    let mut rest = text;
    while let Some(after) = rest.strip_prefix(run) {
        if !(after.is_empty() || after.starts_with(' ')) {
            break;
        }
        copies += 1;
        rest = after.trim_start();
    }
    copies
}

/// Map heading depths in one chunk onto the document ranking.
///
/// Returns the depth delta to carry into following chunks and a warning
/// when the chunk had hints but none of its headings matched.
fn normalise_headings(
    lines: &mut [String],
    hints: &[HeadingHint],
    carry: Option<i32>,
    index: usize,
) -> (Option<i32>, Option<ReassemblyWarning>) {
    // (line index, depth the model used, depth from the hints)
    let mut found: Vec<(usize, i32, Option<i32>)> = Vec::new();
    let mut in_code = false;
    for (i, line) in lines.iter().enumerate() {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
            continue;
        }
        if in_code {
            continue;
        }
        if let Some(caps) = RE_MD_HEADING.captures(line) {
            let key = normalise_line(line);
            let hint = hints.iter().find(|h| h.key == key).map(|h| h.depth as i32);
            found.push((i, caps[1].len() as i32, hint));
        }
    }

    let mut votes: HashMap<i32, usize> = HashMap::new();
    for (_, model, hint) in &found {
        if let Some(hint) = hint {
            *votes.entry(hint - model).or_default() += 1;
        }
    }
    // Most votes; ties go to the smaller shift.
    let voted = votes
        .into_iter()
        .max_by(|a, b| {
            a.1.cmp(&b.1)
                .then(b.0.abs().cmp(&a.0.abs()))
                .then(b.0.cmp(&a.0))
        })
        .map(|(delta, _)| delta);

    let (delta, warning) = match (hints.is_empty(), voted) {
        (true, _) => (carry, None),
        (false, Some(delta)) => (Some(delta), None),
        (false, None) => {
            return (carry, Some(ReassemblyWarning::HeadingsUnresolved { index }));
        }
    };

    for (i, model, hint) in found {
        let target = match (hint, delta) {
            (Some(depth), _) => depth,
            (None, Some(delta)) => model + delta,
            (None, None) => continue,
        };
        let target = target.clamp(1, MAX_HEADING_DEPTH) as usize;
        if target as i32 != model {
            let rest = lines[i][model as usize..].to_string();
            lines[i] = format!("{}{}", "#".repeat(target), rest);
        }
    }
    (delta, warning)
}

fn trim_blank_edges(lines: &mut Vec<String>) {
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    let lead = lines.iter().take_while(|l| l.trim().is_empty()).count();
    lines.drain(..lead);
    for line in lines.iter_mut() {
        let trimmed = line.trim_end().len();
        line.truncate(trimmed);
    }
}
