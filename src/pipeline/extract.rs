//! Structural extraction: read the PDF text layer into ordered blocks.
//!
//! ## Why spawn_blocking?
//!
//! pdfium keeps thread-local state and every call is synchronous, so the
//! whole extraction runs on a blocking-pool thread via [`extract_blocks`].
//!
//! ## Grouping
//!
//! pdfium hands out text objects (runs of glyphs sharing one font). They
//! are grouped twice:
//!
//! 1. runs on the same baseline become a **line**;
//! 2. consecutive lines become a **block** until the vertical gap opens up,
//!    the font size or weight changes, or the text jumps back up the page
//!    (next column).
//!
//! Object order is kept as reading order; sorting by position would
//! interleave columns.

use crate::block::{BBox, FontFlags, TextBlock};
use crate::config::{ConversionConfig, PageSelection};
use crate::error::ChunkMdError;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Whitespace between lines, as a multiple of the font size, that starts a
/// new block.
const BLOCK_BREAK_RATIO: f32 = 0.6;

/// Font sizes closer than this (points) count as the same size.
const SIZE_TOLERANCE: f32 = 0.5;

/// Produces the ordered block sequence for a document.
///
/// Implementations are synchronous; [`extract_blocks`] moves them onto the
/// blocking pool. Inject a custom one with
/// [`crate::config::ConversionConfigBuilder::extractor`].
pub trait StructuralExtractor: Send + Sync {
    fn extract(
        &self,
        path: &Path,
        pages: &PageSelection,
        password: Option<&str>,
    ) -> Result<Vec<TextBlock>, ChunkMdError>;
}

/// Run the configured extractor (pdfium by default) off the async runtime.
pub async fn extract_blocks(
    pdf_path: &Path,
    config: &ConversionConfig,
) -> Result<Vec<TextBlock>, ChunkMdError> {
    let extractor: Arc<dyn StructuralExtractor> = config
        .extractor
        .clone()
        .unwrap_or_else(|| Arc::new(PdfiumExtractor));
    let path = pdf_path.to_path_buf();
    let pages = config.pages.clone();
    let password = config.password.clone();

    tokio::task::spawn_blocking(move || extractor.extract(&path, &pages, password.as_deref()))
        .await
        .map_err(|e| ChunkMdError::Internal(format!("Extraction task panicked: {}", e)))?
}

/// Extractor backed by the pdfium text layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfiumExtractor;

impl StructuralExtractor for PdfiumExtractor {
    fn extract(
        &self,
        path: &Path,
        pages: &PageSelection,
        password: Option<&str>,
    ) -> Result<Vec<TextBlock>, ChunkMdError> {
        let pdfium = pdfium_auto::bind_pdfium_silent()
            .map_err(|e| ChunkMdError::PdfiumBindingFailed(e.to_string()))?;

        let document = pdfium
            .load_pdf_from_file(path, password)
            .map_err(|e| map_load_error(path, password.is_some(), e))?;

        let doc_pages = document.pages();
        let total = doc_pages.len() as usize;
        if let Some(page) = pages.max_page().filter(|p| *p > total || *p == 0) {
            return Err(ChunkMdError::PageOutOfRange { page, total });
        }
        let indices = pages.to_indices(total);
        info!("PDF loaded: {} pages, extracting {}", total, indices.len());

        let mut blocks = Vec::new();
        for idx in indices {
            let page = doc_pages
                .get(idx as u16)
                .map_err(|e| ChunkMdError::TextExtractionFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                })?;
            let runs = page_runs(&page, idx)?;
            let page_blocks = group_blocks(idx, group_lines(runs));
            debug!("Page {}: {} blocks", idx + 1, page_blocks.len());
            blocks.extend(page_blocks);
        }

        if blocks.is_empty() {
            warn!("No text layer found in '{}'", path.display());
        }
        Ok(blocks)
    }
}

fn map_load_error(path: &Path, had_password: bool, err: PdfiumError) -> ChunkMdError {
    let detail = format!("{:?}", err);
    let path: PathBuf = path.to_path_buf();
    if detail.to_lowercase().contains("password") {
        if had_password {
            ChunkMdError::WrongPassword { path }
        } else {
            ChunkMdError::PasswordRequired { path }
        }
    } else {
        ChunkMdError::CorruptPdf { path, detail }
    }
}

/// Collect the text runs of one page in object order, y flipped so it grows
/// down the page.
fn page_runs(page: &PdfPage, idx: usize) -> Result<Vec<Run>, ChunkMdError> {
    let height = page.height().value;
    let mut runs = Vec::new();

    for object in page.objects().iter() {
        let Some(text_obj) = object.as_text_object() else {
            continue;
        };
        let text = text_obj.text();
        if text.trim().is_empty() {
            continue;
        }
        let bounds = object
            .bounds()
            .map_err(|e| ChunkMdError::TextExtractionFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let font = text_obj.font();
        let flags = font_flags(
            &font.name(),
            font.is_bold_reenforced(),
            font.is_italic(),
            font.is_fixed_pitch(),
        );

        runs.push(Run {
            bbox: BBox::new(
                bounds.left().value,
                height - bounds.top().value,
                bounds.right().value,
                height - bounds.bottom().value,
            ),
            text,
            size: text_obj.scaled_font_size().value,
            flags,
        });
    }
    Ok(runs)
}

/// One pdfium text object.
#[derive(Debug, Clone, PartialEq)]
struct Run {
    bbox: BBox,
    text: String,
    size: f32,
    flags: FontFlags,
}

/// Runs sharing a baseline.
#[derive(Debug, Clone, PartialEq)]
struct Line {
    bbox: BBox,
    text: String,
    size: f32,
    flags: FontFlags,
}

fn group_lines(runs: Vec<Run>) -> Vec<Line> {
    let mut lines: Vec<Line> = Vec::new();

    for run in runs {
        let size = run.size.max(1.0);
        let same_line = lines.last().is_some_and(|line| {
            (line.bbox.y1 - run.bbox.y1).abs() <= 0.5 * size
                && run.bbox.x0 >= line.bbox.x0 - 0.5 * size
        });

        if let (true, Some(line)) = (same_line, lines.last_mut()) {
            if run.bbox.x0 - line.bbox.x1 > 0.15 * size
                && !line.text.ends_with(char::is_whitespace)
                && !run.text.starts_with(char::is_whitespace)
            {
                line.text.push(' ');
            }
            line.text.push_str(&run.text);
            line.bbox = line.bbox.union(&run.bbox);
            line.size = line.size.max(run.size);
            // A line keeps a style only if every run has it.
            line.flags = line.flags & run.flags;
        } else {
            lines.push(Line {
                bbox: run.bbox,
                text: run.text,
                size: run.size,
                flags: run.flags,
            });
        }
    }

    for line in &mut lines {
        line.text = line.text.trim().to_string();
    }
    lines.retain(|l| !l.text.is_empty());
    lines
}

fn group_blocks(page: usize, lines: Vec<Line>) -> Vec<TextBlock> {
    let mut blocks: Vec<TextBlock> = Vec::new();
    let mut last: Option<Line> = None;

    for line in lines {
        let starts_block = match &last {
            None => true,
            Some(prev) => {
                let size = prev.size.max(line.size).max(1.0);
                line.bbox.y0 - prev.bbox.y1 > BLOCK_BREAK_RATIO * size
                    || (line.size - prev.size).abs() > SIZE_TOLERANCE
                    || line.flags.is_bold() != prev.flags.is_bold()
                    || line.bbox.y0 + SIZE_TOLERANCE < prev.bbox.y0
            }
        };

        match (starts_block, blocks.last_mut()) {
            (false, Some(block)) => {
                block.text.push('\n');
                block.text.push_str(&line.text);
                block.bbox = block.bbox.union(&line.bbox);
            }
            _ => blocks.push(
                TextBlock::new(page, line.bbox, line.text.clone(), line.size)
                    .with_flags(line.flags),
            ),
        }
        last = Some(line);
    }
    blocks
}

/// Combine pdfium's font descriptor bits with hints from the font name;
/// many embedded subsets only say "Bold" in the name.
fn font_flags(name: &str, bold: bool, italic: bool, fixed_pitch: bool) -> FontFlags {
    let name = name.to_lowercase();
    let mut flags = FontFlags::NONE;
    if bold || name.contains("bold") {
        flags.insert(FontFlags::BOLD);
    }
    if italic || name.contains("italic") || name.contains("oblique") {
        flags.insert(FontFlags::ITALIC);
    }
    if fixed_pitch {
        flags.insert(FontFlags::MONOSPACE);
    }
    flags
}
