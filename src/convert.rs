//! Eager (full-document) conversion entry points.
//!
//! These wait for every chunk, reassemble the document and return it in a
//! [`ConversionOutput`]. Use [`crate::stream::convert_stream`] to receive
//! chunk results as they complete instead.

use crate::block::TextBlock;
use crate::config::ConversionConfig;
use crate::error::ChunkMdError;
use crate::output::{ChunkResult, ConversionOutput, ConversionStats, PlanSummary};
use crate::pipeline::plan::{verify_plan, BoundaryHint, Chunk, PlanOptions, Planner};
use crate::pipeline::reassemble::{ProcessedChunk, Reassembler};
use crate::pipeline::rewrite::{resolve_client, RewriteClient};
use crate::pipeline::structure::StructureProfile;
use crate::pipeline::{extract, input};
use crate::stream::rewrite_stream;
use futures::stream::StreamExt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert a PDF file to Markdown.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(ConversionOutput)` on success, even if some chunks could not be
/// rewritten (they are passed through; check `output.stats.failed_chunks`
/// or call [`ConversionOutput::into_result`]).
///
/// # Errors
/// Returns `Err(ChunkMdError)` only for fatal errors:
/// - File not found / permission denied / not a PDF
/// - Encrypted PDF without the right password
/// - Invalid configuration or unknown provider
pub async fn convert(
    input_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ChunkMdError> {
    let total_start = Instant::now();
    let input_path = input_path.as_ref();
    info!("Starting conversion: {}", input_path.display());

    // ── Step 1: Resolve input ────────────────────────────────────────────
    let pdf_path = input::resolve_input(input_path)?;

    // ── Step 2: Resolve client (fail before the slow extraction) ────────
    let client = resolve_client(config)?;

    // ── Step 3: Extract blocks ───────────────────────────────────────────
    let extract_start = Instant::now();
    let blocks = extract::extract_blocks(&pdf_path, config).await?;
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;
    info!("Extracted {} blocks in {}ms", blocks.len(), extract_duration_ms);

    // ── Steps 4–6: Plan, rewrite, reassemble ────────────────────────────
    let mut output = run_pipeline(&blocks, client, config).await?;
    output.stats.extract_duration_ms = extract_duration_ms;
    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    Ok(output)
}

/// Run plan → rewrite → reassemble on blocks that were already extracted.
///
/// Lets embedders bring their own extraction and is what the integration
/// tests drive with fake clients.
pub async fn convert_blocks(
    blocks: Vec<TextBlock>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ChunkMdError> {
    let total_start = Instant::now();
    let client = resolve_client(config)?;
    let mut output = run_pipeline(&blocks, client, config).await?;
    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    Ok(output)
}

/// Convert a PDF and write the Markdown to a file.
///
/// The file is written atomically: a temp file in the same directory is
/// renamed over the target, so readers never see a partial document.
pub async fn convert_to_file(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ChunkMdError> {
    let output = convert(input_path, config).await?;
    write_atomic(output_path.as_ref(), &output.markdown)?;
    Ok(output)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ChunkMdError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ChunkMdError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input_path, config))
}

/// Extract and plan without calling a model.
///
/// Shows where chunks would be cut; needs no running model server.
pub async fn inspect(
    input_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<PlanSummary, ChunkMdError> {
    let pdf_path = input::resolve_input(input_path)?;
    let blocks = extract::extract_blocks(&pdf_path, config).await?;
    let profile = StructureProfile::from_blocks(&blocks, &config.structure);
    let planner = Planner::new(PlanOptions::from_config(config))?;
    let chunks = planner.plan_with_profile(&blocks, &profile);
    verify_plan(&chunks, &blocks, config.max_chunk_chars)?;

    Ok(PlanSummary::from_plan(
        &chunks,
        blocks.len(),
        config.max_chunk_chars,
        config.overlap_chars,
        profile.body_size(),
    ))
}

/// Write `contents` to `path` via a temp file in the same directory.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), ChunkMdError> {
    let fail = |source: std::io::Error| ChunkMdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(fail)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(fail)?;
    tmp.write_all(contents.as_bytes()).map_err(fail)?;
    tmp.as_file().sync_all().map_err(fail)?;
    tmp.persist(path).map_err(|e| fail(e.error))?;

    debug!("Wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn run_pipeline(
    blocks: &[TextBlock],
    client: Arc<dyn RewriteClient>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ChunkMdError> {
    // ── Plan ─────────────────────────────────────────────────────────────
    let planner = Planner::new(PlanOptions::from_config(config))?;
    let chunks = planner.plan(blocks);
    verify_plan(&chunks, blocks, config.max_chunk_chars)?;
    if chunks.is_empty() {
        warn!("No text to convert");
    }
    info!(
        "Planned {} chunks (budget {} chars, overlap {})",
        chunks.len(),
        config.max_chunk_chars,
        config.overlap_chars
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(chunks.len());
    }

    // ── Rewrite ──────────────────────────────────────────────────────────
    let rewrite_start = Instant::now();
    let chunks = Arc::new(chunks);
    let mut results: Vec<ChunkResult> = rewrite_stream(client, Arc::clone(&chunks), config)
        .collect()
        .await;
    results.sort_by_key(|r| r.index);
    let rewrite_duration_ms = rewrite_start.elapsed().as_millis() as u64;

    // ── Reassemble ───────────────────────────────────────────────────────
    let processed: Vec<ProcessedChunk> = results
        .iter()
        .filter_map(|r| chunks.get(r.index).map(|c| ProcessedChunk::from_result(c, r)))
        .collect();
    let document = Reassembler::new(&config.structure).reassemble(processed);

    let rewritten = results.iter().filter(|r| r.is_rewritten()).count();
    let stats = ConversionStats {
        total_blocks: blocks.len(),
        total_chunks: chunks.len(),
        rewritten_chunks: rewritten,
        failed_chunks: results.len() - rewritten,
        forced_chunks: count_forced(&chunks),
        input_chars: blocks.iter().map(TextBlock::char_len).sum(),
        output_chars: document.markdown.chars().count(),
        extract_duration_ms: 0,
        rewrite_duration_ms,
        total_duration_ms: 0,
    };

    info!(
        "Conversion complete: {}/{} chunks rewritten, {} warnings, {}ms rewriting",
        rewritten,
        chunks.len(),
        document.warnings.len(),
        rewrite_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(chunks.len(), rewritten);
    }

    Ok(ConversionOutput {
        markdown: document.markdown,
        chunks: results,
        warnings: document.warnings,
        stats,
    })
}

fn count_forced(chunks: &[Chunk]) -> usize {
    chunks
        .iter()
        .filter(|c| c.boundary_hint == BoundaryHint::Forced)
        .count()
}
