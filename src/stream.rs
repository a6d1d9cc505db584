//! Streaming conversion API: emit chunk results as they complete.
//!
//! [`convert_stream`] yields one [`ChunkResult`] per planned chunk in
//! completion order, which with `concurrency > 1` is not planning order.
//! Sort by `index` (or feed the results to
//! [`crate::pipeline::reassemble::reassemble`]) when order matters.
//!
//! The eager [`crate::convert::convert`] drives the same pool and collects
//! it, so both APIs retry, time out and report progress identically.

use crate::config::ConversionConfig;
use crate::error::ChunkMdError;
use crate::output::ChunkResult;
use crate::pipeline::plan::{verify_plan, Chunk, PlanOptions, Planner};
use crate::pipeline::rewrite::{process_chunk, resolve_client, RewriteClient};
use crate::pipeline::{extract, input};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of chunk results.
pub type ChunkStream = Pin<Box<dyn Stream<Item = ChunkResult> + Send>>;

/// Convert a PDF, streaming chunk results as they are ready.
///
/// # Returns
/// - `Ok(ChunkStream)`: one item per chunk; failed chunks carry their
///   original text and an `error`
/// - `Err(ChunkMdError)`: fatal error before any rewrite started
pub async fn convert_stream(
    input_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ChunkStream, ChunkMdError> {
    let input_path = input_path.as_ref();
    info!("Starting streaming conversion: {}", input_path.display());

    // ── Resolve input and client ─────────────────────────────────────────
    let pdf_path = input::resolve_input(input_path)?;
    let client = resolve_client(config)?;

    // ── Extract and plan ─────────────────────────────────────────────────
    let blocks = extract::extract_blocks(&pdf_path, config).await?;
    let planner = Planner::new(PlanOptions::from_config(config))?;
    let chunks = planner.plan(&blocks);
    verify_plan(&chunks, &blocks, config.max_chunk_chars)?;
    info!("Planned {} chunks from {} blocks", chunks.len(), blocks.len());

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(chunks.len());
    }

    Ok(rewrite_stream(client, Arc::new(chunks), config))
}

/// Run every chunk through the bounded rewrite pool.
///
/// At most `config.concurrency` calls are in flight; results come out in
/// completion order. Progress callbacks fire per chunk.
pub fn rewrite_stream(
    client: Arc<dyn RewriteClient>,
    chunks: Arc<Vec<Chunk>>,
    config: &ConversionConfig,
) -> ChunkStream {
    let total = chunks.len();
    let concurrency = config.concurrency.max(1);
    let config = Arc::new(config.clone());

    let s = stream::iter(0..total)
        .map(move |i| {
            let client = Arc::clone(&client);
            let chunks = Arc::clone(&chunks);
            let cfg = Arc::clone(&config);
            async move {
                let chunk = &chunks[i];
                if let Some(ref cb) = cfg.progress_callback {
                    cb.on_chunk_start(chunk.index, total);
                }
                let result = process_chunk(&client, chunk, total, &cfg).await;
                if let Some(ref cb) = cfg.progress_callback {
                    match &result.error {
                        None => cb.on_chunk_complete(chunk.index, total, result.markdown.len()),
                        Some(e) => cb.on_chunk_error(chunk.index, total, &e.to_string()),
                    }
                }
                result
            }
        })
        .buffer_unordered(concurrency);

    Box::pin(s)
}
