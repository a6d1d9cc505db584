//! Progress-callback trait for per-chunk conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the rewrite pool works through the plan.
//!
//! # Example
//!
//! ```rust
//! use chunkmd::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_chunk_complete(&self, index: usize, total_chunks: usize, markdown_len: usize) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("chunk {index} done ({done}/{total_chunks}, {markdown_len} bytes)");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the conversion pipeline as it processes each chunk.
///
/// Implementations must be `Send + Sync`: with `concurrency > 1` the chunk
/// methods are called from several tasks at once and in completion order,
/// not planning order. All methods default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once after planning, before any rewrite call.
    fn on_conversion_start(&self, total_chunks: usize) {
        let _ = total_chunks;
    }

    /// Called just before the first rewrite attempt for a chunk.
    ///
    /// `index` is the 0-based planning index.
    fn on_chunk_start(&self, index: usize, total_chunks: usize) {
        let _ = (index, total_chunks);
    }

    /// Called when a chunk was rewritten successfully.
    fn on_chunk_complete(&self, index: usize, total_chunks: usize, markdown_len: usize) {
        let _ = (index, total_chunks, markdown_len);
    }

    /// Called when a chunk exhausted its retries and falls back to
    /// pass-through.
    fn on_chunk_error(&self, index: usize, total_chunks: usize, error: &str) {
        let _ = (index, total_chunks, error);
    }

    /// Called once after every chunk has been attempted.
    fn on_conversion_complete(&self, total_chunks: usize, rewritten: usize) {
        let _ = (total_chunks, rewritten);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
