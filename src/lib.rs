//! # chunkmd
//!
//! Convert PDF documents to Markdown with a locally hosted language model.
//!
//! ## How it works
//!
//! Small local models cannot take a whole document at once, and cutting the
//! text every N characters splits headings, lists and tables in half. This
//! crate reads the PDF's text layer with its layout (page, position, font),
//! plans chunks that end at structural boundaries, has the model reformat
//! each chunk, and stitches the results back together deterministically.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input       validate the local file (%PDF magic)
//!  ├─ 2. Extract     text blocks with page, bbox and font (pdfium, spawn_blocking)
//!  ├─ 3. Plan        chunks cut at page breaks, headings, then paragraph gaps
//!  ├─ 4. Rewrite     bounded concurrent calls to Ollama / any edgequake-llm provider
//!  ├─ 5. Polish      per-chunk cleanup (fences, preambles, whitespace)
//!  └─ 6. Reassemble  order by index, drop echoed seams, fix heading depths
//! ```
//!
//! A chunk whose rewrite fails is passed through with its extracted text, so
//! the document never loses content.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chunkmd::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Ollama at http://localhost:11434 with gemma3:4b by default
//!     let config = ConversionConfig::default();
//!     let output = convert("document.pdf", &config).await?;
//!     println!("{}", output.markdown);
//!     eprintln!("{}/{} chunks rewritten",
//!         output.stats.rewritten_chunks,
//!         output.stats.total_chunks);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `chunkmd` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! chunkmd = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod block;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use block::{BBox, BlockKind, FontFlags, HeadingHint, TextBlock};
pub use config::{ConversionConfig, ConversionConfigBuilder, PageSelection, StructureOptions};
pub use convert::{convert, convert_blocks, convert_sync, convert_to_file, inspect, write_atomic};
pub use error::{ChunkError, ChunkMdError, ReassemblyWarning, ServiceError};
pub use output::{ChunkResult, ChunkSummary, ConversionOutput, ConversionStats, PlanSummary};
pub use pipeline::extract::{PdfiumExtractor, StructuralExtractor};
pub use pipeline::plan::{plan, verify_plan, BoundaryHint, Chunk, PlanOptions, Planner};
pub use pipeline::reassemble::{reassemble, ChunkOrigin, Document, ProcessedChunk, Reassembler};
pub use pipeline::rewrite::{OllamaClient, ProviderClient, RewriteClient};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{convert_stream, ChunkStream};
