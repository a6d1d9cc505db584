//! Pipeline stages for PDF-to-Markdown conversion.
//!
//! Each submodule implements one step, so each is testable on its own and
//! the two collaborators (extractor, rewrite client) sit behind traits.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ plan ──▶ rewrite ──▶ postprocess ──▶ reassemble
//! (path)    (pdfium)   (chunks)  (model)     (cleanup)       (document)
//!                        ▲                                      ▲
//!                        └────────────── structure ─────────────┘
//! ```
//!
//! 1. [`input`]: validate the local path and `%PDF` magic
//! 2. [`extract`]: text blocks with layout; runs in `spawn_blocking`
//! 3. [`structure`]: block classification and heading ranking shared by
//!    the planner and the reassembler
//! 4. [`plan`]: partition blocks into budget-sized chunks
//! 5. [`rewrite`]: model call with retry, backoff and timeout; the only
//!    stage with network I/O
//! 6. [`postprocess`]: deterministic cleanup of one model answer
//! 7. [`reassemble`]: order, seam de-duplication, heading depths

pub mod extract;
pub mod input;
pub mod plan;
pub mod postprocess;
pub mod reassemble;
pub mod rewrite;
pub mod structure;
