//! Error types for the chunkmd library.
//!
//! Four error types reflect four distinct failure modes:
//!
//! * [`ChunkMdError`]: **Fatal**, the run cannot proceed at all (unreadable
//!   or encrypted PDF, invalid configuration, output not writable). Returned
//!   as `Err(ChunkMdError)` from the top-level `convert*` functions.
//!
//! * [`ServiceError`]: a single rewrite call failed (transport, HTTP status,
//!   timeout). The retry loop in [`crate::pipeline::rewrite`] consumes these.
//!
//! * [`ChunkError`]: **Non-fatal**, a chunk exhausted its retries. Stored
//!   in [`crate::output::ChunkResult`]; the chunk's extracted text is passed
//!   through so the document keeps its shape.
//!
//! * [`ReassemblyWarning`]: the reassembler could not confidently resolve a
//!   seam or heading remap and left the content as it was.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the chunkmd library.
#[derive(Debug, Error)]
pub enum ChunkMdError {
    // ── Extraction errors ─────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Selected page numbers exceed the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium could not read the text layer of one page.
    #[error("Text extraction failed for page {page}: {detail}")]
    TextExtractionFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDFium is normally downloaded automatically on first run.\n\
If the auto-download failed, set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Rewrite errors ────────────────────────────────────────────────────
    /// The configured provider could not be constructed.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Some chunks fell back to pass-through.
    ///
    /// Returned by [`crate::output::ConversionOutput::into_result`] when
    /// the caller wants to treat any chunk failure as an error.
    #[error("{failed}/{total} chunks could not be rewritten and were passed through")]
    PartialFailure {
        rewritten: usize,
        failed: usize,
        total: usize,
    },

    // ── Planning errors ───────────────────────────────────────────────────
    /// The planner produced a plan that violates its own invariants.
    ///
    /// Well-formed block sequences never trigger this; seeing it is a bug.
    #[error("Chunk planning defect: {0}")]
    Planning(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChunkMdError {
    /// True for the errors raised while opening or reading the source PDF.
    pub fn is_extraction_error(&self) -> bool {
        matches!(
            self,
            ChunkMdError::FileNotFound { .. }
                | ChunkMdError::PermissionDenied { .. }
                | ChunkMdError::NotAPdf { .. }
                | ChunkMdError::CorruptPdf { .. }
                | ChunkMdError::PasswordRequired { .. }
                | ChunkMdError::WrongPassword { .. }
                | ChunkMdError::PageOutOfRange { .. }
                | ChunkMdError::TextExtractionFailed { .. }
                | ChunkMdError::PdfiumBindingFailed(_)
        )
    }
}

/// A failed call to the text-completion service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Connection refused, DNS failure, reset mid-body…
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success HTTP status.
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// No answer within the configured per-call timeout.
    #[error("call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The body did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Error surfaced by an `edgequake-llm` provider.
    #[error("provider error: {0}")]
    Provider(String),

    /// The model answered with nothing but whitespace.
    #[error("service returned an empty completion")]
    EmptyResponse,
}

impl ServiceError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Client errors (bad model name, bad request, auth) are permanent; 408
    /// and 429 are the exceptions because they describe server load.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Status { status, .. } => {
                !(400..500).contains(status) || *status == 408 || *status == 429
            }
            _ => true,
        }
    }
}

/// A non-fatal error for a single chunk.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ChunkError {
    /// Rewrite call failed after retries; original text was passed through.
    #[error("Chunk {index}: rewrite failed after {retries} retries: {detail}")]
    RewriteFailed {
        index: usize,
        retries: u32,
        detail: String,
    },
}

/// Something the reassembler could not resolve with confidence.
///
/// Content is always kept; the warning only records where to look.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReassemblyWarning {
    /// No processed output arrived for this planned index.
    #[error("chunk {index} is missing from the processed set")]
    MissingChunk { index: usize },

    /// More than one result carried the same index; the first was kept.
    #[error("chunk {index} was delivered more than once; extra copies dropped")]
    DuplicateChunk { index: usize },

    /// Lead lines of this chunk echo the previous tail but do not line up.
    #[error("seam before chunk {index} looks duplicated but could not be aligned")]
    SeamUnresolved { index: usize },

    /// No heading in this chunk matched the structural hints.
    #[error("headings in chunk {index} could not be matched to document structure")]
    HeadingsUnresolved { index: usize },

    /// This chunk is the original extracted text, not model output.
    #[error("chunk {index} was passed through unmodified")]
    PassThrough { index: usize },
}
