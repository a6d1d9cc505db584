//! Configuration types for PDF-to-Markdown conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. One `Clone` struct holds every knob
//! so a config can be shared across the rewrite workers and logged as a unit.

use crate::error::ChunkMdError;
use crate::pipeline::extract::StructuralExtractor;
use crate::pipeline::rewrite::RewriteClient;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default Ollama endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Default local model.
pub const DEFAULT_MODEL: &str = "gemma3:4b";

/// Configuration for a PDF-to-Markdown conversion.
///
/// # Example
/// ```rust
/// use chunkmd::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .max_chunk_chars(6000)
///     .overlap_chars(300)
///     .concurrency(2)
///     .model("llama3.1:8b")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_chunk_chars, 6000);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Size budget per chunk, in characters. Default: 8000.
    ///
    /// A chunk only exceeds this when it consists of a single block that is
    /// larger on its own (a forced overflow).
    pub max_chunk_chars: usize,

    /// Characters of the previous chunk's tail shown to the model as
    /// read-only context. Default: 200. Zero disables overlap.
    pub overlap_chars: usize,

    /// Number of concurrent rewrite calls. Default: 4. 1 = sequential.
    ///
    /// A local model usually serves one request at a time per GPU, so a
    /// small pool mostly hides HTTP latency rather than adding throughput.
    pub concurrency: usize,

    /// Base URL of the Ollama server. Default: `http://localhost:11434`.
    pub endpoint: String,

    /// Model identifier. If None, uses `gemma3:4b` for Ollama and the
    /// provider default otherwise.
    pub model: Option<String>,

    /// Hosted provider name (`openai`, `anthropic`, `gemini`, …). When set,
    /// requests go through `edgequake-llm` instead of Ollama.
    pub provider_name: Option<String>,

    /// Pre-constructed rewrite client. Takes precedence over everything else.
    pub client: Option<Arc<dyn RewriteClient>>,

    /// Pre-constructed extractor. Defaults to pdfium.
    pub extractor: Option<Arc<dyn StructuralExtractor>>,

    /// Instruction template. If None, uses the built-in default.
    /// Supports `{chunk}`, `{total}` and `{pages}` placeholders.
    pub instruction: Option<String>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per chunk. Default: 4096.
    pub max_tokens: usize,

    /// Retry attempts per chunk after the first failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 120.
    ///
    /// Local models on CPU can take well over a minute for an 8 000
    /// character chunk.
    pub api_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Page selection. Default: All pages.
    pub pages: PageSelection,

    /// Heuristics for heading, table and gap detection.
    pub structure: StructureOptions,

    /// Optional per-chunk progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 8000,
            overlap_chars: 200,
            concurrency: 4,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: None,
            provider_name: None,
            client: None,
            extractor: None,
            instruction: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            password: None,
            pages: PageSelection::default(),
            structure: StructureOptions::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("max_chunk_chars", &self.max_chunk_chars)
            .field("overlap_chars", &self.overlap_chars)
            .field("concurrency", &self.concurrency)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("client", &self.client.as_ref().map(|_| "<dyn RewriteClient>"))
            .field(
                "extractor",
                &self.extractor.as_ref().map(|_| "<dyn StructuralExtractor>"),
            )
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("pages", &self.pages)
            .field("structure", &self.structure)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The model name actually sent to Ollama.
    pub fn ollama_model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl fmt::Debug for ConversionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ConversionConfigBuilder {
    pub fn max_chunk_chars(mut self, n: usize) -> Self {
        self.config.max_chunk_chars = n;
        self
    }

    pub fn overlap_chars(mut self, n: usize) -> Self {
        self.config.overlap_chars = n;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn client(mut self, client: Arc<dyn RewriteClient>) -> Self {
        self.config.client = Some(client);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn StructuralExtractor>) -> Self {
        self.config.extractor = Some(extractor);
        self
    }

    pub fn instruction(mut self, template: impl Into<String>) -> Self {
        self.config.instruction = Some(template.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn structure(mut self, options: StructureOptions) -> Self {
        self.config.structure = options;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ChunkMdError> {
        let c = &self.config;
        if c.max_chunk_chars == 0 {
            return Err(ChunkMdError::InvalidConfig(
                "max_chunk_chars must be ≥ 1".into(),
            ));
        }
        if c.overlap_chars >= c.max_chunk_chars {
            return Err(ChunkMdError::InvalidConfig(format!(
                "overlap_chars ({}) must be smaller than max_chunk_chars ({})",
                c.overlap_chars, c.max_chunk_chars
            )));
        }
        if c.concurrency == 0 {
            return Err(ChunkMdError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if !c.endpoint.starts_with("http://") && !c.endpoint.starts_with("https://") {
            return Err(ChunkMdError::InvalidConfig(format!(
                "endpoint must be an http(s) URL, got '{}'",
                c.endpoint
            )));
        }
        c.structure.validate()?;
        Ok(self.config)
    }
}

// ── Structure heuristics ─────────────────────────────────────────────────

/// Thresholds used to classify blocks and detect boundaries.
///
/// Extraction is deterministic but PDFs are not: these are the dials to
/// turn when a document's headings are missed or over-detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureOptions {
    /// A block is a heading candidate when its font is at least this many
    /// times the body size. Default: 1.15.
    pub heading_size_ratio: f32,

    /// Longest text (characters) still considered a heading. Default: 120.
    pub heading_max_chars: usize,

    /// Vertical whitespace, as a multiple of the font size, that counts as
    /// a paragraph gap (the blank-line equivalent). Default: 0.8.
    pub gap_factor: f32,

    /// Longest run of lines the reassembler may drop at a seam. Default: 8.
    pub max_seam_lines: usize,
}

impl Default for StructureOptions {
    fn default() -> Self {
        Self {
            heading_size_ratio: 1.15,
            heading_max_chars: 120,
            gap_factor: 0.8,
            max_seam_lines: 8,
        }
    }
}

impl StructureOptions {
    fn validate(&self) -> Result<(), ChunkMdError> {
        if !(self.heading_size_ratio >= 1.0) {
            return Err(ChunkMdError::InvalidConfig(format!(
                "heading_size_ratio must be ≥ 1.0, got {}",
                self.heading_size_ratio
            )));
        }
        if !(self.gap_factor > 0.0) {
            return Err(ChunkMdError::InvalidConfig(format!(
                "gap_factor must be > 0, got {}",
                self.gap_factor
            )));
        }
        Ok(())
    }
}

// ── Page selection ───────────────────────────────────────────────────────

/// Specifies which pages of the PDF to extract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSelection {
    /// All pages (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed pages
    /// that exist in a document of `total_pages`.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => (1..=total_pages)
                .contains(p)
                .then(|| vec![p - 1])
                .unwrap_or_default(),
            PageSelection::Range(start, end) => ((*start).max(1) - 1..(*end).min(total_pages)).collect(),
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|p| (1..=total_pages).contains(*p))
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Highest 1-indexed page the selection names, if any.
    pub fn max_page(&self) -> Option<usize> {
        match self {
            PageSelection::All => None,
            PageSelection::Single(p) => Some(*p),
            PageSelection::Range(_, end) => Some(*end),
            PageSelection::Set(pages) => pages.iter().copied().max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_local_model_setup() {
        let c = ConversionConfig::default();
        assert_eq!(c.max_chunk_chars, 8000);
        assert_eq!(c.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(c.ollama_model(), DEFAULT_MODEL);
    }

    #[test]
    fn overlap_must_be_below_budget() {
        let err = ConversionConfig::builder()
            .max_chunk_chars(100)
            .overlap_chars(100)
            .build()
            .unwrap_err();
        assert!(matches!(err, ChunkMdError::InvalidConfig(_)));
    }

    #[test]
    fn zero_budget_rejected() {
        assert!(ConversionConfig::builder()
            .max_chunk_chars(0)
            .overlap_chars(0)
            .build()
            .is_err());
    }

    #[test]
    fn endpoint_trailing_slash_trimmed() {
        let c = ConversionConfig::builder()
            .endpoint("http://gpu-box:11434/")
            .build()
            .unwrap();
        assert_eq!(c.endpoint, "http://gpu-box:11434");
    }

    #[test]
    fn endpoint_must_be_http() {
        assert!(ConversionConfig::builder()
            .endpoint("localhost:11434")
            .build()
            .is_err());
    }

    #[test]
    fn concurrency_clamped_to_one() {
        let c = ConversionConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn bad_structure_options_rejected() {
        let opts = StructureOptions {
            heading_size_ratio: 0.8,
            ..Default::default()
        };
        assert!(ConversionConfig::builder().structure(opts).build().is_err());
    }

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(5), vec![0, 1, 2, 3, 4]);
        assert_eq!(PageSelection::Single(3).to_indices(5), vec![2]);
        assert_eq!(PageSelection::Single(6).to_indices(5), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 4).to_indices(5), vec![1, 2, 3]);
        assert_eq!(PageSelection::Range(3, 10).to_indices(4), vec![2, 3]);
        assert_eq!(
            PageSelection::Set(vec![3, 1, 3, 0, 9]).to_indices(5),
            vec![0, 2]
        );
    }
}
