//! Integration tests for plan → rewrite → reassemble.
//!
//! Every test drives [`convert_blocks`] with an in-memory [`RewriteClient`],
//! so no PDF engine or model server is needed.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use chunkmd::{
    convert, convert_blocks, BBox, BoundaryHint, ConversionConfig, ConversionProgressCallback,
    ChunkMdError, ReassemblyWarning, RewriteClient, ServiceError, TextBlock,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test clients ─────────────────────────────────────────────────────────────

/// Returns its input unchanged.
struct Identity;

#[async_trait]
impl RewriteClient for Identity {
    async fn rewrite(&self, text: &str, _instruction: &str) -> Result<String, ServiceError> {
        Ok(text.to_string())
    }
}

/// Identity, but sleeps so that early chunks finish last.
struct ReverseOrder {
    total: usize,
}

#[async_trait]
impl RewriteClient for ReverseOrder {
    async fn rewrite(&self, text: &str, instruction: &str) -> Result<String, ServiceError> {
        let chunk = (1..=self.total)
            .find(|n| instruction.contains(&format!("chunk {n} of")))
            .unwrap_or(1);
        let delay = (self.total + 1 - chunk) as u64 * 8;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(text.to_string())
    }
}

/// Fails every call with the given status and counts the calls.
struct Failing {
    status: u16,
    calls: AtomicUsize,
}

impl Failing {
    fn new(status: u16) -> Self {
        Self {
            status,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RewriteClient for Failing {
    async fn rewrite(&self, _text: &str, _instruction: &str) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ServiceError::Status {
            status: self.status,
            body: "unavailable".into(),
        })
    }
}

/// Fails only for the chunk whose instruction names `chunk {n} of`.
struct FailsOn(usize);

#[async_trait]
impl RewriteClient for FailsOn {
    async fn rewrite(&self, text: &str, instruction: &str) -> Result<String, ServiceError> {
        if instruction.contains(&format!("chunk {} of", self.0)) {
            Err(ServiceError::Transport("connection reset".into()))
        } else {
            Ok(text.to_uppercase())
        }
    }
}

/// Turns `Section N` lines into `## Section N` and, like small models
/// often do, repeats a context heading at the top of the next chunk.
struct EchoesContext;

#[async_trait]
impl RewriteClient for EchoesContext {
    async fn rewrite(&self, text: &str, instruction: &str) -> Result<String, ServiceError> {
        let body: Vec<String> = text
            .lines()
            .map(|l| {
                if l.starts_with("Section ") {
                    format!("## {l}")
                } else {
                    l.to_string()
                }
            })
            .collect();
        let mut out = String::new();
        if instruction.contains("\nSection 5\n") {
            out.push_str("## Section 5\n\n");
        }
        out.push_str(&body.join("\n"));
        Ok(out)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn block(page: usize, text: impl Into<String>) -> TextBlock {
    TextBlock::new(page, BBox::default(), text, 10.0)
}

/// A paragraph of roughly `len` characters that is unique per (page, n).
fn paragraph(page: usize, n: usize, len: usize) -> TextBlock {
    let mut text = format!("Paragraph {n} on page {page}.");
    while text.len() < len {
        text.push_str(" filler");
    }
    text.truncate(len);
    block(page, text.trim_end().to_string())
}

fn config_with(client: Arc<dyn RewriteClient>, max: usize, overlap: usize) -> ConversionConfig {
    ConversionConfig::builder()
        .client(client)
        .max_chunk_chars(max)
        .overlap_chars(overlap)
        .max_retries(1)
        .retry_backoff_ms(1)
        .build()
        .unwrap()
}

fn joined(blocks: &[TextBlock]) -> String {
    let texts: Vec<&str> = blocks.iter().map(|b| b.text.as_str()).collect();
    format!("{}\n", texts.join("\n\n"))
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn small_document_is_one_chunk() {
    let blocks = vec![
        block(0, "A short title"),
        block(0, "Some body text here."),
        block(0, "The end of it."),
    ];
    let total: usize = blocks.iter().map(TextBlock::char_len).sum();
    assert!(total <= 50);

    let output = convert_blocks(blocks.clone(), &config_with(Arc::new(Identity), 1000, 100))
        .await
        .unwrap();

    assert_eq!(output.stats.total_chunks, 1);
    assert_eq!(output.markdown, joined(&blocks));
    assert!(output.warnings.is_empty());
}

#[tokio::test]
async fn page_sections_are_cut_at_page_breaks() {
    let blocks: Vec<TextBlock> = (0..5).map(|p| paragraph(p, 0, 600)).collect();

    let output = convert_blocks(blocks.clone(), &config_with(Arc::new(Identity), 1000, 0))
        .await
        .unwrap();

    assert_eq!(output.stats.total_chunks, 5);
    for (i, result) in output.chunks.iter().enumerate() {
        assert_eq!(result.index, i);
        assert_eq!(result.pages, (i, i));
    }
    assert_eq!(output.stats.forced_chunks, 0);
    assert_eq!(output.markdown, joined(&blocks));
}

#[tokio::test]
async fn oversized_block_becomes_its_own_chunk() {
    let big = "word ".repeat(1000).trim_end().to_string();
    assert!(big.len() > 4000);
    let blocks = vec![block(0, big.clone())];

    let output = convert_blocks(blocks, &config_with(Arc::new(Identity), 1000, 0))
        .await
        .unwrap();

    assert_eq!(output.stats.total_chunks, 1);
    assert_eq!(output.stats.forced_chunks, 1);
    assert_eq!(output.markdown, format!("{big}\n"));
}

#[tokio::test]
async fn echoed_heading_at_seam_appears_once() {
    let blocks = vec![
        block(0, "Opening remarks.\nSection 5"),
        block(1, "Body of section five."),
    ];
    let config = config_with(Arc::new(EchoesContext), 40, 9);

    let output = convert_blocks(blocks, &config).await.unwrap();

    assert_eq!(output.stats.total_chunks, 2);
    assert_eq!(output.markdown.matches("Section 5").count(), 1);
    assert_eq!(
        output.markdown,
        "Opening remarks.\n\n## Section 5\n\nBody of section five.\n"
    );
    assert!(output.warnings.is_empty());
}

// ── Properties on realistic input ────────────────────────────────────────────

#[tokio::test]
async fn identity_rewrite_reproduces_the_text() {
    let blocks: Vec<TextBlock> = (0..4)
        .flat_map(|p| (0..3).map(move |n| paragraph(p, n, 180 + 40 * n)))
        .collect();

    let output = convert_blocks(blocks.clone(), &config_with(Arc::new(Identity), 700, 120))
        .await
        .unwrap();

    assert!(output.stats.total_chunks > 1);
    assert_eq!(output.markdown, joined(&blocks));
    assert!(output.warnings.is_empty());
    assert_eq!(output.stats.rewritten_chunks, output.stats.total_chunks);
}

#[tokio::test]
async fn repeated_line_across_a_seam_is_kept() {
    let blocks = vec![
        block(0, "see the table below for details"),
        block(1, "see the table below for details"),
        block(2, "final words here"),
    ];

    let output = convert_blocks(blocks.clone(), &config_with(Arc::new(Identity), 40, 35))
        .await
        .unwrap();

    assert_eq!(output.stats.total_chunks, 3);
    assert_eq!(output.markdown.matches("see the table below").count(), 2);
    assert_eq!(output.markdown, joined(&blocks));
    assert!(output.warnings.is_empty());
}

#[tokio::test]
async fn document_line_that_reads_like_a_preamble_is_kept() {
    let blocks = vec![block(0, "Here is the procedure we followed:\nmix the samples")];

    let output = convert_blocks(blocks.clone(), &config_with(Arc::new(Identity), 1000, 0))
        .await
        .unwrap();

    assert_eq!(output.markdown, joined(&blocks));
    assert!(output.warnings.is_empty());
}

#[tokio::test]
async fn completion_order_does_not_change_output() {
    let blocks: Vec<TextBlock> = (0..6).map(|p| paragraph(p, 0, 300)).collect();

    let sequential = ConversionConfig::builder()
        .client(Arc::new(Identity))
        .max_chunk_chars(400)
        .overlap_chars(0)
        .concurrency(1)
        .build()
        .unwrap();
    let shuffled = ConversionConfig::builder()
        .client(Arc::new(ReverseOrder { total: 6 }))
        .max_chunk_chars(400)
        .overlap_chars(0)
        .concurrency(6)
        .build()
        .unwrap();

    let a = convert_blocks(blocks.clone(), &sequential).await.unwrap();
    let b = convert_blocks(blocks, &shuffled).await.unwrap();

    assert_eq!(a.markdown, b.markdown);
    let indices: Vec<usize> = b.chunks.iter().map(|c| c.index).collect();
    assert_eq!(indices, (0..6).collect::<Vec<_>>());
}

// ── Failure handling ─────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_chunks_pass_through_original_text() {
    let blocks = vec![paragraph(0, 0, 200), paragraph(1, 0, 200)];
    let client = Arc::new(Failing::new(503));

    let output = convert_blocks(blocks.clone(), &config_with(client.clone(), 300, 0))
        .await
        .unwrap();

    // One try plus one retry per chunk.
    assert_eq!(client.calls.load(Ordering::SeqCst), 4);
    assert_eq!(output.stats.failed_chunks, 2);
    assert_eq!(output.stats.rewritten_chunks, 0);
    for b in &blocks {
        assert!(output.markdown.contains(&b.text));
    }
    assert!(output.markdown.contains("chunk 0 passed through unmodified"));
    assert_eq!(
        output.warnings,
        vec![
            ReassemblyWarning::PassThrough { index: 0 },
            ReassemblyWarning::PassThrough { index: 1 },
        ]
    );

    let err = output.into_result().unwrap_err();
    assert!(matches!(
        err,
        ChunkMdError::PartialFailure {
            rewritten: 0,
            failed: 2,
            total: 2
        }
    ));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let client = Arc::new(Failing::new(404));
    let config = ConversionConfig::builder()
        .client(client.clone())
        .max_retries(5)
        .retry_backoff_ms(1)
        .build()
        .unwrap();

    let output = convert_blocks(vec![block(0, "Only chunk.")], &config).await.unwrap();

    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    assert_eq!(output.chunks[0].retries, 0);
    assert!(output.chunks[0].error.is_some());
}

#[tokio::test]
async fn one_failure_leaves_the_rest_rewritten() {
    let blocks: Vec<TextBlock> = (0..3).map(|p| paragraph(p, 0, 150)).collect();

    let output = convert_blocks(blocks.clone(), &config_with(Arc::new(FailsOn(2)), 200, 0))
        .await
        .unwrap();

    assert_eq!(output.stats.rewritten_chunks, 2);
    assert_eq!(output.failed_chunks().map(|c| c.index).collect::<Vec<_>>(), vec![1]);
    assert!(output.markdown.contains(&blocks[0].text.to_uppercase()));
    assert!(output.markdown.contains(&blocks[1].text));
    assert!(output.markdown.contains(&blocks[2].text.to_uppercase()));
    assert!(output.into_result().is_err());
}

#[tokio::test]
async fn empty_input_gives_empty_document() {
    let output = convert_blocks(Vec::new(), &config_with(Arc::new(Identity), 100, 0))
        .await
        .unwrap();
    assert_eq!(output.markdown, "");
    assert_eq!(output.stats.total_chunks, 0);
    assert!(output.into_result().is_ok());
}

#[tokio::test]
async fn missing_pdf_fails_before_any_work() {
    let config = config_with(Arc::new(Identity), 100, 0);
    let err = convert("/no/such/document.pdf", &config).await.unwrap_err();
    assert!(matches!(err, ChunkMdError::FileNotFound { .. }));
}

// ── Progress events ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl ConversionProgressCallback for Recorder {
    fn on_conversion_start(&self, total: usize) {
        self.events.lock().unwrap().push(format!("start {total}"));
    }
    fn on_chunk_complete(&self, index: usize, _total: usize, _len: usize) {
        self.events.lock().unwrap().push(format!("ok {index}"));
    }
    fn on_chunk_error(&self, index: usize, _total: usize, _error: &str) {
        self.events.lock().unwrap().push(format!("err {index}"));
    }
    fn on_conversion_complete(&self, total: usize, rewritten: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("done {rewritten}/{total}"));
    }
}

#[tokio::test]
async fn progress_events_bracket_the_run() {
    let recorder = Arc::new(Recorder::default());
    let config = ConversionConfig::builder()
        .client(Arc::new(FailsOn(1)))
        .max_chunk_chars(200)
        .overlap_chars(0)
        .concurrency(1)
        .max_retries(0)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let blocks: Vec<TextBlock> = (0..2).map(|p| paragraph(p, 0, 150)).collect();

    convert_blocks(blocks, &config).await.unwrap();

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(events, vec!["start 2", "err 0", "ok 1", "done 1/2"]);
}

#[tokio::test]
async fn chunk_boundaries_are_reported() {
    let blocks: Vec<TextBlock> = (0..2).map(|p| paragraph(p, 0, 600)).collect();
    let config = config_with(Arc::new(Identity), 1000, 0);
    let planned = chunkmd::plan(&blocks, config.max_chunk_chars, config.overlap_chars);
    assert_eq!(planned[0].boundary_hint, BoundaryHint::PageBreak);
    assert_eq!(planned[1].boundary_hint, BoundaryHint::EndOfInput);
}
