//! CLI binary for chunkmd.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and writes the result.

use anyhow::{Context, Result};
use chunkmd::pipeline::input::default_output_path;
use chunkmd::{
    convert, inspect, write_atomic, ConversionConfig, ConversionOutput,
    ConversionProgressCallback, PageSelection, PlanSummary, ProgressCallback,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per chunk. Chunks complete out of
/// order when `--concurrency > 1`.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-chunk wall-clock start times.
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_conversion_start` tells us the chunk count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Extracting text…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} chunks  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Rewriting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_chunks: usize) {
        self.activate_bar(total_chunks);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Rewriting {total_chunks} chunks…"))
        ));
    }

    fn on_chunk_start(&self, index: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(format!("chunk {}", index + 1));
    }

    fn on_chunk_complete(&self, index: usize, total: usize, markdown_len: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            index + 1,
            total,
            dim(&format!("{markdown_len:>6} bytes")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_error(&self, index: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}  {}",
            red("✗"),
            index + 1,
            total,
            red(&format!("passed through: {msg}")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_chunks: usize, rewritten: usize) {
        let failed = total_chunks.saturating_sub(rewritten);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} chunks rewritten",
                green("✔"),
                bold(&rewritten.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} chunks rewritten  ({} passed through)",
                if failed == total_chunks { red("✘") } else { cyan("⚠") },
                bold(&rewritten.to_string()),
                total_chunks,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert next to the input (writes document.md)
  chunkmd document.pdf

  # Choose the output file, or '-' for stdout
  chunkmd document.pdf -o notes.md
  chunkmd document.pdf -o - | less

  # Smaller chunks for a small model, more context between them
  chunkmd --max-chunk-chars 4000 --overlap 400 paper.pdf

  # Another Ollama model / server
  chunkmd --model llama3.2 --endpoint http://gpu-box:11434 report.pdf

  # A hosted provider via edgequake-llm (reads OPENAI_API_KEY)
  chunkmd --provider openai --model gpt-4.1-nano report.pdf

  # See where chunks would be cut, without calling a model
  chunkmd --plan-only document.pdf

  # Fail (exit 1) if any chunk had to be passed through
  chunkmd --strict document.pdf

ENVIRONMENT VARIABLES:
  OLLAMA_HOST             Ollama server (used when --endpoint is not set)
  CHUNKMD_*               Any flag, e.g. CHUNKMD_MODEL, CHUNKMD_CONCURRENCY
  EDGEQUAKE_LLM_PROVIDER  Provider when --provider is not set (with EDGEQUAKE_MODEL)
  OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY
                          Keys for hosted providers
  PDFIUM_LIB_PATH         Path to an existing libpdfium (skips auto-download)
  RUST_LOG                Log filter, e.g. RUST_LOG=chunkmd=debug

SETUP:
  1. Start Ollama and pull the model:   ollama pull gemma3:4b
  2. Convert:                           chunkmd document.pdf

  PDFium (~30 MB) is downloaded automatically on first run and cached.
"#;

/// Convert PDF files to Markdown with a local language model.
#[derive(Parser, Debug)]
#[command(
    name = "chunkmd",
    version,
    about = "Convert PDF files to Markdown with a local language model",
    long_about = "Extract the text layer of a PDF, split it into model-sized chunks at \
structural boundaries (pages, headings, paragraphs), rewrite each chunk into Markdown with \
a local Ollama model or any edgequake-llm provider, and reassemble one clean document.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path.
    input: PathBuf,

    /// Output file; '-' for stdout. Default: the input path with a .md extension.
    #[arg(short, long, env = "CHUNKMD_OUTPUT")]
    output: Option<PathBuf>,

    /// Character budget per chunk.
    #[arg(long, env = "CHUNKMD_MAX_CHUNK_CHARS", default_value_t = 8000)]
    max_chunk_chars: usize,

    /// Characters of the previous chunk sent along as context (0 = none).
    #[arg(long, env = "CHUNKMD_OVERLAP", default_value_t = 200)]
    overlap: usize,

    /// Ollama base URL. Falls back to OLLAMA_HOST, then http://localhost:11434.
    #[arg(long, env = "CHUNKMD_ENDPOINT")]
    endpoint: Option<String>,

    /// Model name (Ollama default: gemma3:4b).
    #[arg(long, env = "CHUNKMD_MODEL")]
    model: Option<String>,

    /// edgequake-llm provider instead of Ollama: openai, anthropic, gemini, …
    #[arg(long, env = "CHUNKMD_PROVIDER")]
    provider: Option<String>,

    /// Text file with a custom instruction ({chunk}, {total}, {pages} are filled in).
    #[arg(long, env = "CHUNKMD_INSTRUCTION")]
    instruction: Option<PathBuf>,

    /// Concurrent model calls.
    #[arg(short, long, env = "CHUNKMD_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Retries per chunk before it is passed through.
    #[arg(long, env = "CHUNKMD_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "CHUNKMD_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max output tokens per chunk.
    #[arg(long, env = "CHUNKMD_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Per-call timeout in seconds.
    #[arg(long, env = "CHUNKMD_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "CHUNKMD_PAGES", default_value = "all")]
    pages: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "CHUNKMD_PASSWORD")]
    password: Option<String>,

    /// Extract and plan only; print the chunk plan.
    #[arg(long, env = "CHUNKMD_PLAN_ONLY")]
    plan_only: bool,

    /// Print structured JSON (ConversionOutput or PlanSummary) to stdout.
    #[arg(long, env = "CHUNKMD_JSON")]
    json: bool,

    /// Exit non-zero when any chunk was passed through.
    #[arg(long, env = "CHUNKMD_STRICT")]
    strict: bool,

    /// Disable progress bar.
    #[arg(long, env = "CHUNKMD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CHUNKMD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "CHUNKMD_QUIET")]
    quiet: bool,
}

/// Where the Markdown goes.
#[derive(Debug, Clone, PartialEq)]
enum Destination {
    Stdout,
    File(PathBuf),
    /// `--json` without `-o`: only the JSON is printed.
    None,
}

impl Cli {
    fn destination(&self) -> Destination {
        match &self.output {
            Some(p) if p.as_os_str() == "-" => Destination::Stdout,
            Some(p) => Destination::File(p.clone()),
            None if self.json => Destination::None,
            None => Destination::File(default_output_path(&self.input)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let destination = cli.destination();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; -v brings them back.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.plan_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Ensure PDFium engine is available ───────────────────────────────
    // First run downloads the library once; later runs only check the cache.
    ensure_pdfium(cli.quiet)?;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Plan-only mode ───────────────────────────────────────────────────
    if cli.plan_only {
        let summary = inspect(&cli.input, &config)
            .await
            .context("Failed to plan PDF")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("Failed to serialise plan")?
            );
        } else {
            print_plan(&cli.input, &summary);
        }
        return Ok(());
    }

    // ── Run conversion ───────────────────────────────────────────────────
    let output = convert(&cli.input, &config)
        .await
        .context("Conversion failed")?;

    match &destination {
        Destination::File(path) => {
            write_atomic(path, &output.markdown)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        Destination::Stdout => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(output.markdown.as_bytes())
                .context("Failed to write to stdout")?;
        }
        Destination::None => {}
    }

    if cli.json && destination != Destination::Stdout {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    }

    if !cli.quiet {
        print_summary(&output, &destination);
    }

    if cli.strict {
        output
            .into_result()
            .context("Strict mode: some chunks were not rewritten")?;
    }
    Ok(())
}

fn ensure_pdfium(quiet: bool) -> Result<()> {
    if pdfium_auto::is_pdfium_cached() {
        return Ok(());
    }
    if quiet {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    dl_bar.set_prefix("PDF engine");
    dl_bar.set_message("Connecting…");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    tokio::task::block_in_place(|| {
        pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
            if let Some(t) = total {
                if bar.length().unwrap_or(0) != t {
                    bar.set_length(t);
                }
            }
            bar.set_position(downloaded);
        }))
    })
    .context("Failed to download PDFium engine")?;

    dl_bar.finish_with_message("ready ✓");
    Ok(())
}

fn print_summary(output: &ConversionOutput, destination: &Destination) {
    let stats = &output.stats;
    let target = match destination {
        Destination::File(p) => p.display().to_string(),
        Destination::Stdout => "stdout".to_string(),
        Destination::None => "json".to_string(),
    };
    eprintln!(
        "{}  {}/{} chunks  {}ms  →  {}",
        if stats.failed_chunks == 0 { green("✔") } else { cyan("⚠") },
        stats.rewritten_chunks,
        stats.total_chunks,
        stats.total_duration_ms,
        bold(&target),
    );
    eprintln!(
        "   {} chars in  /  {} chars out",
        dim(&stats.input_chars.to_string()),
        dim(&stats.output_chars.to_string()),
    );
    for warning in &output.warnings {
        eprintln!("   {} {}", cyan("⚠"), warning);
    }
}

fn print_plan(input: &Path, summary: &PlanSummary) {
    println!("File:         {}", input.display());
    println!("Blocks:       {}", summary.total_blocks);
    println!("Characters:   {}", summary.total_chars);
    println!("Body font:    {:.1}pt", summary.body_font_size);
    println!(
        "Chunks:       {} (budget {}, overlap {})",
        summary.chunks.len(),
        summary.max_chunk_chars,
        summary.overlap_chars
    );
    println!();
    for chunk in &summary.chunks {
        let (first, last) = chunk.pages;
        let pages = if first == last {
            format!("p{}", first + 1)
        } else {
            format!("p{}-{}", first + 1, last + 1)
        };
        let heading = chunk.headings.first().map(String::as_str).unwrap_or("");
        println!(
            "  #{:<4} {:<9} {:>4} blocks {:>7} chars  {:<10}{}  {}",
            chunk.index,
            pages,
            chunk.blocks,
            chunk.chars,
            format!("{:?}", chunk.boundary),
            if chunk.forced_overflow { " overflow" } else { "" },
            dim(heading),
        );
    }
}

/// Map CLI args to `ConversionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let instruction = if let Some(ref path) = cli.instruction {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read instruction from {:?}", path))?,
        )
    } else {
        None
    };

    let pages = parse_pages(&cli.pages)?;
    let endpoint = cli
        .endpoint
        .clone()
        .or_else(|| std::env::var("OLLAMA_HOST").ok().filter(|h| !h.is_empty()))
        .map(|h| normalise_endpoint(&h));

    let mut builder = ConversionConfig::builder()
        .max_chunk_chars(cli.max_chunk_chars)
        .overlap_chars(cli.overlap)
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout)
        .pages(pages);

    if let Some(endpoint) = endpoint {
        builder = builder.endpoint(endpoint);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(template) = instruction {
        builder = builder.instruction(template);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// `OLLAMA_HOST` is often given as `host:port` without a scheme.
fn normalise_endpoint(host: &str) -> String {
    let host = host.trim();
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }
        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }
        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}
