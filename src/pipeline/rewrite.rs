//! Rewrite stage: send one chunk to the text-completion service.
//!
//! This is the only stage with network I/O. [`RewriteClient`] is the seam:
//! [`OllamaClient`] talks to a local Ollama server (the default),
//! [`ProviderClient`] adapts any `edgequake-llm` provider, and tests plug in
//! in-memory fakes.
//!
//! ## Retry Strategy
//!
//! Transient failures (transport errors, 5xx, 408/429, timeouts) are retried
//! with exponential backoff `retry_backoff_ms * 2^(attempt-1)`: with 500 ms
//! base and 3 retries the waits are 500 ms → 1 s → 2 s. A single wait never
//! exceeds [`MAX_BACKOFF_MS`]. Other 4xx statuses will not change on retry
//! and stop the loop early.
//!
//! A chunk that still fails is passed through: its [`ChunkResult`] carries
//! the original text and a [`ChunkError`], and the run continues.

use crate::config::ConversionConfig;
use crate::error::{ChunkError, ChunkMdError, ServiceError};
use crate::output::ChunkResult;
use crate::pipeline::plan::Chunk;
use crate::pipeline::postprocess;
use crate::prompts::{render_instruction, DEFAULT_INSTRUCTION};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Upper bound for one backoff wait.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// A text-completion service that rewrites one chunk.
#[async_trait]
pub trait RewriteClient: Send + Sync {
    /// Rewrite `text` following `instruction`. Returns the model output
    /// verbatim; cleanup happens in the caller.
    async fn rewrite(&self, text: &str, instruction: &str) -> Result<String, ServiceError>;

    /// Short label for logs.
    fn name(&self) -> String {
        "custom".to_string()
    }
}

// ── Ollama ───────────────────────────────────────────────────────────────

/// Client for Ollama's `/api/generate` endpoint.
pub struct OllamaClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl OllamaClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.1,
            max_tokens: 4096,
        }
    }

    pub fn from_config(config: &ConversionConfig) -> Self {
        let mut client = Self::new(config.endpoint.clone(), config.ollama_model());
        client.temperature = config.temperature;
        client.max_tokens = config.max_tokens;
        client
    }

    fn request_body(&self, text: &str, instruction: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "system": instruction,
            "prompt": text,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        })
    }
}

impl fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OllamaClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

#[async_trait]
impl RewriteClient for OllamaClient {
    async fn rewrite(&self, text: &str, instruction: &str) -> Result<String, ServiceError> {
        let url = format!("{}/api/generate", self.endpoint);
        debug!("Ollama request to {} ({} chars)", url, text.chars().count());

        let response = self
            .client
            .post(&url)
            .json(&self.request_body(text, instruction))
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status { status, body });
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::MalformedResponse(e.to_string()))?;
        parse_generate_response(&value)
    }

    fn name(&self) -> String {
        format!("ollama/{}", self.model)
    }
}

fn parse_generate_response(value: &serde_json::Value) -> Result<String, ServiceError> {
    if let Some(err) = value["error"].as_str() {
        return Err(ServiceError::Provider(err.to_string()));
    }
    value["response"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ServiceError::MalformedResponse("missing 'response' field".into()))
}

// ── edgequake-llm providers ──────────────────────────────────────────────

/// Adapts an `edgequake-llm` chat provider (OpenAI, Anthropic, Gemini, …).
pub struct ProviderClient {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ConversionConfig) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(config.temperature),
                max_tokens: Some(config.max_tokens),
                ..Default::default()
            },
        }
    }
}

impl fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderClient")
            .field("provider", &self.provider.name())
            .finish()
    }
}

#[async_trait]
impl RewriteClient for ProviderClient {
    async fn rewrite(&self, text: &str, instruction: &str) -> Result<String, ServiceError> {
        let messages = vec![ChatMessage::system(instruction), ChatMessage::user(text)];
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| ServiceError::Provider(e.to_string()))?;
        debug!(
            "{}: {} input tokens, {} output tokens",
            self.provider.name(),
            response.prompt_tokens,
            response.completion_tokens
        );
        Ok(response.content)
    }

    fn name(&self) -> String {
        self.provider.name().to_string()
    }
}

/// Pick the rewrite client, from most to least specific:
///
/// 1. a pre-built `config.client`;
/// 2. a named `edgequake-llm` provider (`config.provider_name`), which reads
///    its API key from the environment;
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set;
/// 4. Ollama at `config.endpoint`.
pub fn resolve_client(config: &ConversionConfig) -> Result<Arc<dyn RewriteClient>, ChunkMdError> {
    if let Some(ref client) = config.client {
        return Ok(Arc::clone(client));
    }

    let named = config.provider_name.clone().map(|name| {
        let model = config.model.clone().unwrap_or_default();
        (name, model)
    });
    let from_env = || match (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        (Ok(p), Ok(m)) if !p.is_empty() && !m.is_empty() => Some((p, m)),
        _ => None,
    };

    if let Some((name, model)) = named.or_else(from_env) {
        if name != "ollama" {
            let provider = ProviderFactory::create_llm_provider(&name, &model).map_err(|e| {
                ChunkMdError::ProviderNotConfigured {
                    provider: name.clone(),
                    hint: format!("{e}"),
                }
            })?;
            info!("Rewriting with provider '{}' (model '{}')", name, model);
            return Ok(Arc::new(ProviderClient::new(provider, config)));
        }
    }

    let client = OllamaClient::from_config(config);
    info!("Rewriting with Ollama at {} (model '{}')", config.endpoint, config.ollama_model());
    Ok(Arc::new(client))
}

// ── Per-chunk driver ─────────────────────────────────────────────────────

/// Rewrite one chunk with retry, timeout and cleanup.
///
/// Never returns an error: on failure the result holds the chunk's own text
/// and `error` is set, so one bad chunk doesn't abort the document.
pub async fn process_chunk(
    client: &Arc<dyn RewriteClient>,
    chunk: &Chunk,
    total_chunks: usize,
    config: &ConversionConfig,
) -> ChunkResult {
    let start = Instant::now();
    let text = chunk.text();
    let pages = chunk.page_span();

    if text.trim().is_empty() {
        return ChunkResult {
            index: chunk.index,
            pages,
            markdown: String::new(),
            duration_ms: 0,
            retries: 0,
            error: None,
        };
    }

    let template = config.instruction.as_deref().unwrap_or(DEFAULT_INSTRUCTION);
    let instruction = render_instruction(
        template,
        chunk.index,
        total_chunks,
        pages,
        chunk.context.as_deref(),
    );
    let limit = Duration::from_secs(config.api_timeout_secs);

    let mut last_err: Option<ServiceError> = None;
    let mut attempts = 0u32;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = backoff_delay(config.retry_backoff_ms, attempt);
            warn!(
                "Chunk {}: retry {}/{} after {:?}",
                chunk.index, attempt, config.max_retries, backoff
            );
            sleep(backoff).await;
        }
        attempts = attempt;

        let outcome = match timeout(limit, client.rewrite(&text, &instruction)).await {
            Err(_) => Err(ServiceError::Timeout {
                secs: config.api_timeout_secs,
            }),
            Ok(Ok(out)) if out.trim().is_empty() => Err(ServiceError::EmptyResponse),
            Ok(other) => other,
        };

        match outcome {
            Ok(raw) => {
                let markdown = postprocess::clean_markdown(&raw, &text);
                let duration = start.elapsed();
                debug!(
                    "Chunk {}: {} → {} chars in {:?}",
                    chunk.index,
                    chunk.char_count,
                    markdown.chars().count(),
                    duration
                );
                return ChunkResult {
                    index: chunk.index,
                    pages,
                    markdown,
                    duration_ms: duration.as_millis() as u64,
                    retries: attempt,
                    error: None,
                };
            }
            Err(e) => {
                warn!("Chunk {}: attempt {} failed: {}", chunk.index, attempt + 1, e);
                let retryable = e.is_retryable();
                last_err = Some(e);
                if !retryable {
                    break;
                }
            }
        }
    }

    let detail = last_err
        .map(|e| e.to_string())
        .unwrap_or_else(|| "Unknown error".to_string());
    warn!("Chunk {}: passing original text through ({})", chunk.index, detail);

    ChunkResult {
        index: chunk.index,
        pages,
        markdown: text,
        duration_ms: start.elapsed().as_millis() as u64,
        retries: attempts,
        error: Some(ChunkError::RewriteFailed {
            index: chunk.index,
            retries: attempts,
            detail,
        }),
    }
}

/// Wait before retry number `attempt` (1-based), saturating at
/// [`MAX_BACKOFF_MS`].
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BBox, TextBlock};
    use crate::pipeline::plan::plan;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<Result<String, ServiceError>>>,
        calls: AtomicU32,
        last_instruction: Mutex<String>,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<String, ServiceError>>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: AtomicU32::new(0),
                last_instruction: Mutex::new(String::new()),
            })
        }
    }

    #[async_trait]
    impl RewriteClient for Scripted {
        async fn rewrite(&self, _text: &str, instruction: &str) -> Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_instruction.lock().unwrap() = instruction.to_string();
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(ServiceError::Transport("script exhausted".into())))
        }
    }

    fn one_chunk() -> Chunk {
        let blocks = vec![TextBlock::new(0, BBox::default(), "Some extracted text", 10.0)];
        plan(&blocks, 1000, 0).remove(0)
    }

    fn fast_config() -> ConversionConfig {
        ConversionConfig::builder()
            .max_retries(2)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn success_is_cleaned() {
        let fake = Scripted::new(vec![Ok("```markdown\n# Title\n```".into())]);
        let client: Arc<dyn RewriteClient> = fake.clone();
        let result = process_chunk(&client, &one_chunk(), 1, &fast_config()).await;
        assert!(result.error.is_none());
        assert_eq!(result.markdown, "# Title");
        assert_eq!(result.retries, 0);
        assert!(fake.last_instruction.lock().unwrap().contains("chunk 1 of 1 from page 1"));
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let fake = Scripted::new(vec![
            Err(ServiceError::Status { status: 503, body: "busy".into() }),
            Ok("Some extracted text".into()),
        ]);
        let client: Arc<dyn RewriteClient> = fake.clone();
        let result = process_chunk(&client, &one_chunk(), 1, &fast_config()).await;
        assert!(result.error.is_none());
        assert_eq!(result.retries, 1);
        assert_eq!(fake.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_pass_text_through() {
        let fake = Scripted::new(vec![]);
        let client: Arc<dyn RewriteClient> = fake.clone();
        let result = process_chunk(&client, &one_chunk(), 1, &fast_config()).await;
        assert_eq!(result.markdown, "Some extracted text");
        assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result.error,
            Some(ChunkError::RewriteFailed { index: 0, retries: 2, .. })
        ));
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let fake = Scripted::new(vec![Err(ServiceError::Status {
            status: 404,
            body: "model not found".into(),
        })]);
        let client: Arc<dyn RewriteClient> = fake.clone();
        let result = process_chunk(&client, &one_chunk(), 1, &fast_config()).await;
        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn empty_completion_counts_as_failure() {
        let fake = Scripted::new(vec![Ok("   ".into()), Ok("ok".into())]);
        let client: Arc<dyn RewriteClient> = fake.clone();
        let result = process_chunk(&client, &one_chunk(), 1, &fast_config()).await;
        assert_eq!(result.markdown, "ok");
        assert_eq!(result.retries, 1);
    }

    #[test]
    fn backoff_doubles_then_saturates() {
        assert_eq!(backoff_delay(500, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(500, 3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(500, 20), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff_delay(500, 65), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff_delay(u64::MAX, u32::MAX), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff_delay(0, 100), Duration::ZERO);
    }

    #[test]
    fn generate_response_parsing() {
        let ok = json!({"model": "gemma3:4b", "response": "# Hi", "done": true});
        assert_eq!(parse_generate_response(&ok).unwrap(), "# Hi");

        let err = json!({"error": "model 'x' not found"});
        assert!(matches!(parse_generate_response(&err), Err(ServiceError::Provider(_))));

        let odd = json!({"done": true});
        assert!(matches!(
            parse_generate_response(&odd),
            Err(ServiceError::MalformedResponse(_))
        ));
    }

    #[test]
    fn ollama_body_carries_instruction_as_system() {
        let client = OllamaClient::new("http://localhost:11434/", "gemma3:4b");
        assert_eq!(client.endpoint, "http://localhost:11434");
        let body = client.request_body("text", "do it");
        assert_eq!(body["system"], "do it");
        assert_eq!(body["prompt"], "text");
        assert_eq!(body["stream"], false);
        assert_eq!(body["model"], "gemma3:4b");
    }

    #[test]
    fn resolve_prefers_injected_client() {
        let fake: Arc<dyn RewriteClient> = Scripted::new(vec![]);
        let config = ConversionConfig::builder().client(fake).build().unwrap();
        let resolved = resolve_client(&config).unwrap();
        assert_eq!(resolved.name(), "custom");
    }
}
