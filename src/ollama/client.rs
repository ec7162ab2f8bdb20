//! Ollama API client for LLM inference

use std::pin::Pin;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::BackendConfig;
use crate::reasoning::{BackendError, DecodingConfig, ReasoningBackend, ReasoningRequest};

/// Default Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default model for code repair
pub const DEFAULT_MODEL: &str = "qwen2.5-coder:7b";

/// Represents a single item from the streaming response.
///
/// Either a token fragment or, on the last line, the final metadata.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// A token fragment from the model's response
    Token(String),
    /// The final message containing timing/count metadata
    Done(GenerateResponse),
}

/// Response from Ollama's generate endpoint with metadata
#[derive(Debug, Clone, Default)]
pub struct GenerateResponse {
    /// The generated text
    pub response: String,
    /// Number of tokens generated
    pub eval_count: u32,
    /// Number of tokens in the prompt
    pub prompt_eval_count: u32,
    /// Time spent generating tokens (nanoseconds)
    pub eval_duration_ns: u64,
}

type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, BackendError>> + Send>>;

/// Client for interacting with Ollama's HTTP API
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new Ollama client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the Ollama server (e.g., "http://localhost:11434")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Build a client from the `[backend]` config section
    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Request body for `/api/generate`
    pub fn request_body(&self, prompt: &str, decoding: &DecodingConfig, stream: bool) -> Value {
        let mut options = json!({ "temperature": decoding.temperature });
        if let Some(num_ctx) = decoding.num_ctx {
            options["num_ctx"] = json!(num_ctx);
        }

        let mut body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": stream,
            "options": options,
        });
        match (&decoding.schema, decoding.json_mode) {
            (Some(schema), _) => body["format"] = schema.clone(),
            (None, true) => body["format"] = json!("json"),
            (None, false) => {}
        }
        body
    }

    /// Generate a streaming response from Ollama
    ///
    /// Ollama streams newline-delimited JSON. Network chunks do not line up
    /// with lines, so bytes are buffered until a full line is available.
    pub async fn generate_stream(
        &self,
        prompt: &str,
        decoding: &DecodingConfig,
        trace_id: Option<&str>,
    ) -> Result<ChunkStream, BackendError> {
        let endpoint = format!("{}/api/generate", self.base_url);

        let mut request = self.client.post(&endpoint).json(&self.request_body(prompt, decoding, true));
        if let Some(tid) = trace_id {
            request = request.header("X-Trace-Id", tid);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes_stream = Box::pin(response.bytes_stream());
        let lines = stream::unfold(
            (bytes_stream, Vec::<u8>::new(), false),
            |(mut bytes_stream, mut buffer, mut finished)| async move {
                loop {
                    if let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        return Some((Ok(line), (bytes_stream, buffer, finished)));
                    }
                    if finished {
                        if buffer.is_empty() {
                            return None;
                        }
                        let rest = std::mem::take(&mut buffer);
                        return Some((Ok(rest), (bytes_stream, buffer, true)));
                    }
                    match bytes_stream.next().await {
                        Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                        Some(Err(e)) => return Some((Err(BackendError::from(e)), (bytes_stream, buffer, true))),
                        None => finished = true,
                    }
                }
            },
        );

        let chunks = lines.filter_map(|line| async move {
            match line {
                Ok(line) => parse_stream_line(&line).transpose(),
                Err(e) => Some(Err(e)),
            }
        });

        Ok(Box::pin(chunks))
    }

    /// Generate a complete response by draining the stream
    ///
    /// # Returns
    /// GenerateResponse with the accumulated text and token/timing metadata
    pub async fn generate(
        &self,
        prompt: &str,
        decoding: &DecodingConfig,
        trace_id: Option<&str>,
    ) -> Result<GenerateResponse, BackendError> {
        let mut stream = self.generate_stream(prompt, decoding, trace_id).await?;
        let mut text = String::new();
        let mut done = None;

        while let Some(chunk) = stream.next().await {
            match chunk? {
                StreamChunk::Token(token) => text.push_str(&token),
                StreamChunk::Done(meta) => {
                    text.push_str(&meta.response);
                    done = Some(meta);
                    break;
                }
            }
        }

        let mut response = done.unwrap_or_default();
        response.response = text;
        Ok(response)
    }
}

/// Parse one NDJSON line from `/api/generate`
///
/// Blank lines yield `None`.
pub fn parse_stream_line(line: &[u8]) -> Result<Option<StreamChunk>, BackendError> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let data: Value = serde_json::from_slice(trimmed)?;
    if let Some(err) = data["error"].as_str() {
        return Err(BackendError::Unavailable(err.to_string()));
    }

    let token = data["response"].as_str().unwrap_or("").to_string();
    if data["done"].as_bool() == Some(true) {
        return Ok(Some(StreamChunk::Done(GenerateResponse {
            response: token,
            eval_count: data["eval_count"].as_u64().unwrap_or(0) as u32,
            prompt_eval_count: data["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
            eval_duration_ns: data["eval_duration"].as_u64().unwrap_or(0),
        })));
    }
    Ok(Some(StreamChunk::Token(token)))
}

#[async_trait]
impl ReasoningBackend for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ReasoningRequest) -> Result<String, BackendError> {
        let start = Instant::now();
        let response = self.generate(&request.prompt, &request.decoding, None).await?;
        let elapsed = start.elapsed().as_secs_f64();

        info!(
            model = %self.model,
            eval_count = response.eval_count,
            prompt_eval_count = response.prompt_eval_count,
            duration_secs = elapsed,
            "Backend call complete"
        );

        if response.response.trim().is_empty() {
            return Err(BackendError::EmptyResponse);
        }
        debug!(response = %response.response, "Raw backend response");
        Ok(response.response)
    }
}
