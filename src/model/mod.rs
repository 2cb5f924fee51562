
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::BotError;
use crate::config::Config;

const DEFAULT_TIMEOUT_SECONDS: u64 = 120;

/// Client for an OpenAI-compatible hosted model API: embeddings plus
/// streaming chat completions.
#[derive(Debug, Clone)]
pub struct ModelClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    chat_model: String,
    embedding_model: String,
    embedding_dimension: u32,
    batch_size: usize,
}

/// One conversation turn on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: u32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct ChatStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl ModelClient {
    /// Build a client from config. Fails with a configuration error when
    /// no API key is present in the environment; callers surface this
    /// before any stream starts.
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self, BotError> {
        let api_key = config.api_key().ok_or_else(|| {
            BotError::Config(format!(
                "No model API key configured (set {})",
                crate::config::API_KEY_ENV
            ))
        })?;

        Self::new(&config.model, api_key)
    }

    #[inline]
    pub fn new(model_config: &crate::config::ModelConfig, api_key: String) -> Result<Self, BotError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| BotError::Model(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: model_config.api_base.trim_end_matches('/').to_string(),
            api_key,
            chat_model: model_config.chat_model.clone(),
            embedding_model: model_config.embedding_model.clone(),
            embedding_dimension: model_config.embedding_dimension,
            batch_size: model_config.batch_size as usize,
        })
    }

    #[inline]
    pub fn embedding_dimension(&self) -> usize {
        self.embedding_dimension as usize
    }

    /// Embed a batch of texts, preserving input order. Inputs beyond the
    /// configured batch size are sent in multiple requests.
    #[inline]
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BotError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            embeddings.extend(self.embed_one_batch(batch).await?);
        }
        Ok(embeddings)
    }

    async fn embed_one_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BotError> {
        debug!("Requesting embeddings for {} texts", texts.len());

        let response = self
            .http
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingsRequest {
                model: &self.embedding_model,
                input: texts,
                dimensions: self.embedding_dimension,
            })
            .send()
            .await
            .map_err(|e| BotError::Model(format!("Embeddings request failed: {}", e)))?;

        let response = Self::check_status(response).await?;
        let body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| BotError::Model(format!("Invalid embeddings response: {}", e)))?;

        if body.data.len() != texts.len() {
            return Err(BotError::Model(format!(
                "Embeddings response count mismatch: sent {}, got {}",
                texts.len(),
                body.data.len()
            )));
        }

        let mut data = body.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    /// Embed a single query string.
    #[inline]
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, BotError> {
        let mut embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| BotError::Model("Empty embeddings response".to_string()))
    }

    /// Start a streaming chat completion. The returned stream yields text
    /// deltas in order. Request-level failures (bad key, bad model) are
    /// reported before the stream exists, never mid-stream.
    #[inline]
    pub async fn chat_stream(
        &self,
        messages: Vec<ChatTurn>,
    ) -> Result<impl Stream<Item = Result<String, BotError>> + Send + use<>, BotError> {
        debug!(
            "Starting chat stream with {} messages on {}",
            messages.len(),
            self.chat_model
        );

        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.chat_model,
                messages: &messages,
                stream: true,
            })
            .send()
            .await
            .map_err(|e| BotError::Model(format!("Chat request failed: {}", e)))?;

        let response = Self::check_status(response).await?;

        let deltas = response
            .bytes_stream()
            .scan(Vec::new(), |buffer: &mut Vec<u8>, chunk| {
                let out = match chunk {
                    Ok(bytes) => {
                        buffer.extend_from_slice(&bytes);
                        drain_sse_deltas(buffer)
                    }
                    Err(e) => vec![Err(BotError::Model(format!("Stream error: {}", e)))],
                };
                futures::future::ready(Some(futures::stream::iter(out)))
            })
            .flatten();

        Ok(deltas)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BotError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        Err(BotError::Model(format!(
            "Model API returned {}: {}",
            status, message
        )))
    }
}

/// Pull every complete SSE line out of `buffer` and decode text deltas.
/// Incomplete trailing lines stay buffered, so UTF-8 sequences split
/// across network chunks are never broken.
fn drain_sse_deltas(buffer: &mut Vec<u8>) -> Vec<Result<String, BotError>> {
    let Some(last_newline) = buffer.iter().rposition(|&b| b == b'\n') else {
        return Vec::new();
    };

    let complete: Vec<u8> = buffer.drain(..=last_newline).collect();
    let mut deltas = Vec::new();

    for line in String::from_utf8_lossy(&complete).lines() {
        let line = line.trim();
        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == "[DONE]" {
            continue;
        }

        match serde_json::from_str::<ChatStreamChunk>(payload) {
            Ok(chunk) => {
                if let Some(content) = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                {
                    if !content.is_empty() {
                        deltas.push(Ok(content));
                    }
                }
            }
            Err(e) => warn!("Skipping malformed stream chunk: {}", e),
        }
    }

    deltas
}
