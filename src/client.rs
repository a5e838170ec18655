//! HTTP client for the Anthropic Messages API.
//!
//! Only the streaming endpoint is used: the request is sent once (with
//! retries for transient failures before any byte is streamed), then the
//! `text/event-stream` body is decoded into [`StreamEvent`] values.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};

use crate::config::{Config, RetryPolicy};
use crate::llm_client::{LlmClient, LlmError, StreamEventBox};
use crate::logging;
use crate::models::{ApiErrorBody, ApiErrorEnvelope, MessageRequest, StreamEvent};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT_SECS: u64 = 10;

// === Types ===

/// Client for the Anthropic streaming Messages API.
#[derive(Clone)]
#[must_use]
pub struct AnthropicClient {
    http_client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

// === AnthropicClient ===

impl AnthropicClient {
    /// Create a client from service configuration. Fails when the API key is missing.
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.anthropic_api_key()?;
        let base_url = config.anthropic_base_url();
        let retry = config.retry.clone();

        logging::info(format!("Anthropic base URL: {base_url}"));
        logging::info(format!(
            "Retry policy: enabled={}, max_retries={}, initial_delay={}s, max_delay={}s",
            retry.enabled, retry.max_retries, retry.initial_delay, retry.max_delay
        ));

        Self::with_parts(&api_key, base_url, retry)
    }

    /// Create a client from explicit parts.
    pub fn with_parts(
        api_key: &str,
        base_url: impl Into<String>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        let mut key = HeaderValue::from_str(api_key)?;
        key.set_sensitive(true);
        headers.insert("x-api-key", key);

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

// === Trait Implementations ===

#[async_trait]
impl LlmClient for AnthropicClient {
    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    async fn create_message_stream(
        &self,
        request: MessageRequest,
    ) -> Result<StreamEventBox, LlmError> {
        let request = MessageRequest {
            stream: Some(true),
            ..request
        };
        let url = self.messages_url();
        let response =
            send_with_retry(&self.retry, || self.http_client.post(&url).json(&request)).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let byte_stream = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            let mut byte_stream = std::pin::pin!(byte_stream);
            let mut finished = false;

            while !finished {
                let Some(chunk_result) = byte_stream.next().await else {
                    break;
                };
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(LlmError::NetworkError(format!("Stream read error: {e}")));
                        finished = true;
                        continue;
                    }
                };

                for data in decoder.push(&chunk) {
                    match parse_event_data(&data) {
                        Ok(Some(StreamEvent::Error { error })) => {
                            yield Err(LlmError::from_stream_error(&error));
                            finished = true;
                            break;
                        }
                        Ok(Some(event)) => yield Ok(event),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            finished = true;
                            break;
                        }
                    }
                }
            }

            if !finished {
                if let Some(data) = decoder.finish() {
                    match parse_event_data(&data) {
                        Ok(Some(StreamEvent::Error { error })) => {
                            yield Err(LlmError::from_stream_error(&error));
                        }
                        Ok(Some(event)) => yield Ok(event),
                        Ok(None) => {}
                        Err(e) => yield Err(e),
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

// === SSE Decoding ===

/// Incremental `text/event-stream` decoder yielding the `data` payload of
/// each complete event.
#[derive(Debug, Default)]
struct SseDecoder {
    byte_buf: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.byte_buf.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while let Some(newline_pos) = self.byte_buf.iter().position(|b| *b == b'\n') {
            let line_bytes: Vec<u8> = self.byte_buf.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                // Empty line = event boundary
                if !self.data_lines.is_empty() {
                    payloads.push(self.data_lines.join("\n"));
                    self.data_lines.clear();
                }
                continue;
            }

            if let Some(data) = line.strip_prefix("data:") {
                self.data_lines
                    .push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
            // Ignore other SSE fields (event:, id:, retry:) and comments
        }

        payloads
    }

    /// Flush an event the server did not terminate with a blank line.
    fn finish(&mut self) -> Option<String> {
        if !self.byte_buf.is_empty() {
            let rest = std::mem::take(&mut self.byte_buf);
            let line = String::from_utf8_lossy(&rest);
            if let Some(data) = line.trim_end_matches(['\n', '\r']).strip_prefix("data:") {
                self.data_lines
                    .push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
        }
        if self.data_lines.is_empty() {
            return None;
        }
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(payload)
    }
}

fn parse_event_data(data: &str) -> Result<Option<StreamEvent>, LlmError> {
    let trimmed = data.trim();
    if trimmed.is_empty() || trimmed == "[DONE]" {
        return Ok(None);
    }
    serde_json::from_str::<StreamEvent>(trimmed)
        .map(Some)
        .map_err(|e| LlmError::ParseError(format!("{e}: {trimmed}")))
}

// === Error Helpers ===

async fn error_from_response(response: reqwest::Response) -> LlmError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ApiErrorEnvelope>(&text)
        .map(|envelope| envelope.error)
        .unwrap_or_else(|_| ApiErrorBody {
            error_type: String::new(),
            message: text.trim().to_string(),
        });
    LlmError::from_status(status, &body, retry_after)
}

// === Retry Helpers ===

async fn send_with_retry<F>(
    policy: &RetryPolicy,
    mut build: F,
) -> Result<reqwest::Response, LlmError>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut attempt: u32 = 0;

    loop {
        let result = build().send().await;
        let mut retry_after: Option<u64> = None;

        match result {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }

                let retryable = status.as_u16() == 429 || status.is_server_error();
                if !retryable || !policy.enabled || attempt >= policy.max_retries {
                    return Ok(response);
                }

                retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());
                logging::warn(format!(
                    "Retryable HTTP {} (attempt {} of {})",
                    status.as_u16(),
                    attempt + 1,
                    policy.max_retries + 1
                ));
            }
            Err(err) => {
                let err = LlmError::from(err);
                if !err.is_retryable() || !policy.enabled || attempt >= policy.max_retries {
                    return Err(err);
                }
                logging::warn(format!(
                    "Request error: {} (attempt {} of {})",
                    err,
                    attempt + 1,
                    policy.max_retries + 1
                ));
            }
        }

        let mut delay = policy.delay_for_attempt(attempt);
        if let Some(secs) = retry_after {
            let max = Duration::from_secs_f64(policy.max_delay.max(0.0));
            delay = delay.max(Duration::from_secs(secs)).min(max);
        }
        attempt += 1;
        logging::info(format!("Retrying after {:.2}s", delay.as_secs_f64()));
        tokio::time::sleep(delay).await;
    }
}
