//! Provider abstraction for streaming model calls.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use crate::models::{ApiErrorBody, MessageRequest, StreamEvent};

/// Boxed stream of provider events for one request.
pub type StreamEventBox = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

/// Failure taxonomy for provider calls.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("authentication failed: {0}")]
    AuthenticationError(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<u64>,
    },
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("provider overloaded: {0}")]
    Overloaded(String),
    #[error("server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed provider response: {0}")]
    ParseError(String),
    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Whether a fresh attempt could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Overloaded(_)
                | Self::ServerError { .. }
                | Self::NetworkError(_)
                | Self::Timeout(_)
        )
    }

    /// Map an HTTP status plus the provider's error body to a typed error.
    #[must_use]
    pub fn from_status(status: u16, body: &ApiErrorBody, retry_after: Option<u64>) -> Self {
        let message = if body.message.is_empty() {
            format!("HTTP {status}")
        } else {
            body.message.clone()
        };
        match status {
            400 | 404 | 413 | 422 => Self::InvalidRequest { message },
            401 => Self::AuthenticationError(message),
            403 => Self::PermissionDenied(message),
            429 => Self::RateLimited {
                message,
                retry_after,
            },
            529 => Self::Overloaded(message),
            500..=599 => Self::ServerError { status, message },
            _ => Self::Other(format!("HTTP {status}: {message}")),
        }
    }

    /// Map a mid-stream `error` event to a typed error.
    #[must_use]
    pub fn from_stream_error(body: &ApiErrorBody) -> Self {
        let message = body.message.clone();
        match body.error_type.as_str() {
            "authentication_error" => Self::AuthenticationError(message),
            "permission_error" => Self::PermissionDenied(message),
            "rate_limit_error" => Self::RateLimited {
                message,
                retry_after: None,
            },
            "invalid_request_error" | "not_found_error" | "request_too_large" => {
                Self::InvalidRequest { message }
            }
            "overloaded_error" => Self::Overloaded(message),
            "api_error" => Self::ServerError {
                status: 500,
                message,
            },
            other => Self::Other(format!("{other}: {message}")),
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::NetworkError(format!("request timed out: {err}"))
        } else if err.is_decode() {
            Self::ParseError(err.to_string())
        } else {
            Self::NetworkError(err.to_string())
        }
    }
}

/// A model provider able to stream one assistant message per request.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Open a streaming request. Errors returned here happen before any event
    /// was produced; errors inside the stream abort it mid-way.
    async fn create_message_stream(
        &self,
        request: MessageRequest,
    ) -> Result<StreamEventBox, LlmError>;
}
