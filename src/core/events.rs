//! Values produced by the conversation engine while a turn runs.
//!
//! A turn yields zero or more [`TurnEvent::Text`] fragments and at most one
//! [`TurnEvent::Error`], which is always the last item.

use crate::llm_client::LlmError;

/// One item of a turn's output, in provider order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// Incremental assistant text, forwarded as soon as it arrives.
    Text(String),
    /// Terminal failure rendered as a text fragment for the visitor.
    Error(String),
}

impl TurnEvent {
    /// Failure talking to the model provider.
    #[must_use]
    pub fn provider_error(err: &LlmError) -> Self {
        Self::Error(format!(
            "\n\n[Error communicating with AI service: {err}]"
        ))
    }

    /// Any other failure inside the turn.
    #[must_use]
    pub fn unexpected(message: impl std::fmt::Display) -> Self {
        Self::Error(format!("\n\n[Unexpected error: {message}]"))
    }
}
