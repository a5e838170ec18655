//! Shared test-only helpers.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::StreamExt as _;
use futures_util::stream;
use serde_json::Value;

use crate::llm_client::{LlmClient, LlmError, StreamEventBox};
use crate::models::{
    ContentBlockStart, Delta, MessageDelta, MessageRequest, MessageResponse, StreamEvent,
};

/// What the scripted provider does for one request.
pub(crate) enum Script {
    /// Open the stream and replay these items in order.
    Events(Vec<Result<StreamEvent, LlmError>>),
    /// Fail before any stream is opened.
    OpenError(LlmError),
    /// Replay these items, then go silent without closing.
    EventsThenStall(Vec<Result<StreamEvent, LlmError>>),
}

/// `LlmClient` that replays canned provider responses and records requests.
#[derive(Default)]
pub(crate) struct ScriptedClient {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<MessageRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedClient {
    pub(crate) fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far, oldest first.
    pub(crate) fn requests(&self) -> Vec<MessageRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    fn provider_name(&self) -> &'static str {
        "scripted"
    }

    async fn create_message_stream(
        &self,
        request: MessageRequest,
    ) -> Result<StreamEventBox, LlmError> {
        lock(&self.requests).push(request);
        let next = lock(&self.scripts).pop_front();
        match next {
            Some(Script::Events(items)) => Ok(Box::pin(stream::iter(items))),
            Some(Script::OpenError(err)) => Err(err),
            Some(Script::EventsThenStall(items)) => {
                Ok(Box::pin(stream::iter(items).chain(stream::pending())))
            }
            None => Err(LlmError::Other("no scripted response left".to_string())),
        }
    }
}

// === Event builders ===

fn message_start() -> Result<StreamEvent, LlmError> {
    Ok(StreamEvent::MessageStart {
        message: MessageResponse {
            id: "msg_test".to_string(),
            model: "claude-test".to_string(),
            ..MessageResponse::default()
        },
    })
}

fn message_end(stop_reason: &str) -> Vec<Result<StreamEvent, LlmError>> {
    vec![
        Ok(StreamEvent::MessageDelta {
            delta: MessageDelta {
                stop_reason: Some(stop_reason.to_string()),
                stop_sequence: None,
            },
            usage: None,
        }),
        Ok(StreamEvent::MessageStop),
    ]
}

fn text_block(index: u32, chunks: &[&str]) -> Vec<Result<StreamEvent, LlmError>> {
    let mut events = vec![Ok(StreamEvent::ContentBlockStart {
        index,
        content_block: ContentBlockStart::Text {
            text: String::new(),
        },
    })];
    events.extend(chunks.iter().map(|chunk| {
        Ok(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::TextDelta {
                text: (*chunk).to_string(),
            },
        })
    }));
    events.push(Ok(StreamEvent::ContentBlockStop { index }));
    events
}

fn tool_block(
    index: u32,
    id: &str,
    name: &str,
    start_input: Value,
    json_fragments: &[&str],
) -> Vec<Result<StreamEvent, LlmError>> {
    let mut events = vec![Ok(StreamEvent::ContentBlockStart {
        index,
        content_block: ContentBlockStart::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input: start_input,
        },
    })];
    events.extend(json_fragments.iter().map(|fragment| {
        Ok(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::InputJsonDelta {
                partial_json: (*fragment).to_string(),
            },
        })
    }));
    events.push(Ok(StreamEvent::ContentBlockStop { index }));
    events
}

/// A plain text answer streamed in `chunks`, ending the turn.
pub(crate) fn text_reply(chunks: &[&str]) -> Vec<Result<StreamEvent, LlmError>> {
    let mut events = vec![message_start()];
    events.extend(text_block(0, chunks));
    events.extend(message_end("end_turn"));
    events
}

/// A single tool call whose input arrives as `json_fragments`.
pub(crate) fn tool_reply(
    id: &str,
    name: &str,
    json_fragments: &[&str],
) -> Vec<Result<StreamEvent, LlmError>> {
    tool_reply_with_start(id, name, serde_json::json!({}), json_fragments)
}

/// Like [`tool_reply`], with an explicit input on the block start event.
pub(crate) fn tool_reply_with_start(
    id: &str,
    name: &str,
    start_input: Value,
    json_fragments: &[&str],
) -> Vec<Result<StreamEvent, LlmError>> {
    let mut events = vec![message_start()];
    events.extend(tool_block(0, id, name, start_input, json_fragments));
    events.extend(message_end("tool_use"));
    events
}

/// Leading text followed by a tool call in the same message.
pub(crate) fn text_then_tool_reply(
    text: &str,
    id: &str,
    name: &str,
    json_fragments: &[&str],
) -> Vec<Result<StreamEvent, LlmError>> {
    let mut events = vec![message_start()];
    events.extend(text_block(0, &[text]));
    events.extend(tool_block(1, id, name, serde_json::json!({}), json_fragments));
    events.extend(message_end("tool_use"));
    events
}
