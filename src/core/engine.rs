//! Streaming conversation engine.
//!
//! One call to [`ConversationEngine::handle_turn`] drives a visitor message to
//! the model's final answer:
//! - append the user message to the session history
//! - stream a completion, forwarding text deltas as they arrive
//! - rebuild tool-use blocks from their streamed JSON fragments
//! - run requested tools and feed the results back, then ask again
//!
//! The returned stream is lazy. Dropping it cancels the in-flight provider
//! request and releases the session.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures_util::{Stream, StreamExt};
use serde_json::{Value, json};

use crate::config::{Config, DEFAULT_MAX_TOKENS, DEFAULT_MODEL_NAME};
use crate::llm_client::{LlmClient, LlmError};
use crate::logging;
use crate::models::{
    ContentBlock, ContentBlockStart, Delta, Message, MessageRequest, StreamEvent, Usage,
};
use crate::session::SessionStore;
use crate::tools::ToolRegistry;

use super::events::TurnEvent;

// === Types ===

/// Stop reason the provider reports when it wants tools run.
const STOP_REASON_TOOL_USE: &str = "tool_use";

pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 8;
pub const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Lazily evaluated output of one turn.
pub type TurnStream = Pin<Box<dyn Stream<Item = TurnEvent> + Send>>;

/// Configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Model identifier sent with every request.
    pub model: String,
    /// Response token budget per provider request.
    pub max_tokens: u32,
    /// Tool round-trips allowed in a single turn.
    pub max_tool_rounds: u32,
    /// Longest silence tolerated on an open provider stream.
    pub stream_idle_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL_NAME.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model_name.clone(),
            max_tokens: config.max_tokens,
            ..Self::default()
        }
    }
}

/// Why a turn stopped early.
#[derive(Debug)]
enum TurnFailure {
    Provider(LlmError),
    Unexpected(String),
}

impl TurnFailure {
    fn protocol(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn log(&self, session_id: &str) {
        match self {
            Self::Provider(err) => {
                logging::error(format!("Provider error in session {session_id}: {err}"));
            }
            Self::Unexpected(message) => {
                logging::error(format!("Turn failed in session {session_id}: {message}"));
            }
        }
    }

    fn into_event(self) -> TurnEvent {
        match self {
            Self::Provider(err) => TurnEvent::provider_error(&err),
            Self::Unexpected(message) => TurnEvent::unexpected(message),
        }
    }
}

#[derive(Debug)]
struct ToolUseState {
    id: String,
    name: String,
    input: Value,
    input_buffer: String,
}

#[derive(Debug)]
enum OpenBlock {
    Text(String),
    Tool(usize),
}

/// Reassembles one assistant message from provider stream events.
#[derive(Debug, Default)]
struct AssistantAccumulator {
    open: HashMap<u32, OpenBlock>,
    texts: Vec<String>,
    tool_uses: Vec<ToolUseState>,
    stop_reason: Option<String>,
    usage: Usage,
    finished: bool,
}

/// A fully received assistant reply.
#[derive(Debug)]
struct AssistantReply {
    content: Vec<ContentBlock>,
    tool_calls: Vec<ToolCall>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Clone)]
struct ToolCall {
    id: String,
    name: String,
    input: Value,
}

impl AssistantReply {
    fn wants_tools(&self) -> bool {
        self.stop_reason.as_deref() == Some(STOP_REASON_TOOL_USE) && !self.tool_calls.is_empty()
    }
}

impl AssistantAccumulator {
    /// Fold one event in. Returns text that should be forwarded immediately.
    fn apply(&mut self, event: StreamEvent) -> Result<Option<String>, TurnFailure> {
        match event {
            StreamEvent::MessageStart { message } => {
                logging::debug(format!("Provider message {} started", message.id));
                if let Some(usage) = message.usage {
                    self.usage = usage;
                }
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlockStart::Text { text } => {
                    self.open.insert(index, OpenBlock::Text(text.clone()));
                    if !text.is_empty() {
                        return Ok(Some(text));
                    }
                }
                ContentBlockStart::ToolUse { id, name, input } => {
                    self.open.insert(index, OpenBlock::Tool(self.tool_uses.len()));
                    self.tool_uses.push(ToolUseState {
                        id,
                        name,
                        input,
                        input_buffer: String::new(),
                    });
                }
                ContentBlockStart::Unknown => {}
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                Delta::TextDelta { text } => match self.open.get_mut(&index) {
                    Some(OpenBlock::Text(buffer)) => {
                        buffer.push_str(&text);
                        if !text.is_empty() {
                            return Ok(Some(text));
                        }
                    }
                    _ => {
                        return Err(TurnFailure::protocol(format!(
                            "text delta for block {index}, which is not an open text block"
                        )));
                    }
                },
                Delta::InputJsonDelta { partial_json } => match self.open.get(&index) {
                    Some(OpenBlock::Tool(slot)) => {
                        if let Some(tool) = self.tool_uses.get_mut(*slot) {
                            tool.input_buffer.push_str(&partial_json);
                        }
                    }
                    _ => {
                        return Err(TurnFailure::protocol(format!(
                            "tool input delta for block {index}, which is not an open tool block"
                        )));
                    }
                },
                Delta::Unknown => {}
            },
            StreamEvent::ContentBlockStop { index } => {
                if let Some(OpenBlock::Text(text)) = self.open.remove(&index) {
                    self.seal_text(text);
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;
                }
            }
            StreamEvent::MessageStop => self.finished = true,
            StreamEvent::Error { error } => {
                return Err(TurnFailure::Provider(LlmError::from_stream_error(&error)));
            }
            StreamEvent::Ping | StreamEvent::Unknown => {}
        }
        Ok(None)
    }

    fn seal_text(&mut self, text: String) {
        if !text.is_empty() {
            self.texts.push(text);
        }
    }

    /// Close out the message once the provider stream has ended.
    fn finish(mut self) -> Result<AssistantReply, TurnFailure> {
        if !self.finished {
            return Err(TurnFailure::protocol(
                "provider stream ended before message_stop",
            ));
        }

        // Text blocks the provider never closed are kept.
        let mut dangling: Vec<(u32, String)> = self
            .open
            .drain()
            .filter_map(|(index, block)| match block {
                OpenBlock::Text(text) => Some((index, text)),
                OpenBlock::Tool(_) => None,
            })
            .collect();
        dangling.sort_by_key(|(index, _)| *index);
        for (_, text) in dangling {
            self.seal_text(text);
        }

        let tool_calls: Vec<ToolCall> = self.tool_uses.into_iter().map(finalize_tool_use).collect();

        let mut content: Vec<ContentBlock> = self
            .texts
            .into_iter()
            .map(|text| ContentBlock::Text { text })
            .collect();
        content.extend(tool_calls.iter().map(|call| ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        }));

        Ok(AssistantReply {
            content,
            tool_calls,
            stop_reason: self.stop_reason,
            usage: self.usage,
        })
    }
}

fn finalize_tool_use(tool: ToolUseState) -> ToolCall {
    let input = if tool.input_buffer.trim().is_empty() {
        if tool.input.is_null() {
            json!({})
        } else {
            tool.input
        }
    } else {
        match serde_json::from_str::<Value>(tool.input_buffer.trim()) {
            Ok(value) => value,
            Err(err) => {
                logging::warn(format!(
                    "Tool '{}' received malformed input ({err}); using empty input. Buffer: '{}'",
                    tool.name, tool.input_buffer
                ));
                json!({})
            }
        }
    };
    ToolCall {
        id: tool.id,
        name: tool.name,
        input,
    }
}

// === Engine ===

/// Drives visitor turns against the model provider.
#[derive(Clone)]
pub struct ConversationEngine {
    client: Arc<dyn LlmClient>,
    sessions: Arc<SessionStore>,
    tools: ToolRegistry,
    system_prompt: Arc<str>,
    config: EngineConfig,
}

impl ConversationEngine {
    #[must_use]
    pub fn new(
        client: Arc<dyn LlmClient>,
        sessions: Arc<SessionStore>,
        system_prompt: impl Into<Arc<str>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            client,
            sessions,
            tools: ToolRegistry::new(),
            system_prompt: system_prompt.into(),
            config,
        }
    }

    #[cfg(test)]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    fn build_request(&self, messages: Vec<Message>) -> MessageRequest {
        MessageRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            system: Some(self.system_prompt.to_string()),
            tools: Some(self.tools.list_tools().to_vec()),
            stream: Some(true),
        }
    }

    fn run_tools(&self, calls: &[ToolCall]) -> Vec<ContentBlock> {
        calls
            .iter()
            .map(|call| {
                logging::info(format!("Executing tool {} with input {}", call.name, call.input));
                ContentBlock::ToolResult {
                    tool_use_id: call.id.clone(),
                    content: self.tools.execute(&call.name, &call.input),
                }
            })
            .collect()
    }

    /// Run one visitor turn, yielding text as the model produces it.
    ///
    /// The session stays locked until the stream completes or is dropped, so
    /// turns for the same session run strictly one after another. History
    /// written before a failure is kept.
    pub fn handle_turn(&self, message: String, session_id: String) -> TurnStream {
        let engine = self.clone();
        Box::pin(stream! {
            let shared = engine.sessions.get_or_create(&session_id);
            let mut history = shared.lock_owned().await;
            history.push(Message::user_text(message));

            let idle_timeout = engine.config.stream_idle_timeout;
            let mut tool_rounds: u32 = 0;

            loop {
                let request = engine.build_request(history.snapshot());
                logging::info(format!(
                    "Requesting {} with {} messages (session {session_id})",
                    request.model,
                    request.messages.len()
                ));

                let mut events = match engine.client.create_message_stream(request).await {
                    Ok(events) => events,
                    Err(err) => {
                        let failure = TurnFailure::Provider(err);
                        failure.log(&session_id);
                        yield failure.into_event();
                        return;
                    }
                };

                let mut accumulator = AssistantAccumulator::default();
                let mut failure: Option<TurnFailure> = None;
                loop {
                    let next = match tokio::time::timeout(idle_timeout, events.next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            failure = Some(TurnFailure::Provider(LlmError::Timeout(idle_timeout)));
                            break;
                        }
                    };
                    let Some(item) = next else {
                        break;
                    };
                    let event = match item {
                        Ok(event) => event,
                        Err(err) => {
                            failure = Some(TurnFailure::Provider(err));
                            break;
                        }
                    };
                    match accumulator.apply(event) {
                        Ok(Some(text)) => {
                            yield TurnEvent::Text(text);
                        }
                        Ok(None) => {}
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                    if accumulator.finished {
                        break;
                    }
                }
                drop(events);

                if let Some(failure) = failure {
                    failure.log(&session_id);
                    yield failure.into_event();
                    return;
                }

                let reply = match accumulator.finish() {
                    Ok(reply) => reply,
                    Err(failure) => {
                        failure.log(&session_id);
                        yield failure.into_event();
                        return;
                    }
                };

                logging::debug(format!(
                    "Provider reply: stop_reason={}, {} input / {} output tokens",
                    reply.stop_reason.as_deref().unwrap_or("none"),
                    reply.usage.input_tokens,
                    reply.usage.output_tokens
                ));
                let wants_tools = reply.wants_tools();
                if !reply.content.is_empty() {
                    history.push(Message::assistant(reply.content));
                }
                if !wants_tools {
                    break;
                }

                let results = engine.run_tools(&reply.tool_calls);
                history.push(Message::tool_results(results));
                tool_rounds += 1;
                if tool_rounds >= engine.config.max_tool_rounds {
                    let failure = TurnFailure::Unexpected(format!(
                        "tool call limit of {} rounds reached",
                        engine.config.max_tool_rounds
                    ));
                    failure.log(&session_id);
                    yield failure.into_event();
                    return;
                }
            }

            logging::debug(format!(
                "Turn complete for session {session_id} ({} messages, {tool_rounds} tool rounds, {} active sessions)",
                history.len(),
                engine.sessions.len()
            ));
        })
    }
}
