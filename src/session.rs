//! In-memory conversation store with least-recently-used eviction.
//!
//! Each session owns an async mutex over its history. A turn holds that lock
//! from the moment the user message is appended until the last assistant or
//! tool-result message is recorded, so concurrent turns on one session run
//! one after another instead of interleaving.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as AsyncMutex;

use crate::logging;
use crate::models::Message;

pub const DEFAULT_MAX_SESSIONS: usize = 50;
pub const DEFAULT_MAX_HISTORY_MESSAGES: usize = 40;

/// History handle shared between the store and an in-flight turn.
pub type SharedHistory = Arc<AsyncMutex<History>>;

/// Ordered message log for one session, bounded by `max_messages`.
#[derive(Debug, Clone)]
pub struct History {
    messages: Vec<Message>,
    max_messages: usize,
}

impl History {
    #[must_use]
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages,
        }
    }

    /// Append a message, then trim back under the bound.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        trim_history(&mut self.messages, self.max_messages);
    }

    /// Owned copy for building a provider request.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Drop the oldest messages until at most `max` remain.
///
/// Messages go in pairs so user/assistant alternation survives, and the
/// remaining history always opens with a plain user message: a leading
/// assistant reply or orphaned tool result would be rejected by the provider.
pub fn trim_history(messages: &mut Vec<Message>, max: usize) {
    while messages.len() > max {
        let pair = messages.len().min(2);
        messages.drain(..pair);
    }
    let leading = messages
        .iter()
        .take_while(|message| !message.is_user() || message.has_tool_results())
        .count();
    if leading > 0 {
        messages.drain(..leading);
    }
}

#[derive(Debug)]
struct SessionEntry {
    history: SharedHistory,
    last_used: u64,
}

#[derive(Debug, Default)]
struct SessionMap {
    entries: HashMap<String, SessionEntry>,
    clock: u64,
}

impl SessionMap {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_least_recent(&mut self) -> Option<String> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(id, _)| id.clone())?;
        self.entries.remove(&oldest);
        Some(oldest)
    }
}

/// Bounded map from session id to conversation history.
#[derive(Debug)]
pub struct SessionStore {
    max_sessions: usize,
    max_history: usize,
    inner: Mutex<SessionMap>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS, DEFAULT_MAX_HISTORY_MESSAGES)
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(max_sessions: usize, max_history: usize) -> Self {
        Self {
            max_sessions: max_sessions.max(1),
            max_history,
            inner: Mutex::new(SessionMap::default()),
        }
    }

    /// Look up a session, creating it when absent, and mark it most recently used.
    ///
    /// Creating a session at capacity evicts the least recently used one.
    pub fn get_or_create(&self, session_id: &str) -> SharedHistory {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let now = map.tick();

        if let Some(entry) = map.entries.get_mut(session_id) {
            entry.last_used = now;
            return Arc::clone(&entry.history);
        }

        while map.entries.len() >= self.max_sessions {
            match map.evict_least_recent() {
                Some(evicted) => logging::debug(format!("Evicted idle session {evicted}")),
                None => break,
            }
        }

        let history = Arc::new(AsyncMutex::new(History::new(self.max_history)));
        map.entries.insert(
            session_id.to_string(),
            SessionEntry {
                history: Arc::clone(&history),
                last_used: now,
            },
        );
        history
    }

    #[cfg(test)]
    pub fn contains(&self, session_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .contains_key(session_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
