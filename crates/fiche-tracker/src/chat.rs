//! Chat messages in arrival order, keyed by id.

use std::collections::HashMap;

use fiche_core::{ChatMessage, MessageEvent, MessageId, MessageStatus, RunId, Role};
use tracing::debug;

/// The message list fed to the timeline.
#[derive(Clone, Debug, Default)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    index: HashMap<MessageId, usize>,
}

impl ChatLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages in first-seen order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Look up a message.
    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.index.get(id).map(|&idx| &self.messages[idx])
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a user message. Returns `false` if the id is already taken.
    pub fn push_user(
        &mut self,
        id: MessageId,
        content: impl Into<String>,
        timestamp: Option<u64>,
        run_id: Option<RunId>,
    ) -> bool {
        if self.index.contains_key(id.as_str()) {
            return false;
        }
        self.insert(ChatMessage::user(id, content, timestamp, run_id));
        true
    }

    /// Associate an optimistic user message with the run the server created
    /// for it.
    pub fn assign_run(&mut self, id: &str, run_id: RunId) -> bool {
        let Some(message) = self.get_mut(id) else { return false };
        if message.run().is_some() {
            return false;
        }
        message.run_id = Some(run_id);
        true
    }

    /// Apply a streaming event. Returns whether the log changed.
    ///
    /// `queued → typing → final`. Terminal messages never change again.
    /// A delta carrying an `offset` is appended only when the offset equals
    /// the characters streamed so far; deltas without one always append.
    pub fn apply(&mut self, event: &MessageEvent) -> bool {
        let run_id = event.run_id().assigned();
        match event {
            MessageEvent::MessageQueued {
                message_id, timestamp, ..
            } => {
                if self.index.contains_key(message_id.as_str()) {
                    return false;
                }
                self.insert(ChatMessage::assistant_placeholder(message_id.clone(), *timestamp, run_id));
                true
            }
            MessageEvent::MessageDelta {
                message_id, delta, offset, ..
            } => {
                let message = self.assistant_entry(message_id, None, run_id);
                if is_terminal(message) {
                    debug!(message_id = %message_id, "ignoring delta for finished message");
                    return false;
                }
                if let Some(offset) = *offset {
                    let streamed = message.content.chars().count();
                    if offset != streamed {
                        debug!(message_id = %message_id, offset, streamed, "ignoring out-of-order delta");
                        return false;
                    }
                }
                message.content.push_str(delta);
                message.status = Some(MessageStatus::Typing);
                true
            }
            MessageEvent::MessageFinal {
                message_id,
                content,
                timestamp,
                ..
            } => {
                let message = self.assistant_entry(message_id, *timestamp, run_id);
                if is_terminal(message) {
                    debug!(message_id = %message_id, "ignoring final for finished message");
                    return false;
                }
                content.clone_into(&mut message.content);
                message.status = Some(MessageStatus::Final);
                true
            }
        }
    }

    /// Finalize the run's answer from a `run_complete` event.
    ///
    /// Targets `message_id` if given, else the run's newest unfinished
    /// assistant message. Without either, a message is created only when
    /// there is content to show.
    pub fn finalize_run(
        &mut self,
        run_id: RunId,
        message_id: Option<&MessageId>,
        content: Option<&str>,
        timestamp: Option<u64>,
    ) -> bool {
        let target = match message_id {
            Some(id) => Some(id.clone()),
            None => self.open_assistant(run_id),
        };
        let id = match (target, content) {
            (Some(id), _) => id,
            (None, Some(_)) => MessageId::generate(),
            (None, None) => return false,
        };

        let message = self.assistant_entry(&id, timestamp, run_id.assigned());
        if is_terminal(message) {
            return false;
        }
        if let Some(text) = content {
            text.clone_into(&mut message.content);
        }
        message.status = Some(MessageStatus::Final);
        true
    }

    /// Mark the run's unfinished assistant messages with `status`.
    pub fn close_run(&mut self, run_id: RunId, status: MessageStatus) -> usize {
        let mut closed = 0;
        for message in &mut self.messages {
            if message.role == Role::Assistant && message.run() == Some(run_id) && !is_terminal(message) {
                message.status = Some(status);
                closed += 1;
            }
        }
        closed
    }

    /// Merge history messages.
    ///
    /// Unknown messages are appended. Finished live messages always win. A
    /// live message still streaming is replaced only by a finished history
    /// copy, or when nothing has streamed into it yet.
    pub fn hydrate(&mut self, history: impl IntoIterator<Item = ChatMessage>) -> usize {
        let mut changed = 0;
        for incoming in history {
            match self.index.get(incoming.id.as_str()).copied() {
                None => {
                    self.insert(incoming);
                    changed += 1;
                }
                Some(idx) => {
                    let existing = &mut self.messages[idx];
                    let supersedes = is_settled(&incoming) || existing.content.is_empty();
                    if !is_terminal(existing) && supersedes && *existing != incoming {
                        *existing = incoming;
                        changed += 1;
                    }
                }
            }
        }
        changed
    }

    /// Distinct runs referenced by messages.
    pub fn runs(&self) -> Vec<RunId> {
        let mut runs: Vec<RunId> = self.messages.iter().filter_map(ChatMessage::run).collect();
        runs.sort_unstable();
        runs.dedup();
        runs
    }

    /// Drop every message.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.index.clear();
    }

    fn insert(&mut self, message: ChatMessage) {
        let _ = self.index.insert(message.id.clone(), self.messages.len());
        self.messages.push(message);
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut ChatMessage> {
        let idx = *self.index.get(id)?;
        self.messages.get_mut(idx)
    }

    /// Existing message, or a new assistant placeholder.
    fn assistant_entry(&mut self, id: &MessageId, timestamp: Option<u64>, run_id: Option<RunId>) -> &mut ChatMessage {
        let idx = if let Some(&idx) = self.index.get(id.as_str()) {
            idx
        } else {
            self.insert(ChatMessage::assistant_placeholder(id.clone(), timestamp, run_id));
            self.messages.len() - 1
        };
        let message = &mut self.messages[idx];
        if message.timestamp.is_none() {
            message.timestamp = timestamp;
        }
        if message.run().is_none() {
            message.run_id = run_id.or(message.run_id);
        }
        message
    }

    fn open_assistant(&self, run_id: RunId) -> Option<MessageId> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && m.run() == Some(run_id) && !is_terminal(m))
            .map(|m| m.id.clone())
    }
}

fn is_terminal(message: &ChatMessage) -> bool {
    message.status.is_some_and(MessageStatus::is_terminal)
}

/// User messages are never streamed.
fn is_settled(message: &ChatMessage) -> bool {
    message.role == Role::User || is_terminal(message)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
