//! Chat messages shown alongside tool calls in the timeline.

use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, RunId};

/// Who wrote a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person at the keyboard.
    User,
    /// The fiche.
    Assistant,
}

/// Delivery status of an assistant message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Placeholder created, no content yet.
    Queued,
    /// Content is streaming in.
    Typing,
    /// Content is complete.
    Final,
    /// The run failed before the answer completed.
    Error,
    /// The run was stopped before the answer completed.
    Canceled,
}

impl MessageStatus {
    /// Whether the status can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Final | Self::Error | Self::Canceled)
    }
}

/// A chat message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Unique id.
    pub id: MessageId,
    /// Author.
    pub role: Role,
    /// Text content.
    #[serde(default)]
    pub content: String,
    /// Creation time (ms). `None` sorts last in the timeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Assistant delivery status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    /// The run this message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
}

impl ChatMessage {
    /// A user message.
    #[must_use]
    pub fn user(id: MessageId, content: impl Into<String>, timestamp: Option<u64>, run_id: Option<RunId>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            timestamp,
            status: None,
            run_id,
        }
    }

    /// An empty assistant placeholder in `queued` state.
    #[must_use]
    pub fn assistant_placeholder(id: MessageId, timestamp: Option<u64>, run_id: Option<RunId>) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: String::new(),
            timestamp,
            status: Some(MessageStatus::Queued),
            run_id,
        }
    }

    /// The owning run, with the unassigned sentinel collapsed to `None`.
    #[must_use]
    pub fn run(&self) -> Option<RunId> {
        self.run_id.and_then(RunId::assigned)
    }
}
