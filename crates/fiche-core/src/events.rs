//! Inbound event contracts.
//!
//! The transport delivers a stream of [`LiveEvent`]s. They fall into three
//! families, each an internally tagged enum keyed by `"type"`:
//!
//! - **[`ToolEvent`]**: tool call, worker, and nested tool call progress.
//!   Applied to the tool call store.
//! - **[`RunEvent`]**: run lifecycle. Applied to the lifecycle tracker.
//! - **[`MessageEvent`]**: assistant message streaming. Applied to the chat log.
//!
//! All type strings are unique across the families, so [`LiveEvent`] can be
//! decoded untagged. Field names are camelCase on the wire; an absent
//! `runId` decodes to [`RunId::UNASSIGNED`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::errors::FrameError;
use crate::ids::{MessageId, RunId, ToolCallId};

/// Tool call, worker, and nested tool call events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ToolEvent {
    /// A tool call started.
    ToolStarted {
        /// Owning run.
        #[serde(default)]
        run_id: RunId,
        /// Call id.
        call_id: ToolCallId,
        /// Tool name.
        tool_name: String,
        /// Start time (ms).
        #[serde(default, deserialize_with = "crate::time::deserialize_lenient_ms")]
        timestamp: Option<u64>,
        /// Display string for the arguments.
        #[serde(default)]
        args_preview: Option<String>,
    },

    /// Progress on a running tool call.
    ToolUpdated {
        /// Owning run.
        #[serde(default)]
        run_id: RunId,
        /// Call id.
        call_id: ToolCallId,
        /// Tool name, if the sender repeats it.
        #[serde(default)]
        tool_name: Option<String>,
        /// Event time (ms).
        #[serde(default, deserialize_with = "crate::time::deserialize_lenient_ms")]
        timestamp: Option<u64>,
        /// Updated argument preview.
        #[serde(default)]
        args_preview: Option<String>,
        /// Partial result preview.
        #[serde(default)]
        result_preview: Option<String>,
    },

    /// A tool call finished successfully.
    ToolCompleted {
        /// Owning run.
        #[serde(default)]
        run_id: RunId,
        /// Call id.
        call_id: ToolCallId,
        /// Tool name, if the sender repeats it.
        #[serde(default)]
        tool_name: Option<String>,
        /// Completion time (ms).
        #[serde(default, deserialize_with = "crate::time::deserialize_lenient_ms")]
        timestamp: Option<u64>,
        /// Server-measured duration.
        #[serde(default)]
        duration_ms: Option<u64>,
        /// Display string for the result.
        #[serde(default)]
        result_preview: Option<String>,
        /// Opaque result metadata for non-spawn tools.
        #[serde(default)]
        result: Option<Value>,
    },

    /// A tool call failed.
    ToolFailed {
        /// Owning run.
        #[serde(default)]
        run_id: RunId,
        /// Call id.
        call_id: ToolCallId,
        /// Tool name, if the sender repeats it.
        #[serde(default)]
        tool_name: Option<String>,
        /// Failure time (ms).
        #[serde(default, deserialize_with = "crate::time::deserialize_lenient_ms")]
        timestamp: Option<u64>,
        /// Server-measured duration.
        #[serde(default)]
        duration_ms: Option<u64>,
        /// Error display string.
        error: String,
    },

    /// A spawn call's worker was created.
    WorkerSpawned {
        /// Owning run.
        #[serde(default)]
        run_id: RunId,
        /// The spawn call.
        call_id: ToolCallId,
        /// Event time (ms).
        #[serde(default, deserialize_with = "crate::time::deserialize_lenient_ms")]
        timestamp: Option<u64>,
    },

    /// A worker finished successfully.
    WorkerComplete {
        /// Owning run.
        #[serde(default)]
        run_id: RunId,
        /// The spawn call.
        call_id: ToolCallId,
        /// Worker summary.
        #[serde(default)]
        summary: Option<String>,
    },

    /// A worker failed.
    WorkerFailed {
        /// Owning run.
        #[serde(default)]
        run_id: RunId,
        /// The spawn call.
        call_id: ToolCallId,
        /// Error display string.
        error: String,
    },

    /// A worker started a tool call.
    NestedToolStarted {
        /// Owning run of the parent call.
        #[serde(default)]
        run_id: RunId,
        /// The spawn call that owns the worker.
        parent_call_id: ToolCallId,
        /// Nested call id.
        call_id: ToolCallId,
        /// Tool name.
        tool_name: String,
        /// Start time (ms).
        #[serde(default, deserialize_with = "crate::time::deserialize_lenient_ms")]
        timestamp: Option<u64>,
        /// Display string for the arguments.
        #[serde(default)]
        args_preview: Option<String>,
    },

    /// A worker's tool call finished successfully.
    NestedToolCompleted {
        /// Owning run of the parent call.
        #[serde(default)]
        run_id: RunId,
        /// The spawn call that owns the worker.
        parent_call_id: ToolCallId,
        /// Nested call id.
        call_id: ToolCallId,
        /// Tool name, if the sender repeats it.
        #[serde(default)]
        tool_name: Option<String>,
        /// Completion time (ms).
        #[serde(default, deserialize_with = "crate::time::deserialize_lenient_ms")]
        timestamp: Option<u64>,
        /// Server-measured duration.
        #[serde(default)]
        duration_ms: Option<u64>,
        /// Display string for the result.
        #[serde(default)]
        result_preview: Option<String>,
    },

    /// A worker's tool call failed.
    NestedToolFailed {
        /// Owning run of the parent call.
        #[serde(default)]
        run_id: RunId,
        /// The spawn call that owns the worker.
        parent_call_id: ToolCallId,
        /// Nested call id.
        call_id: ToolCallId,
        /// Tool name, if the sender repeats it.
        #[serde(default)]
        tool_name: Option<String>,
        /// Failure time (ms).
        #[serde(default, deserialize_with = "crate::time::deserialize_lenient_ms")]
        timestamp: Option<u64>,
        /// Server-measured duration.
        #[serde(default)]
        duration_ms: Option<u64>,
        /// Error display string.
        error: String,
    },
}

impl ToolEvent {
    /// The run the event names (possibly unassigned).
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        match self {
            Self::ToolStarted { run_id, .. }
            | Self::ToolUpdated { run_id, .. }
            | Self::ToolCompleted { run_id, .. }
            | Self::ToolFailed { run_id, .. }
            | Self::WorkerSpawned { run_id, .. }
            | Self::WorkerComplete { run_id, .. }
            | Self::WorkerFailed { run_id, .. }
            | Self::NestedToolStarted { run_id, .. }
            | Self::NestedToolCompleted { run_id, .. }
            | Self::NestedToolFailed { run_id, .. } => *run_id,
        }
    }

    /// The top-level call the event is keyed by (the parent for nested events).
    #[must_use]
    pub const fn call_id(&self) -> &ToolCallId {
        match self {
            Self::ToolStarted { call_id, .. }
            | Self::ToolUpdated { call_id, .. }
            | Self::ToolCompleted { call_id, .. }
            | Self::ToolFailed { call_id, .. }
            | Self::WorkerSpawned { call_id, .. }
            | Self::WorkerComplete { call_id, .. }
            | Self::WorkerFailed { call_id, .. } => call_id,
            Self::NestedToolStarted { parent_call_id, .. }
            | Self::NestedToolCompleted { parent_call_id, .. }
            | Self::NestedToolFailed { parent_call_id, .. } => parent_call_id,
        }
    }

    /// Wire type string.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::ToolStarted { .. } => "tool_started",
            Self::ToolUpdated { .. } => "tool_updated",
            Self::ToolCompleted { .. } => "tool_completed",
            Self::ToolFailed { .. } => "tool_failed",
            Self::WorkerSpawned { .. } => "worker_spawned",
            Self::WorkerComplete { .. } => "worker_complete",
            Self::WorkerFailed { .. } => "worker_failed",
            Self::NestedToolStarted { .. } => "nested_tool_started",
            Self::NestedToolCompleted { .. } => "nested_tool_completed",
            Self::NestedToolFailed { .. } => "nested_tool_failed",
        }
    }
}

/// Run lifecycle events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RunEvent {
    /// The run started.
    RunStarted {
        /// Run id.
        run_id: RunId,
        /// Start time (ms).
        #[serde(default, deserialize_with = "crate::time::deserialize_lenient_ms")]
        timestamp: Option<u64>,
    },

    /// The run finished its visible turn.
    RunComplete {
        /// Run id.
        run_id: RunId,
        /// Completion time (ms).
        #[serde(default, deserialize_with = "crate::time::deserialize_lenient_ms")]
        timestamp: Option<u64>,
        /// Assistant message carrying the answer, if known.
        #[serde(default)]
        message_id: Option<MessageId>,
        /// Final answer text.
        #[serde(default)]
        content: Option<String>,
    },

    /// The visible turn ended but spawned workers keep running.
    RunDeferred {
        /// Run id.
        run_id: RunId,
    },

    /// The run failed. Terminal.
    RunError {
        /// Run id.
        run_id: RunId,
        /// Error display string.
        error: String,
    },

    /// The run's state was cleared (new conversation).
    RunCleared {
        /// Run id.
        run_id: RunId,
    },
}

impl RunEvent {
    /// Run id.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::RunComplete { run_id, .. }
            | Self::RunDeferred { run_id }
            | Self::RunError { run_id, .. }
            | Self::RunCleared { run_id } => *run_id,
        }
    }

    /// Wire type string.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::RunComplete { .. } => "run_complete",
            Self::RunDeferred { .. } => "run_deferred",
            Self::RunError { .. } => "run_error",
            Self::RunCleared { .. } => "run_cleared",
        }
    }
}

/// Assistant message streaming events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum MessageEvent {
    /// An assistant placeholder was created.
    MessageQueued {
        /// Owning run.
        #[serde(default)]
        run_id: RunId,
        /// Message id.
        message_id: MessageId,
        /// Creation time (ms).
        #[serde(default, deserialize_with = "crate::time::deserialize_lenient_ms")]
        timestamp: Option<u64>,
    },

    /// A chunk of assistant text.
    MessageDelta {
        /// Owning run.
        #[serde(default)]
        run_id: RunId,
        /// Message id.
        message_id: MessageId,
        /// Text to append.
        delta: String,
        /// Characters of the message already streamed before this chunk.
        /// Lets a replayed chunk be recognised and dropped.
        #[serde(default)]
        offset: Option<usize>,
    },

    /// The assistant message is complete.
    MessageFinal {
        /// Owning run.
        #[serde(default)]
        run_id: RunId,
        /// Message id.
        message_id: MessageId,
        /// Full text, replacing anything streamed so far.
        content: String,
        /// Creation time (ms), when the message was not seen before.
        #[serde(default, deserialize_with = "crate::time::deserialize_lenient_ms")]
        timestamp: Option<u64>,
    },
}

impl MessageEvent {
    /// Owning run.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        match self {
            Self::MessageQueued { run_id, .. }
            | Self::MessageDelta { run_id, .. }
            | Self::MessageFinal { run_id, .. } => *run_id,
        }
    }

    /// Message id.
    #[must_use]
    pub const fn message_id(&self) -> &MessageId {
        match self {
            Self::MessageQueued { message_id, .. }
            | Self::MessageDelta { message_id, .. }
            | Self::MessageFinal { message_id, .. } => message_id,
        }
    }

    /// Wire type string.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::MessageQueued { .. } => "message_queued",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageFinal { .. } => "message_final",
        }
    }
}

/// Any inbound event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiveEvent {
    /// Tool call progress.
    Tool(ToolEvent),
    /// Run lifecycle.
    Run(RunEvent),
    /// Assistant message streaming.
    Message(MessageEvent),
}

impl LiveEvent {
    /// The run the event names (possibly unassigned).
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        match self {
            Self::Tool(e) => e.run_id(),
            Self::Run(e) => e.run_id(),
            Self::Message(e) => e.run_id(),
        }
    }

    /// Wire type string.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Tool(e) => e.event_type(),
            Self::Run(e) => e.event_type(),
            Self::Message(e) => e.event_type(),
        }
    }
}

impl From<ToolEvent> for LiveEvent {
    fn from(e: ToolEvent) -> Self {
        Self::Tool(e)
    }
}

impl From<RunEvent> for LiveEvent {
    fn from(e: RunEvent) -> Self {
        Self::Run(e)
    }
}

impl From<MessageEvent> for LiveEvent {
    fn from(e: MessageEvent) -> Self {
        Self::Message(e)
    }
}

/// An error reported in-band by the event transport.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("transport error: {message}")]
pub struct TransportError {
    /// Run whose stream failed, if the transport knows.
    pub run_id: Option<RunId>,
    /// Description.
    pub message: String,
    /// Whether the error ended the run.
    pub terminal: bool,
}

impl TransportError {
    /// A recoverable error (dropped frame, reconnect in progress).
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            run_id: None,
            message: message.into(),
            terminal: false,
        }
    }

    /// An error that ended the given run.
    #[must_use]
    pub fn terminal(run_id: RunId, message: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id),
            message: message.into(),
            terminal: true,
        }
    }
}

/// Decode one transport frame.
///
/// Accepts a bare JSON object or a server-sent-event `data:` line.
pub fn decode_frame(frame: &str) -> Result<LiveEvent, FrameError> {
    let trimmed = frame.trim();
    let payload = trimmed.strip_prefix("data:").map_or(trimmed, str::trim_start);
    if payload.is_empty() {
        return Err(FrameError::Empty);
    }
    Ok(serde_json::from_str(payload)?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
