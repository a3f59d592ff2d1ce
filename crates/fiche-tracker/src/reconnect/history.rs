//! Finalized history as the server returns it, and its conversion into
//! store records.
//!
//! History carries the same fields as the live records, but timestamps may
//! arrive as epoch milliseconds or RFC 3339 strings and a spawn call's
//! worker travels inside the call's `result` metadata under `"worker"`.

use std::collections::BTreeSet;

use fiche_core::time::{float_timestamp_ms, parse_timestamp_ms};
use fiche_core::{
    CallProgress, ChatMessage, MessageId, MessageStatus, NestedToolCall, Role, RunId, ToolCall, ToolCallId,
    ToolResult, ToolStatus, WorkerState, WorkerStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A timestamp in either wire form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    /// Epoch milliseconds.
    Millis(u64),
    /// Epoch milliseconds with a fraction.
    Fractional(f64),
    /// RFC 3339 text or stringified milliseconds.
    Text(String),
}

impl WireTimestamp {
    /// Milliseconds, or `None` if the text does not parse.
    pub fn millis(&self) -> Option<u64> {
        match self {
            Self::Millis(ms) => Some(*ms),
            Self::Fractional(ms) => float_timestamp_ms(*ms),
            Self::Text(text) => parse_timestamp_ms(text),
        }
    }
}

impl From<u64> for WireTimestamp {
    fn from(ms: u64) -> Self {
        Self::Millis(ms)
    }
}

/// Response of the history fetch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistorySnapshot {
    /// Finalized messages.
    pub messages: Vec<HistoryMessage>,
    /// Top-level tool calls.
    pub tool_calls: Vec<HistoryToolCall>,
}

/// A message from history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    /// Message id.
    pub id: MessageId,
    /// Author.
    pub role: Role,
    /// Text.
    #[serde(default)]
    pub content: String,
    /// Creation time.
    #[serde(default)]
    pub timestamp: Option<WireTimestamp>,
    /// Assistant status; finalized history defaults to `final`.
    #[serde(default)]
    pub status: Option<MessageStatus>,
    /// Owning run.
    #[serde(default)]
    pub run_id: Option<RunId>,
}

/// A top-level tool call from history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryToolCall {
    /// Call id.
    pub call_id: ToolCallId,
    /// Tool name.
    pub tool_name: String,
    /// Owning run.
    #[serde(default)]
    pub run_id: RunId,
    /// Final status.
    pub status: ToolStatus,
    /// Start time.
    #[serde(default)]
    pub started_at: Option<WireTimestamp>,
    /// Completion time.
    #[serde(default)]
    pub completed_at: Option<WireTimestamp>,
    /// Recorded duration.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Argument display string.
    #[serde(default)]
    pub args_preview: Option<String>,
    /// Result display string.
    #[serde(default)]
    pub result_preview: Option<String>,
    /// Error display string.
    #[serde(default)]
    pub error: Option<String>,
    /// Metadata; carries `"worker"` for spawn calls.
    #[serde(default)]
    pub result: Option<Value>,
}

/// Worker metadata embedded in a spawn call's history `result`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryWorker {
    /// Worker status.
    pub status: WorkerStatus,
    /// Summary.
    #[serde(default)]
    pub summary: Option<String>,
    /// Error.
    #[serde(default)]
    pub error: Option<String>,
    /// Calls the worker made.
    #[serde(default)]
    pub nested_tools: Vec<HistoryNestedCall>,
}

/// A worker's tool call from history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryNestedCall {
    /// Call id.
    pub call_id: ToolCallId,
    /// Tool name.
    pub tool_name: String,
    /// Final status.
    pub status: ToolStatus,
    /// Start time.
    #[serde(default)]
    pub started_at: Option<WireTimestamp>,
    /// Completion time.
    #[serde(default)]
    pub completed_at: Option<WireTimestamp>,
    /// Recorded duration.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Argument display string.
    #[serde(default)]
    pub args_preview: Option<String>,
    /// Result display string.
    #[serde(default)]
    pub result_preview: Option<String>,
    /// Error display string.
    #[serde(default)]
    pub error: Option<String>,
}

/// History converted to store and chat records.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Hydration {
    /// Chat messages.
    pub messages: Vec<ChatMessage>,
    /// Tool call records.
    pub tools: Vec<ToolCall>,
}

impl Hydration {
    /// Every run referenced by a message or call.
    pub fn runs(&self) -> BTreeSet<RunId> {
        self.messages
            .iter()
            .filter_map(ChatMessage::run)
            .chain(self.tools.iter().filter_map(|t| t.run_id.assigned()))
            .collect()
    }
}

impl HistorySnapshot {
    /// Rebuild store records. `spawn_tool_names` decides which calls carry
    /// a worker when history sent no worker metadata; `live_run` is the run
    /// still executing on the server, if any.
    pub fn into_hydration(self, spawn_tool_names: &[String], live_run: Option<RunId>) -> Hydration {
        Hydration {
            messages: self.messages.into_iter().map(HistoryMessage::into_message).collect(),
            tools: self
                .tool_calls
                .into_iter()
                .map(|call| call.into_tool_call(spawn_tool_names, live_run))
                .collect(),
        }
    }
}

impl HistoryMessage {
    /// Convert to a chat message.
    pub fn into_message(self) -> ChatMessage {
        let status = match self.role {
            Role::User => None,
            Role::Assistant => Some(self.status.unwrap_or(MessageStatus::Final)),
        };
        ChatMessage {
            id: self.id,
            role: self.role,
            content: self.content,
            timestamp: self.timestamp.as_ref().and_then(WireTimestamp::millis),
            status,
            run_id: self.run_id,
        }
    }
}

impl HistoryToolCall {
    /// Convert to a store record, reconstructing the typed result.
    pub fn into_tool_call(self, spawn_tool_names: &[String], live_run: Option<RunId>) -> ToolCall {
        let progress = frozen_progress(
            self.status,
            self.started_at.as_ref(),
            self.completed_at.as_ref(),
            self.duration_ms,
        );
        let worker = self.result.as_ref().and_then(|bag| bag.get("worker")).and_then(|raw| {
            serde_json::from_value::<HistoryWorker>(raw.clone())
                .map_err(|err| {
                    warn!(call_id = %self.call_id, error = %err, "ignoring malformed worker metadata");
                })
                .ok()
        });

        let result = match worker {
            Some(worker) => ToolResult::SpawnWorker(worker.into_worker_state()),
            None if spawn_tool_names.contains(&self.tool_name) => {
                let live = live_run.is_some_and(|run| run == self.run_id);
                ToolResult::SpawnWorker(worker_from_call_status(self.status, live))
            }
            None => ToolResult::Generic(self.result),
        };

        ToolCall {
            call_id: self.call_id,
            tool_name: self.tool_name,
            run_id: self.run_id,
            progress,
            args_preview: self.args_preview,
            result_preview: self.result_preview,
            error: self.error,
            result,
        }
    }
}

impl HistoryWorker {
    /// Convert to the live worker state.
    pub fn into_worker_state(self) -> WorkerState {
        WorkerState {
            status: self.status,
            summary: self.summary,
            error: self.error,
            nested_tools: self
                .nested_tools
                .into_iter()
                .map(|nested| NestedToolCall {
                    progress: frozen_progress(
                        nested.status,
                        nested.started_at.as_ref(),
                        nested.completed_at.as_ref(),
                        nested.duration_ms,
                    ),
                    call_id: nested.call_id,
                    tool_name: nested.tool_name,
                    args_preview: nested.args_preview,
                    result_preview: nested.result_preview,
                    error: nested.error,
                })
                .collect(),
        }
    }
}

/// Progress with the duration frozen the same way a live terminal event
/// freezes it.
fn frozen_progress(
    status: ToolStatus,
    started_at: Option<&WireTimestamp>,
    completed_at: Option<&WireTimestamp>,
    duration_ms: Option<u64>,
) -> CallProgress {
    let mut progress = CallProgress::running(started_at.and_then(WireTimestamp::millis));
    let _ = progress.finish(status, completed_at.and_then(WireTimestamp::millis), duration_ms);
    progress
}

/// A spawn call without worker metadata.
///
/// A failed call takes its worker down with it. A completed call in the
/// live run may have handed its worker off (deferred runs), so the worker
/// stays running until live worker events say otherwise. In finished runs
/// the worker ended with the call.
fn worker_from_call_status(status: ToolStatus, live: bool) -> WorkerState {
    let mut worker = WorkerState::spawned();
    let _ = match status {
        ToolStatus::Failed => worker.finish(WorkerStatus::Failed, None, None),
        ToolStatus::Completed if !live => worker.finish(WorkerStatus::Complete, None, None),
        ToolStatus::Running | ToolStatus::Completed => worker.mark_running(),
    };
    worker
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
