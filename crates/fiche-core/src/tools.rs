//! Tool call records.
//!
//! A [`ToolCall`] is one row per tool invocation. Its lifecycle lives in
//! [`CallProgress`], shared with [`NestedToolCall`] so both follow the same
//! duration-freeze rule: the first terminal transition captures
//! `duration_ms` and nothing afterwards changes it.
//!
//! Spawn tools carry a [`WorkerState`] in their [`ToolResult`]; every other
//! tool carries an opaque metadata value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{RunId, ToolCallId};
use crate::time::elapsed_ms;

/// Status of a tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Started and not yet finished.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl ToolStatus {
    /// Whether the status can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Wire string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Status and timing of a call, frozen on the first terminal transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallProgress {
    /// Current status.
    pub status: ToolStatus,
    /// When the call started (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    /// When the call reached a terminal status (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    /// Captured once at completion or failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl CallProgress {
    /// A call that is running since `started_at`.
    #[must_use]
    pub const fn running(started_at: Option<u64>) -> Self {
        Self {
            status: ToolStatus::Running,
            started_at,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Whether the status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record a start time if none is known yet.
    ///
    /// Happens when the first sighting of a call was a later event.
    pub fn backfill_start(&mut self, at: Option<u64>) {
        if self.started_at.is_none() {
            self.started_at = at;
        }
    }

    /// Move to a terminal status.
    ///
    /// The reported duration wins over one derived from timestamps. Returns
    /// `false` (and changes nothing) if the call is already terminal or
    /// `outcome` is not terminal.
    pub fn finish(&mut self, outcome: ToolStatus, at: Option<u64>, reported_duration: Option<u64>) -> bool {
        if self.is_terminal() || !outcome.is_terminal() {
            return false;
        }
        self.status = outcome;
        self.completed_at = at;
        self.duration_ms = reported_duration.or_else(|| match (self.started_at, at) {
            (Some(start), Some(end)) => Some(elapsed_ms(start, end)),
            _ => None,
        });
        true
    }
}

/// Status of a spawned sub-agent worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Spawned, no activity yet.
    Spawned,
    /// Making tool calls.
    Running,
    /// Finished successfully.
    Complete,
    /// Finished with an error.
    Failed,
}

impl WorkerStatus {
    /// Still spawned or running.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Spawned | Self::Running)
    }
}

/// A tool call made by a worker. Belongs to its parent call, not to a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedToolCall {
    /// Unique call id.
    pub call_id: ToolCallId,
    /// Tool name.
    pub tool_name: String,
    /// Status and timing.
    #[serde(flatten)]
    pub progress: CallProgress,
    /// Display string for the arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args_preview: Option<String>,
    /// Display string for the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_preview: Option<String>,
    /// Error display string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NestedToolCall {
    /// A running nested call.
    #[must_use]
    pub fn new(call_id: ToolCallId, tool_name: impl Into<String>, started_at: Option<u64>) -> Self {
        Self {
            call_id,
            tool_name: tool_name.into(),
            progress: CallProgress::running(started_at),
            args_preview: None,
            result_preview: None,
            error: None,
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> ToolStatus {
        self.progress.status
    }
}

/// State of the sub-agent carried by a spawn tool call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerState {
    /// Worker status.
    pub status: WorkerStatus,
    /// Final summary once complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Error display string once failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tool calls made by the worker, in first-seen order.
    #[serde(default)]
    pub nested_tools: Vec<NestedToolCall>,
}

impl WorkerState {
    /// A freshly spawned worker.
    #[must_use]
    pub const fn spawned() -> Self {
        Self {
            status: WorkerStatus::Spawned,
            summary: None,
            error: None,
            nested_tools: Vec::new(),
        }
    }

    /// Look up a nested call.
    #[must_use]
    pub fn nested(&self, call_id: &str) -> Option<&NestedToolCall> {
        self.nested_tools.iter().find(|t| t.call_id.as_str() == call_id)
    }

    /// Look up a nested call for mutation.
    pub fn nested_mut(&mut self, call_id: &str) -> Option<&mut NestedToolCall> {
        self.nested_tools.iter_mut().find(|t| t.call_id.as_str() == call_id)
    }

    /// `spawned → running`. Returns whether the status changed.
    pub fn mark_running(&mut self) -> bool {
        if self.status == WorkerStatus::Spawned {
            self.status = WorkerStatus::Running;
            true
        } else {
            false
        }
    }

    /// Move to `complete` or `failed`. Terminal worker states are frozen.
    pub fn finish(&mut self, outcome: WorkerStatus, summary: Option<String>, error: Option<String>) -> bool {
        if !self.status.is_active() || outcome.is_active() {
            return false;
        }
        self.status = outcome;
        if summary.is_some() {
            self.summary = summary;
        }
        if error.is_some() {
            self.error = error;
        }
        true
    }
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::spawned()
    }
}

/// Result payload of a tool call, discriminated by tool name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ToolResult {
    /// Any non-spawn tool: opaque metadata, if the server sent any.
    Generic(Option<Value>),
    /// A spawn tool: the worker it started.
    SpawnWorker(WorkerState),
}

impl ToolResult {
    /// The initial result for a tool, given the configured spawn tool names.
    #[must_use]
    pub fn for_tool(tool_name: &str, spawn_tool_names: &[String]) -> Self {
        if spawn_tool_names.iter().any(|n| n == tool_name) {
            Self::SpawnWorker(WorkerState::spawned())
        } else {
            Self::Generic(None)
        }
    }
}

impl Default for ToolResult {
    fn default() -> Self {
        Self::Generic(None)
    }
}

/// One tool invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Primary key. Never changes once created.
    pub call_id: ToolCallId,
    /// Tool name.
    pub tool_name: String,
    /// Owning run, or [`RunId::UNASSIGNED`].
    #[serde(default)]
    pub run_id: RunId,
    /// Status and timing.
    #[serde(flatten)]
    pub progress: CallProgress,
    /// Display string for the arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args_preview: Option<String>,
    /// Display string for the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_preview: Option<String>,
    /// Error display string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Typed result payload.
    #[serde(default)]
    pub result: ToolResult,
}

impl ToolCall {
    /// A running call with the given initial result payload.
    #[must_use]
    pub fn new(
        call_id: ToolCallId,
        tool_name: impl Into<String>,
        run_id: RunId,
        started_at: Option<u64>,
        result: ToolResult,
    ) -> Self {
        Self {
            call_id,
            tool_name: tool_name.into(),
            run_id,
            progress: CallProgress::running(started_at),
            args_preview: None,
            result_preview: None,
            error: None,
            result,
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> ToolStatus {
        self.progress.status
    }

    /// Whether this call spawned a worker.
    #[must_use]
    pub const fn is_spawn(&self) -> bool {
        matches!(self.result, ToolResult::SpawnWorker(_))
    }

    /// The worker, for spawn calls.
    #[must_use]
    pub const fn worker(&self) -> Option<&WorkerState> {
        match &self.result {
            ToolResult::SpawnWorker(w) => Some(w),
            ToolResult::Generic(_) => None,
        }
    }

    /// The worker, for spawn calls, mutably.
    pub fn worker_mut(&mut self) -> Option<&mut WorkerState> {
        match &mut self.result {
            ToolResult::SpawnWorker(w) => Some(w),
            ToolResult::Generic(_) => None,
        }
    }

    /// Whether the call has a worker that is still spawned or running.
    #[must_use]
    pub fn has_active_worker(&self) -> bool {
        self.worker().is_some_and(|w| w.status.is_active())
    }
}

/// Truncate a display string to `max_chars` characters, appending `…`.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_owned(),
        Some((byte_idx, _)) => {
            let mut out = text[..byte_idx].to_owned();
            out.push('…');
            out
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
