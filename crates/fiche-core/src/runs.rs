//! Run lifecycle records.

use serde::{Deserialize, Serialize};

use crate::ids::RunId;

/// Lifecycle status of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Not started, or reset by a clear.
    #[default]
    Idle,
    /// In progress.
    Running,
    /// Finished.
    Complete,
    /// Finished with an error.
    Failed,
}

impl RunStatus {
    /// `complete` or `failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Per-run lifecycle record.
///
/// `is_deferred` is orthogonal to `status`: a deferred run reads `complete`
/// while its workers keep running in the background.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    /// Run id.
    pub run_id: RunId,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Visible turn ended, workers still running.
    pub is_deferred: bool,
    /// Being re-attached after a reload.
    #[serde(default)]
    pub is_reconnecting: bool,
    /// Error recorded by the terminal `run_error` event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    /// An idle record.
    #[must_use]
    pub const fn idle(run_id: RunId) -> Self {
        Self {
            run_id,
            status: RunStatus::Idle,
            is_deferred: false,
            is_reconnecting: false,
            error: None,
        }
    }

    /// Status as external consumers see it. Deferred runs render as complete.
    #[must_use]
    pub const fn display_status(&self) -> RunStatus {
        if self.is_deferred {
            RunStatus::Complete
        } else {
            self.status
        }
    }
}
