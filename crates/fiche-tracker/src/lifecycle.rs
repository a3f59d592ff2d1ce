//! Per-run lifecycle state machine.
//!
//! `idle → running → {complete, failed}` with an orthogonal `deferred` flag.
//! Tool activity never finishes a run: only explicit run events do, because
//! a run may end its visible turn while its workers keep going.

use std::collections::HashMap;

use fiche_core::{RunId, RunRecord, RunStatus, ToolStatus};
use tracing::{debug, warn};

/// Run records keyed by run id.
#[derive(Clone, Debug, Default)]
pub struct RunLifecycleTracker {
    runs: HashMap<RunId, RunRecord>,
}

impl RunLifecycleTracker {
    /// An empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// The record of a run, if it was ever seen.
    pub fn get(&self, run_id: RunId) -> Option<&RunRecord> {
        self.runs.get(&run_id)
    }

    /// Lifecycle status (`idle` for unknown runs).
    pub fn status(&self, run_id: RunId) -> RunStatus {
        self.runs.get(&run_id).map_or(RunStatus::Idle, |r| r.status)
    }

    /// Whether the run is deferred.
    pub fn is_deferred(&self, run_id: RunId) -> bool {
        self.runs.get(&run_id).is_some_and(|r| r.is_deferred)
    }

    /// Whether the run is being re-attached.
    pub fn is_reconnecting(&self, run_id: RunId) -> bool {
        self.runs.get(&run_id).is_some_and(|r| r.is_reconnecting)
    }

    /// `idle → running`. Returns whether the status changed.
    pub fn started(&mut self, run_id: RunId) -> bool {
        let Some(record) = self.entry(run_id) else { return false };
        if record.status != RunStatus::Idle {
            return false;
        }
        record.status = RunStatus::Running;
        debug!(run_id = %run_id, "run started");
        true
    }

    /// A tool of the run made progress.
    ///
    /// Only promotes an idle run (the first event we see may be a tool
    /// event); never finishes one.
    pub fn tool_activity(&mut self, run_id: RunId, tool_status: ToolStatus) -> bool {
        let Some(record) = self.entry(run_id) else { return false };
        if record.status != RunStatus::Idle {
            return false;
        }
        record.status = RunStatus::Running;
        debug!(run_id = %run_id, tool_status = tool_status.as_str(), "run running after tool activity");
        true
    }

    /// The run finished its visible turn. No-op once terminal.
    pub fn complete(&mut self, run_id: RunId) -> bool {
        let Some(record) = self.entry(run_id) else { return false };
        record.is_reconnecting = false;
        if record.status.is_terminal() {
            return false;
        }
        record.status = RunStatus::Complete;
        debug!(run_id = %run_id, "run complete");
        true
    }

    /// The run failed. Recorded once; later errors are ignored.
    pub fn error(&mut self, run_id: RunId, error: &str) -> bool {
        let Some(record) = self.entry(run_id) else { return false };
        record.is_reconnecting = false;
        if record.status.is_terminal() {
            debug!(run_id = %run_id, status = ?record.status, "ignoring error for finished run");
            return false;
        }
        record.status = RunStatus::Failed;
        record.error = Some(error.to_owned());
        debug!(run_id = %run_id, error, "run failed");
        true
    }

    /// Mark the run deferred. Valid only from `running` or `complete`; the
    /// run reads `complete` from then on.
    pub fn deferred(&mut self, run_id: RunId) -> bool {
        let Some(record) = self.entry(run_id) else { return false };
        if !matches!(record.status, RunStatus::Running | RunStatus::Complete) {
            warn!(run_id = %run_id, status = ?record.status, "ignoring deferral of run that is not running");
            return false;
        }
        record.is_reconnecting = false;
        if record.is_deferred {
            return false;
        }
        record.status = RunStatus::Complete;
        record.is_deferred = true;
        debug!(run_id = %run_id, "run deferred");
        true
    }

    /// Reset the run to `idle`.
    ///
    /// Callers clear the run's tool calls from the store after this.
    pub fn cleared(&mut self, run_id: RunId) -> bool {
        let Some(record) = self.entry(run_id) else { return false };
        let changed = *record != RunRecord::idle(run_id);
        *record = RunRecord::idle(run_id);
        debug!(run_id = %run_id, "run cleared");
        changed
    }

    /// Flag the run as being re-attached. An idle run becomes `running`,
    /// because the server reported it active.
    pub fn mark_reconnecting(&mut self, run_id: RunId) {
        let Some(record) = self.entry(run_id) else { return };
        record.is_reconnecting = true;
        if record.status == RunStatus::Idle {
            record.status = RunStatus::Running;
        }
    }

    /// Drop the reconnecting flag.
    pub fn clear_reconnecting(&mut self, run_id: RunId) {
        if let Some(record) = self.runs.get_mut(&run_id) {
            record.is_reconnecting = false;
        }
    }

    /// Seed a run known from history as `complete` unless the tracker
    /// already knows more about it.
    pub fn seed_complete(&mut self, run_id: RunId) -> bool {
        let Some(record) = self.entry(run_id) else { return false };
        if record.status != RunStatus::Idle {
            return false;
        }
        record.status = RunStatus::Complete;
        true
    }

    /// Deferred runs: turn over, workers still running.
    pub fn detached_runs(&self) -> Vec<RunId> {
        let mut runs: Vec<RunId> = self.runs.values().filter(|r| r.is_deferred).map(|r| r.run_id).collect();
        runs.sort_unstable();
        runs
    }

    /// All records, ordered by run id.
    pub fn records(&self) -> Vec<&RunRecord> {
        let mut records: Vec<&RunRecord> = self.runs.values().collect();
        records.sort_unstable_by_key(|r| r.run_id);
        records
    }

    /// Forget every run.
    pub fn reset(&mut self) {
        self.runs.clear();
    }

    fn entry(&mut self, run_id: RunId) -> Option<&mut RunRecord> {
        if !run_id.is_assigned() {
            return None;
        }
        Some(self.runs.entry(run_id).or_insert_with(|| RunRecord::idle(run_id)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fiche_core::logging::capture_logs;
    use tracing::Level;

    const RUN: RunId = RunId::new(42);

    #[test]
    fn started_is_idempotent() {
        let mut tracker = RunLifecycleTracker::new();
        assert!(tracker.started(RUN));
        assert!(!tracker.started(RUN));
        assert_eq!(tracker.status(RUN), RunStatus::Running);
    }

    #[test]
    fn unknown_run_is_idle() {
        let tracker = RunLifecycleTracker::new();
        assert_eq!(tracker.status(RUN), RunStatus::Idle);
        assert!(tracker.get(RUN).is_none());
    }

    #[test]
    fn unassigned_run_is_ignored() {
        let mut tracker = RunLifecycleTracker::new();
        assert!(!tracker.started(RunId::UNASSIGNED));
        assert!(tracker.records().is_empty());
    }

    #[test]
    fn tool_activity_never_finishes_a_run() {
        let mut tracker = RunLifecycleTracker::new();
        assert!(tracker.tool_activity(RUN, ToolStatus::Running));
        assert!(!tracker.tool_activity(RUN, ToolStatus::Completed));
        assert!(!tracker.tool_activity(RUN, ToolStatus::Failed));
        assert_eq!(tracker.status(RUN), RunStatus::Running);
    }

    #[test]
    fn error_is_recorded_exactly_once() {
        let mut tracker = RunLifecycleTracker::new();
        let _ = tracker.started(RUN);
        assert!(tracker.error(RUN, "model overloaded"));
        assert!(!tracker.error(RUN, "second"));
        assert!(!tracker.complete(RUN));
        let record = tracker.get(RUN).unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("model overloaded"));
    }

    #[test]
    fn complete_is_terminal() {
        let mut tracker = RunLifecycleTracker::new();
        let _ = tracker.started(RUN);
        assert!(tracker.complete(RUN));
        assert!(!tracker.complete(RUN));
        assert!(!tracker.started(RUN));
        assert_eq!(tracker.status(RUN), RunStatus::Complete);
    }

    #[test]
    fn deferred_from_running_reads_complete() {
        let mut tracker = RunLifecycleTracker::new();
        let _ = tracker.started(RUN);
        assert!(tracker.deferred(RUN));
        assert!(tracker.is_deferred(RUN));
        assert_eq!(tracker.status(RUN), RunStatus::Complete);
        assert_eq!(tracker.get(RUN).unwrap().display_status(), RunStatus::Complete);
        assert_eq!(tracker.detached_runs(), vec![RUN]);
        assert!(!tracker.deferred(RUN));
    }

    #[test]
    fn deferred_from_complete_is_allowed() {
        let mut tracker = RunLifecycleTracker::new();
        let _ = tracker.started(RUN);
        let _ = tracker.complete(RUN);
        assert!(tracker.deferred(RUN));
        assert!(tracker.is_deferred(RUN));
    }

    #[test]
    fn deferred_from_idle_is_rejected_and_logged() {
        let (logs, _guard) = capture_logs();
        let mut tracker = RunLifecycleTracker::new();
        assert!(!tracker.deferred(RUN));
        assert!(!tracker.is_deferred(RUN));
        assert!(logs.has_event(Level::WARN, "ignoring deferral"));
        assert!(logs.has_field("run_id", "42"));
    }

    #[test]
    fn deferred_from_failed_is_rejected() {
        let mut tracker = RunLifecycleTracker::new();
        let _ = tracker.started(RUN);
        let _ = tracker.error(RUN, "boom");
        assert!(!tracker.deferred(RUN));
        assert_eq!(tracker.status(RUN), RunStatus::Failed);
    }

    #[test]
    fn cleared_resets_to_idle() {
        let mut tracker = RunLifecycleTracker::new();
        let _ = tracker.started(RUN);
        let _ = tracker.deferred(RUN);
        assert!(tracker.cleared(RUN));
        assert_eq!(tracker.status(RUN), RunStatus::Idle);
        assert!(!tracker.is_deferred(RUN));
        assert!(tracker.detached_runs().is_empty());
        assert!(tracker.started(RUN));
    }

    #[test]
    fn reconnecting_flag_clears_on_terminal_event() {
        let mut tracker = RunLifecycleTracker::new();
        tracker.mark_reconnecting(RUN);
        assert!(tracker.is_reconnecting(RUN));
        assert_eq!(tracker.status(RUN), RunStatus::Running);
        assert!(tracker.complete(RUN));
        assert!(!tracker.is_reconnecting(RUN));
    }

    #[test]
    fn seed_complete_does_not_override_live_state() {
        let mut tracker = RunLifecycleTracker::new();
        assert!(tracker.seed_complete(RunId::new(1)));
        assert_eq!(tracker.status(RunId::new(1)), RunStatus::Complete);

        let _ = tracker.started(RUN);
        assert!(!tracker.seed_complete(RUN));
        assert_eq!(tracker.status(RUN), RunStatus::Running);
    }

    #[test]
    fn records_are_ordered() {
        let mut tracker = RunLifecycleTracker::new();
        let _ = tracker.started(RunId::new(9));
        let _ = tracker.started(RunId::new(3));
        let ids: Vec<u64> = tracker.records().iter().map(|r| r.run_id.get()).collect();
        assert_eq!(ids, vec![3, 9]);
        tracker.reset();
        assert!(tracker.records().is_empty());
    }
}
