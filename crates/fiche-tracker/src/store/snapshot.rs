//! Immutable view of the tool call table.

use std::collections::{BTreeSet, HashMap};

use fiche_core::{RunId, ToolCall, ToolCallId};

/// The tool call table at one point in time.
///
/// Listeners and [`crate::timeline::merge`] read from a snapshot; the store
/// clones it lazily (copy-on-write) the next time it mutates while a
/// reader still holds the previous one.
#[derive(Clone, Debug, Default)]
pub struct ToolSnapshot {
    pub(crate) tools: HashMap<ToolCallId, ToolCall>,
    pub(crate) deferred_runs: BTreeSet<RunId>,
    pub(crate) version: u64,
}

impl ToolSnapshot {
    /// Look up a call by id.
    #[must_use]
    pub fn get(&self, call_id: &str) -> Option<&ToolCall> {
        self.tools.get(call_id)
    }

    /// Number of calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All calls, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &ToolCall> {
        self.tools.values()
    }

    /// Mutation counter. Bumped once per store operation.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Calls of one run, ordered by `started_at` (unknown last) then call id.
    #[must_use]
    pub fn tools_for_run(&self, run_id: RunId) -> Vec<&ToolCall> {
        let mut calls: Vec<&ToolCall> = self.tools.values().filter(|t| t.run_id == run_id).collect();
        calls.sort_by(|a, b| {
            start_key(a)
                .cmp(&start_key(b))
                .then_with(|| a.call_id.cmp(&b.call_id))
        });
        calls
    }

    /// Whether the run was marked deferred in the store.
    #[must_use]
    pub fn is_deferred(&self, run_id: RunId) -> bool {
        self.deferred_runs.contains(&run_id)
    }

    /// Spawn calls of a run whose worker is still spawned or running.
    #[must_use]
    pub fn active_workers(&self, run_id: RunId) -> Vec<&ToolCall> {
        self.tools_for_run(run_id)
            .into_iter()
            .filter(|t| t.has_active_worker())
            .collect()
    }

    /// Distinct runs referenced by at least one call.
    #[must_use]
    pub fn runs(&self) -> BTreeSet<RunId> {
        self.tools
            .values()
            .filter_map(|t| t.run_id.assigned())
            .collect()
    }
}

fn start_key(call: &ToolCall) -> u64 {
    call.progress.started_at.unwrap_or(u64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fiche_core::{ToolResult, WorkerState, WorkerStatus};

    fn call(id: &str, run: u64, started_at: Option<u64>) -> ToolCall {
        ToolCall::new(id.into(), "grep", RunId::new(run), started_at, ToolResult::Generic(None))
    }

    fn snapshot(calls: Vec<ToolCall>) -> ToolSnapshot {
        let mut snap = ToolSnapshot::default();
        for c in calls {
            let _ = snap.tools.insert(c.call_id.clone(), c);
        }
        snap
    }

    #[test]
    fn tools_for_run_orders_by_start_then_id() {
        let snap = snapshot(vec![
            call("c3", 1, Some(20)),
            call("c2", 1, Some(10)),
            call("c1", 1, Some(20)),
            call("c0", 1, None),
            call("x1", 2, Some(1)),
        ]);
        let ids: Vec<&str> = snap.tools_for_run(RunId::new(1)).iter().map(|t| t.call_id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c1", "c3", "c0"]);
    }

    #[test]
    fn active_workers_filters_finished() {
        let mut running = call("s1", 1, Some(1));
        running.result = ToolResult::SpawnWorker(WorkerState::spawned());
        let mut done = call("s2", 1, Some(2));
        let mut worker = WorkerState::spawned();
        assert!(worker.finish(WorkerStatus::Complete, None, None));
        done.result = ToolResult::SpawnWorker(worker);
        let snap = snapshot(vec![running, done, call("c1", 1, Some(3))]);

        let active: Vec<&str> = snap.active_workers(RunId::new(1)).iter().map(|t| t.call_id.as_str()).collect();
        assert_eq!(active, vec!["s1"]);
    }

    #[test]
    fn runs_skips_unassigned() {
        let snap = snapshot(vec![call("a", 0, None), call("b", 4, None), call("c", 4, None)]);
        assert_eq!(snap.runs().into_iter().collect::<Vec<_>>(), vec![RunId::new(4)]);
    }

    #[test]
    fn empty_snapshot() {
        let snap = ToolSnapshot::default();
        assert!(snap.is_empty());
        assert_eq!(snap.len(), 0);
        assert!(snap.get("c1").is_none());
        assert!(!snap.is_deferred(RunId::new(1)));
    }
}
