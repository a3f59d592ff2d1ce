//! Merge rules for applying events and history records to the call table.
//!
//! Terminal statuses only ever move forward: a replayed `tool_started` or a
//! second `tool_completed` for a finished call changes nothing. Worker and
//! nested-call events still apply to a finished spawn call, because the
//! worker outlives the call that spawned it.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use fiche_core::tools::truncate_preview;
use fiche_core::{NestedToolCall, ToolCall, ToolCallId, ToolEvent, ToolResult, ToolStatus, WorkerState, WorkerStatus};
use fiche_settings::TrackingSettings;
use tracing::debug;

/// What a single upsert did to the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The call was unknown; a record was created.
    Created,
    /// An existing record changed.
    Updated,
    /// Nothing changed (replay, or an update to a finished call).
    Unchanged,
}

/// Apply one event to the table.
pub(crate) fn apply_event(
    tools: &mut HashMap<ToolCallId, ToolCall>,
    event: &ToolEvent,
    settings: &TrackingSettings,
) -> UpsertOutcome {
    let before = tools.get(event.call_id().as_str()).cloned();
    let call = ensure_call(tools, event, settings);
    apply_to_call(call, event, settings);

    match before {
        None => UpsertOutcome::Created,
        Some(prev) if prev == *call => UpsertOutcome::Unchanged,
        Some(_) => UpsertOutcome::Updated,
    }
}

/// Insert or merge one history record. Returns whether the table changed.
///
/// A finished live record is never replaced: only a worker that history
/// shows as finished is adopted into it. A running live record is replaced
/// only when history has the call finished.
pub(crate) fn load_record(
    tools: &mut HashMap<ToolCallId, ToolCall>,
    mut incoming: ToolCall,
    settings: &TrackingSettings,
) -> bool {
    truncate_record(&mut incoming, settings.preview_max_chars);

    match tools.entry(incoming.call_id.clone()) {
        Entry::Vacant(slot) => {
            let _ = slot.insert(incoming);
            true
        }
        Entry::Occupied(mut slot) => {
            let existing = slot.get_mut();
            if existing.progress.is_terminal() {
                let adopt_worker = existing.has_active_worker()
                    && incoming.worker().is_some_and(|w| !w.status.is_active());
                if adopt_worker {
                    existing.result = incoming.result;
                }
                adopt_worker
            } else if incoming.progress.is_terminal() {
                if !incoming.run_id.is_assigned() {
                    incoming.run_id = existing.run_id;
                }
                *existing = incoming;
                true
            } else {
                debug!(call_id = %existing.call_id, "keeping live record over running history record");
                false
            }
        }
    }
}

fn ensure_call<'t>(
    tools: &'t mut HashMap<ToolCallId, ToolCall>,
    event: &ToolEvent,
    settings: &TrackingSettings,
) -> &'t mut ToolCall {
    let run_id = event.run_id();
    let call = tools.entry(event.call_id().clone()).or_insert_with(|| {
        let (tool_name, started_at) = first_sighting(event);
        debug!(
            call_id = %event.call_id(),
            tool_name = %tool_name,
            run_id = %run_id,
            event = event.event_type(),
            "tracking new tool call"
        );
        let result = ToolResult::for_tool(&tool_name, &settings.spawn_tool_names);
        ToolCall::new(event.call_id().clone(), tool_name, run_id, started_at, result)
    });

    if !call.run_id.is_assigned() {
        call.run_id = run_id;
    } else if run_id.is_assigned() && run_id != call.run_id {
        debug!(
            call_id = %call.call_id,
            run_id = %call.run_id,
            event_run_id = %run_id,
            "ignoring conflicting run for tool call"
        );
    }
    call
}

/// Name and start time for a record created from `event`.
///
/// Worker and nested events do not carry the spawn call's name; the record
/// stays unnamed until a tool event supplies one.
fn first_sighting(event: &ToolEvent) -> (String, Option<u64>) {
    match event {
        ToolEvent::ToolStarted { tool_name, timestamp, .. } => (tool_name.clone(), *timestamp),
        ToolEvent::ToolUpdated { tool_name, timestamp, .. } => (tool_name.clone().unwrap_or_default(), *timestamp),
        ToolEvent::ToolCompleted {
            tool_name,
            timestamp,
            duration_ms,
            ..
        }
        | ToolEvent::ToolFailed {
            tool_name,
            timestamp,
            duration_ms,
            ..
        } => (tool_name.clone().unwrap_or_default(), back_dated(*timestamp, *duration_ms)),
        ToolEvent::WorkerSpawned { timestamp, .. } => (String::new(), *timestamp),
        ToolEvent::WorkerComplete { .. }
        | ToolEvent::WorkerFailed { .. }
        | ToolEvent::NestedToolStarted { .. }
        | ToolEvent::NestedToolCompleted { .. }
        | ToolEvent::NestedToolFailed { .. } => (String::new(), None),
    }
}

/// Start time implied by a terminal event seen before its start event.
fn back_dated(finished_at: Option<u64>, duration_ms: Option<u64>) -> Option<u64> {
    match (finished_at, duration_ms) {
        (Some(end), Some(duration)) => Some(end.saturating_sub(duration)),
        (end, _) => end,
    }
}

#[allow(clippy::too_many_lines)]
fn apply_to_call(call: &mut ToolCall, event: &ToolEvent, settings: &TrackingSettings) {
    let max = settings.preview_max_chars;
    match event {
        ToolEvent::ToolStarted {
            tool_name,
            timestamp,
            args_preview,
            ..
        } => {
            adopt_name(call, tool_name, settings);
            if call.progress.is_terminal() {
                skip_finished(call, event);
                return;
            }
            call.progress.backfill_start(*timestamp);
            set_preview(&mut call.args_preview, args_preview.as_deref(), max);
        }
        ToolEvent::ToolUpdated {
            tool_name,
            args_preview,
            result_preview,
            ..
        } => {
            if let Some(name) = tool_name {
                adopt_name(call, name, settings);
            }
            if call.progress.is_terminal() {
                skip_finished(call, event);
                return;
            }
            set_preview(&mut call.args_preview, args_preview.as_deref(), max);
            set_preview(&mut call.result_preview, result_preview.as_deref(), max);
        }
        ToolEvent::ToolCompleted {
            tool_name,
            timestamp,
            duration_ms,
            result_preview,
            result,
            ..
        } => {
            if let Some(name) = tool_name {
                adopt_name(call, name, settings);
            }
            if !call.progress.finish(ToolStatus::Completed, *timestamp, *duration_ms) {
                skip_finished(call, event);
                return;
            }
            set_preview(&mut call.result_preview, result_preview.as_deref(), max);
            if let (Some(value), ToolResult::Generic(meta)) = (result, &mut call.result) {
                *meta = Some(value.clone());
            }
            debug!(call_id = %call.call_id, duration_ms = ?call.progress.duration_ms, "tool call completed");
        }
        ToolEvent::ToolFailed {
            tool_name,
            timestamp,
            duration_ms,
            error,
            ..
        } => {
            if let Some(name) = tool_name {
                adopt_name(call, name, settings);
            }
            if !call.progress.finish(ToolStatus::Failed, *timestamp, *duration_ms) {
                skip_finished(call, event);
                return;
            }
            call.error = Some(truncate_preview(error, max));
            debug!(call_id = %call.call_id, duration_ms = ?call.progress.duration_ms, "tool call failed");
        }
        ToolEvent::WorkerSpawned { .. } => promote_to_spawn(call),
        ToolEvent::WorkerComplete { summary, .. } => {
            promote_to_spawn(call);
            let Some(worker) = call.worker_mut() else { return };
            if !worker.finish(WorkerStatus::Complete, summary.clone(), None) {
                debug!(call_id = %call.call_id, "ignoring completion of finished worker");
            }
        }
        ToolEvent::WorkerFailed { error, .. } => {
            promote_to_spawn(call);
            let Some(worker) = call.worker_mut() else { return };
            if !worker.finish(WorkerStatus::Failed, None, Some(truncate_preview(error, max))) {
                debug!(call_id = %call.call_id, "ignoring failure of finished worker");
            }
        }
        ToolEvent::NestedToolStarted {
            call_id,
            tool_name,
            timestamp,
            args_preview,
            ..
        } => {
            promote_to_spawn(call);
            let Some(worker) = call.worker_mut() else { return };
            let _ = worker.mark_running();
            let nested = nested_entry(worker, call_id, Some(tool_name), *timestamp);
            if nested.progress.is_terminal() {
                return;
            }
            nested.progress.backfill_start(*timestamp);
            set_preview(&mut nested.args_preview, args_preview.as_deref(), max);
        }
        ToolEvent::NestedToolCompleted {
            call_id,
            tool_name,
            timestamp,
            duration_ms,
            result_preview,
            ..
        } => {
            promote_to_spawn(call);
            let Some(worker) = call.worker_mut() else { return };
            let _ = worker.mark_running();
            let nested = nested_entry(worker, call_id, tool_name.as_deref(), back_dated(*timestamp, *duration_ms));
            if nested.progress.finish(ToolStatus::Completed, *timestamp, *duration_ms) {
                set_preview(&mut nested.result_preview, result_preview.as_deref(), max);
            }
        }
        ToolEvent::NestedToolFailed {
            call_id,
            tool_name,
            timestamp,
            duration_ms,
            error,
            ..
        } => {
            promote_to_spawn(call);
            let Some(worker) = call.worker_mut() else { return };
            let _ = worker.mark_running();
            let nested = nested_entry(worker, call_id, tool_name.as_deref(), back_dated(*timestamp, *duration_ms));
            if nested.progress.finish(ToolStatus::Failed, *timestamp, *duration_ms) {
                nested.error = Some(truncate_preview(error, max));
            }
        }
    }
}

/// Fill in a tool name the record was created without.
fn adopt_name(call: &mut ToolCall, tool_name: &str, settings: &TrackingSettings) {
    if !call.tool_name.is_empty() || tool_name.is_empty() {
        return;
    }
    call.tool_name = tool_name.to_owned();
    if call.result == ToolResult::Generic(None) {
        call.result = ToolResult::for_tool(tool_name, &settings.spawn_tool_names);
    }
}

/// Worker events prove the call is a spawn call, whatever its name.
fn promote_to_spawn(call: &mut ToolCall) {
    if !call.is_spawn() {
        debug!(call_id = %call.call_id, tool_name = %call.tool_name, "treating tool call as spawn call");
        call.result = ToolResult::SpawnWorker(WorkerState::spawned());
    }
}

fn nested_entry<'w>(
    worker: &'w mut WorkerState,
    call_id: &ToolCallId,
    tool_name: Option<&str>,
    started_at: Option<u64>,
) -> &'w mut NestedToolCall {
    let idx = if let Some(idx) = worker.nested_tools.iter().position(|t| t.call_id == *call_id) {
        idx
    } else {
        worker.nested_tools.push(NestedToolCall::new(
            call_id.clone(),
            tool_name.unwrap_or_default(),
            started_at,
        ));
        worker.nested_tools.len() - 1
    };
    let nested = &mut worker.nested_tools[idx];
    if let Some(name) = tool_name.filter(|_| nested.tool_name.is_empty()) {
        nested.tool_name = name.to_owned();
    }
    nested
}

fn set_preview(slot: &mut Option<String>, value: Option<&str>, max_chars: usize) {
    if let Some(text) = value {
        *slot = Some(truncate_preview(text, max_chars));
    }
}

fn truncate_record(call: &mut ToolCall, max_chars: usize) {
    for slot in [&mut call.args_preview, &mut call.result_preview, &mut call.error] {
        if let Some(text) = slot.as_deref() {
            *slot = Some(truncate_preview(text, max_chars));
        }
    }
    if let Some(worker) = call.worker_mut() {
        for nested in &mut worker.nested_tools {
            for slot in [&mut nested.args_preview, &mut nested.result_preview, &mut nested.error] {
                if let Some(text) = slot.as_deref() {
                    *slot = Some(truncate_preview(text, max_chars));
                }
            }
        }
    }
}

fn skip_finished(call: &ToolCall, event: &ToolEvent) {
    debug!(
        call_id = %call.call_id,
        status = call.status().as_str(),
        event = event.event_type(),
        "ignoring event for finished tool call"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use fiche_core::RunId;

    fn settings() -> TrackingSettings {
        TrackingSettings::default()
    }

    fn started(call_id: &str, name: &str, run: u64, ts: u64) -> ToolEvent {
        ToolEvent::ToolStarted {
            run_id: RunId::new(run),
            call_id: call_id.into(),
            tool_name: name.into(),
            timestamp: Some(ts),
            args_preview: None,
        }
    }

    fn completed(call_id: &str, run: u64, ts: u64, duration: Option<u64>) -> ToolEvent {
        ToolEvent::ToolCompleted {
            run_id: RunId::new(run),
            call_id: call_id.into(),
            tool_name: None,
            timestamp: Some(ts),
            duration_ms: duration,
            result_preview: Some("ok".into()),
            result: None,
        }
    }

    fn nested_started(parent: &str, call_id: &str, run: u64, ts: u64) -> ToolEvent {
        ToolEvent::NestedToolStarted {
            run_id: RunId::new(run),
            parent_call_id: parent.into(),
            call_id: call_id.into(),
            tool_name: "grep".into(),
            timestamp: Some(ts),
            args_preview: None,
        }
    }

    #[test]
    fn unknown_id_is_created_running() {
        let mut tools = HashMap::new();
        let outcome = apply_event(&mut tools, &started("c1", "web_search", 42, 1010), &settings());
        assert_eq!(outcome, UpsertOutcome::Created);
        let call = &tools["c1"];
        assert_eq!(call.status(), ToolStatus::Running);
        assert_eq!(call.run_id, RunId::new(42));
        assert_eq!(call.progress.started_at, Some(1010));
    }

    #[test]
    fn terminal_replay_is_unchanged() {
        let mut tools = HashMap::new();
        let _ = apply_event(&mut tools, &started("c1", "grep", 1, 100), &settings());
        assert_eq!(apply_event(&mut tools, &completed("c1", 1, 300, None), &settings()), UpsertOutcome::Updated);
        let after_first = tools["c1"].clone();

        assert_eq!(apply_event(&mut tools, &completed("c1", 1, 900, Some(5)), &settings()), UpsertOutcome::Unchanged);
        assert_eq!(apply_event(&mut tools, &started("c1", "grep", 1, 100), &settings()), UpsertOutcome::Unchanged);
        assert_eq!(tools["c1"], after_first);
        assert_eq!(tools["c1"].progress.duration_ms, Some(200));
    }

    #[test]
    fn completion_before_start_back_dates() {
        let mut tools = HashMap::new();
        let _ = apply_event(&mut tools, &completed("c1", 1, 500, Some(120)), &settings());
        let call = &tools["c1"];
        assert_eq!(call.status(), ToolStatus::Completed);
        assert_eq!(call.progress.started_at, Some(380));
        assert_eq!(call.progress.duration_ms, Some(120));
        assert!(call.tool_name.is_empty());

        let _ = apply_event(&mut tools, &started("c1", "grep", 1, 380), &settings());
        assert_eq!(tools["c1"].tool_name, "grep");
        assert_eq!(tools["c1"].status(), ToolStatus::Completed);
    }

    #[test]
    fn run_is_assigned_once() {
        let mut tools = HashMap::new();
        let _ = apply_event(&mut tools, &started("c1", "grep", 0, 1), &settings());
        assert_eq!(tools["c1"].run_id, RunId::UNASSIGNED);
        let _ = apply_event(&mut tools, &completed("c1", 7, 2, None), &settings());
        assert_eq!(tools["c1"].run_id, RunId::new(7));

        let mut other = HashMap::new();
        let _ = apply_event(&mut other, &started("c2", "grep", 3, 1), &settings());
        let _ = apply_event(&mut other, &completed("c2", 4, 2, None), &settings());
        assert_eq!(other["c2"].run_id, RunId::new(3));
    }

    #[test]
    fn previews_are_truncated() {
        let mut tools = HashMap::new();
        let event = ToolEvent::ToolStarted {
            run_id: RunId::new(1),
            call_id: "c1".into(),
            tool_name: "grep".into(),
            timestamp: Some(1),
            args_preview: Some("x".repeat(500)),
        };
        let _ = apply_event(&mut tools, &event, &settings());
        let preview = tools["c1"].args_preview.clone().unwrap();
        assert_eq!(preview.chars().count(), 201);
        assert!(preview.ends_with('…'));
    }

    #[test]
    fn generic_result_keeps_metadata() {
        let mut tools = HashMap::new();
        let _ = apply_event(&mut tools, &started("c1", "web_search", 1, 1), &settings());
        let event = ToolEvent::ToolCompleted {
            run_id: RunId::new(1),
            call_id: "c1".into(),
            tool_name: None,
            timestamp: Some(2),
            duration_ms: None,
            result_preview: None,
            result: Some(serde_json::json!({"hits": 3})),
        };
        let _ = apply_event(&mut tools, &event, &settings());
        assert_eq!(tools["c1"].result, ToolResult::Generic(Some(serde_json::json!({"hits": 3}))));
    }

    #[test]
    fn nested_event_creates_parent_and_worker() {
        let mut tools = HashMap::new();
        let outcome = apply_event(&mut tools, &nested_started("s1", "n1", 42, 50), &settings());
        assert_eq!(outcome, UpsertOutcome::Created);

        let parent = &tools["s1"];
        assert!(parent.tool_name.is_empty());
        assert!(parent.is_spawn());
        assert_eq!(parent.run_id, RunId::new(42));
        let worker = parent.worker().unwrap();
        assert_eq!(worker.status, WorkerStatus::Running);
        assert_eq!(worker.nested("n1").unwrap().status(), ToolStatus::Running);
    }

    #[test]
    fn late_start_names_call_created_by_worker_event() {
        let mut tools = HashMap::new();
        let _ = apply_event(&mut tools, &nested_started("s1", "n1", 42, 50), &settings());
        let outcome = apply_event(&mut tools, &started("s1", "spawn_worker", 42, 40), &settings());
        assert_eq!(outcome, UpsertOutcome::Updated);

        let parent = &tools["s1"];
        assert_eq!(parent.tool_name, "spawn_worker");
        assert!(parent.is_spawn());
        assert!(parent.worker().unwrap().nested("n1").is_some());
    }

    #[test]
    fn worker_updates_apply_after_parent_finished() {
        let mut tools = HashMap::new();
        let _ = apply_event(&mut tools, &started("s1", "spawn_commis", 1, 10), &settings());
        let _ = apply_event(&mut tools, &completed("s1", 1, 20, None), &settings());
        let outcome = apply_event(&mut tools, &nested_started("s1", "n1", 1, 30), &settings());
        assert_eq!(outcome, UpsertOutcome::Updated);

        let done = ToolEvent::NestedToolCompleted {
            run_id: RunId::new(1),
            parent_call_id: "s1".into(),
            call_id: "n1".into(),
            tool_name: None,
            timestamp: Some(90),
            duration_ms: None,
            result_preview: Some("3 matches".into()),
        };
        let _ = apply_event(&mut tools, &done, &settings());
        let nested = tools["s1"].worker().unwrap().nested("n1").unwrap().clone();
        assert_eq!(nested.progress.duration_ms, Some(60));

        assert_eq!(apply_event(&mut tools, &done, &settings()), UpsertOutcome::Unchanged);
    }

    #[test]
    fn worker_terminal_is_frozen() {
        let mut tools = HashMap::new();
        let _ = apply_event(&mut tools, &started("s1", "spawn_commis", 1, 10), &settings());
        let complete = ToolEvent::WorkerComplete {
            run_id: RunId::new(1),
            call_id: "s1".into(),
            summary: Some("found it".into()),
        };
        let failed = ToolEvent::WorkerFailed {
            run_id: RunId::new(1),
            call_id: "s1".into(),
            error: "late".into(),
        };
        assert_eq!(apply_event(&mut tools, &complete, &settings()), UpsertOutcome::Updated);
        assert_eq!(apply_event(&mut tools, &failed, &settings()), UpsertOutcome::Unchanged);
        let worker = tools["s1"].worker().unwrap();
        assert_eq!(worker.status, WorkerStatus::Complete);
        assert_eq!(worker.summary.as_deref(), Some("found it"));
    }

    #[test]
    fn worker_event_promotes_generic_call() {
        let mut tools = HashMap::new();
        let _ = apply_event(&mut tools, &started("c1", "delegate", 1, 10), &settings());
        assert!(!tools["c1"].is_spawn());
        let spawned = ToolEvent::WorkerSpawned {
            run_id: RunId::new(1),
            call_id: "c1".into(),
            timestamp: Some(11),
        };
        let _ = apply_event(&mut tools, &spawned, &settings());
        assert_matches!(tools["c1"].result, ToolResult::SpawnWorker(_));
    }

    #[test]
    fn load_never_downgrades_finished_record() {
        let mut tools = HashMap::new();
        let _ = apply_event(&mut tools, &started("c1", "grep", 1, 100), &settings());
        let _ = apply_event(&mut tools, &completed("c1", 1, 300, None), &settings());

        let stale = ToolCall::new("c1".into(), "grep", RunId::new(1), Some(100), ToolResult::Generic(None));
        assert!(!load_record(&mut tools, stale, &settings()));
        assert_eq!(tools["c1"].status(), ToolStatus::Completed);
        assert_eq!(tools["c1"].progress.duration_ms, Some(200));
    }

    #[test]
    fn load_replaces_running_with_finished() {
        let mut tools = HashMap::new();
        let _ = apply_event(&mut tools, &started("c1", "grep", 1, 100), &settings());
        let mut finished = ToolCall::new("c1".into(), "grep", RunId::UNASSIGNED, Some(100), ToolResult::Generic(None));
        assert!(finished.progress.finish(ToolStatus::Completed, Some(150), None));

        assert!(load_record(&mut tools, finished, &settings()));
        assert_eq!(tools["c1"].status(), ToolStatus::Completed);
        assert_eq!(tools["c1"].run_id, RunId::new(1));
    }

    #[test]
    fn load_adopts_finished_worker() {
        let mut tools = HashMap::new();
        let _ = apply_event(&mut tools, &started("s1", "spawn_commis", 1, 10), &settings());
        let _ = apply_event(&mut tools, &completed("s1", 1, 20, None), &settings());
        assert!(tools["s1"].has_active_worker());

        let mut record = tools["s1"].clone();
        let mut worker = WorkerState::spawned();
        assert!(worker.finish(WorkerStatus::Complete, Some("done".into()), None));
        record.result = ToolResult::SpawnWorker(worker);

        assert!(load_record(&mut tools, record, &settings()));
        assert!(!tools["s1"].has_active_worker());
    }
}
