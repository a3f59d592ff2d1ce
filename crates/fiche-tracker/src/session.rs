//! The single ingestion path for live events.
//!
//! [`LiveSession`] owns one [`ToolCallStore`], one [`RunLifecycleTracker`]
//! and one [`ChatLog`] and routes every inbound event to them. Locks on the
//! tracker and the chat log are never held while the store notifies its
//! listeners, so a listener may read any of the three.

use std::sync::Arc;

use fiche_core::{
    ChatMessage, FrameError, LiveEvent, MessageEvent, MessageId, MessageStatus, RunEvent, RunId, RunRecord,
    RunStatus, ToolEvent, ToolStatus, TransportError, decode_frame,
};
use fiche_settings::TrackingSettings;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::chat::ChatLog;
use crate::lifecycle::RunLifecycleTracker;
use crate::reconnect::Hydration;
use crate::store::{ToolCallStore, UpsertOutcome};
use crate::timeline::{TimelineEvent, merge};

/// What a history hydration changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HydrateReport {
    /// Messages inserted or replaced.
    pub messages: usize,
    /// Tool call records inserted or replaced.
    pub tools: usize,
    /// Runs seeded as complete.
    pub runs_seeded: usize,
}

/// Live state of one conversation.
pub struct LiveSession {
    store: Arc<ToolCallStore>,
    runs: Mutex<RunLifecycleTracker>,
    chat: Mutex<ChatLog>,
}

impl LiveSession {
    /// A session with a fresh store.
    pub fn new(settings: TrackingSettings) -> Self {
        Self::with_store(Arc::new(ToolCallStore::new(settings)))
    }

    /// A session around an existing store.
    pub fn with_store(store: Arc<ToolCallStore>) -> Self {
        Self {
            store,
            runs: Mutex::new(RunLifecycleTracker::new()),
            chat: Mutex::new(ChatLog::new()),
        }
    }

    /// The tool call store.
    pub fn store(&self) -> &Arc<ToolCallStore> {
        &self.store
    }

    /// Route one event.
    pub fn apply(&self, event: &LiveEvent) {
        match event {
            LiveEvent::Tool(e) => {
                let _ = self.apply_tool(e);
            }
            LiveEvent::Run(e) => self.apply_run(e),
            LiveEvent::Message(e) => {
                let _ = self.apply_message(e);
            }
        }
    }

    /// Decode and route one wire frame. Malformed frames are logged and
    /// dropped.
    pub fn apply_frame(&self, frame: &str) -> Result<(), FrameError> {
        match decode_frame(frame) {
            Ok(event) => {
                self.apply(&event);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "dropping malformed event frame");
                Err(err)
            }
        }
    }

    /// Route one item of an attached stream.
    ///
    /// A terminal transport error fails its run (`run_id` when the error
    /// names none); any other transport error is logged and skipped.
    pub fn apply_transport(&self, run_id: RunId, item: Result<LiveEvent, TransportError>) {
        match item {
            Ok(event) => self.apply(&event),
            Err(err) if err.terminal => {
                let run_id = err.run_id.unwrap_or(run_id);
                warn!(run_id = %run_id, error = %err, "event stream ended the run");
                self.fail_run(run_id, &err.message);
            }
            Err(err) => {
                warn!(run_id = %run_id, error = %err, "skipping transport error");
            }
        }
    }

    /// Tool, worker and nested tool events.
    pub fn apply_tool(&self, event: &ToolEvent) -> UpsertOutcome {
        let _ = self.runs.lock().tool_activity(event.run_id(), activity_status(event));
        let outcome = self.store.upsert(event);
        debug!(
            call_id = %event.call_id(),
            run_id = %event.run_id(),
            event = event.event_type(),
            outcome = ?outcome,
            "applied tool event"
        );
        outcome
    }

    /// Run lifecycle events.
    pub fn apply_run(&self, event: &RunEvent) {
        match event {
            RunEvent::RunStarted { run_id, .. } => {
                let _ = self.runs.lock().started(*run_id);
            }
            RunEvent::RunComplete {
                run_id,
                timestamp,
                message_id,
                content,
            } => {
                let _ = self.runs.lock().complete(*run_id);
                let _ = self
                    .chat
                    .lock()
                    .finalize_run(*run_id, message_id.as_ref(), content.as_deref(), *timestamp);
            }
            RunEvent::RunDeferred { run_id } => {
                let accepted = self.runs.lock().deferred(*run_id);
                if accepted {
                    let _ = self.store.mark_deferred(*run_id);
                }
            }
            RunEvent::RunError { run_id, error } => self.fail_run(*run_id, error),
            RunEvent::RunCleared { run_id } => {
                let _ = self.runs.lock().cleared(*run_id);
                let removed = self.store.clear_tools_for_run(*run_id);
                debug!(run_id = %run_id, removed, "cleared run tool calls");
            }
        }
    }

    /// Assistant message streaming events.
    pub fn apply_message(&self, event: &MessageEvent) -> bool {
        let _ = self.runs.lock().started(event.run_id());
        self.chat.lock().apply(event)
    }

    /// Append the user's own message (optimistic, before the server echoes
    /// a run id).
    pub fn push_user_message(
        &self,
        id: MessageId,
        content: impl Into<String>,
        timestamp: Option<u64>,
        run_id: Option<RunId>,
    ) -> bool {
        self.chat.lock().push_user(id, content, timestamp, run_id)
    }

    /// Attach the server's run id to an optimistic user message.
    pub fn assign_message_run(&self, id: &str, run_id: RunId) -> bool {
        self.chat.lock().assign_run(id, run_id)
    }

    /// Merge history into the session.
    ///
    /// Runs that history mentions are seeded as `complete`, except
    /// `active_run`, which is still in flight.
    pub fn hydrate(&self, hydration: Hydration, active_run: Option<RunId>) -> HydrateReport {
        let runs = hydration.runs();
        let runs_seeded = {
            let mut tracker = self.runs.lock();
            runs.into_iter()
                .filter(|run| Some(*run) != active_run)
                .filter(|run| tracker.seed_complete(*run))
                .count()
        };
        let messages = self.chat.lock().hydrate(hydration.messages);
        let tools = self.store.load_tools(hydration.tools);
        debug!(messages, tools, runs_seeded, "hydrated session from history");
        HydrateReport {
            messages,
            tools,
            runs_seeded,
        }
    }

    /// Flag a run as being re-attached.
    pub fn mark_reconnecting(&self, run_id: RunId) {
        self.runs.lock().mark_reconnecting(run_id);
    }

    /// Drop the re-attach flag.
    pub fn clear_reconnecting(&self, run_id: RunId) {
        self.runs.lock().clear_reconnecting(run_id);
    }

    /// Snapshot of the message list.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.chat.lock().messages().to_vec()
    }

    /// A run's record.
    pub fn run(&self, run_id: RunId) -> Option<RunRecord> {
        self.runs.lock().get(run_id).cloned()
    }

    /// A run's status as users see it (deferred reads `complete`).
    pub fn run_status(&self, run_id: RunId) -> RunStatus {
        self.runs
            .lock()
            .get(run_id)
            .map_or(RunStatus::Idle, RunRecord::display_status)
    }

    /// Whether the run is deferred.
    pub fn is_deferred(&self, run_id: RunId) -> bool {
        self.runs.lock().is_deferred(run_id)
    }

    /// Deferred runs whose workers may still be reporting.
    pub fn detached_runs(&self) -> Vec<RunId> {
        self.runs.lock().detached_runs()
    }

    /// Run `f` over the merged timeline of the current messages and tools.
    pub fn with_timeline<R>(&self, f: impl FnOnce(&[TimelineEvent<'_>]) -> R) -> R {
        let messages = self.messages();
        let snapshot = self.store.get_state();
        let events = merge(&messages, snapshot.iter());
        f(&events)
    }

    /// Ids of the merged timeline, in display order.
    pub fn timeline_ids(&self) -> Vec<String> {
        self.with_timeline(|events| events.iter().map(|e| e.id.to_owned()).collect())
    }

    /// Start a new conversation: forget every run, message and call.
    pub fn reset(&self) {
        self.runs.lock().reset();
        self.chat.lock().clear();
        self.store.clear_tools();
        debug!("session reset");
    }

    fn fail_run(&self, run_id: RunId, error: &str) {
        let _ = self.runs.lock().error(run_id, error);
        let _ = self.chat.lock().close_run(run_id, MessageStatus::Error);
    }
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("store", &self.store)
            .field("runs", &self.runs.lock().records().len())
            .field("messages", &self.chat.lock().len())
            .finish()
    }
}

/// Tool status an event reports, for the tracker.
fn activity_status(event: &ToolEvent) -> ToolStatus {
    match event {
        ToolEvent::ToolCompleted { .. } => ToolStatus::Completed,
        ToolEvent::ToolFailed { .. } => ToolStatus::Failed,
        _ => ToolStatus::Running,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
