//! Observable in-memory table of tool calls.
//!
//! [`ToolCallStore`] is constructed by the session that owns it and shared by
//! `Arc`. Every mutating call publishes a new [`ToolSnapshot`] and then
//! notifies each listener exactly once, synchronously, with no store lock
//! held (listeners may read the store or even mutate it again).

mod apply;
mod snapshot;

use std::sync::{Arc, Weak};

use fiche_core::{RunId, ToolCall, ToolEvent};
use fiche_settings::TrackingSettings;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

pub use apply::UpsertOutcome;
pub use snapshot::ToolSnapshot;

/// Callback invoked after every store mutation.
pub type Listener = Arc<dyn Fn(&Arc<ToolSnapshot>) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Table of tool call records keyed by call id.
pub struct ToolCallStore {
    settings: TrackingSettings,
    state: Mutex<Arc<ToolSnapshot>>,
    listeners: Arc<Mutex<Listeners>>,
}

impl ToolCallStore {
    /// Create an empty store.
    pub fn new(settings: TrackingSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(Arc::new(ToolSnapshot::default())),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        }
    }

    /// Tracking settings the store applies events with.
    pub fn settings(&self) -> &TrackingSettings {
        &self.settings
    }

    /// Current snapshot. Cheap; later mutations do not affect it.
    pub fn get_state(&self) -> Arc<ToolSnapshot> {
        Arc::clone(&self.state.lock())
    }

    /// Register a listener. It stays registered while the returned
    /// [`Subscription`] is alive.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<ToolSnapshot>) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock();
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.entries.push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// A channel that always holds the newest snapshot, for consumers that
    /// prefer awaiting over callbacks.
    pub fn watch(&self) -> (watch::Receiver<Arc<ToolSnapshot>>, Subscription) {
        let (tx, rx) = watch::channel(self.get_state());
        let subscription = self.subscribe(move |snapshot| {
            let _ = tx.send_if_modified(|current| {
                if snapshot.version() > current.version() {
                    *current = Arc::clone(snapshot);
                    true
                } else {
                    false
                }
            });
        });
        (rx, subscription)
    }

    /// Apply one tool event.
    pub fn upsert(&self, event: &ToolEvent) -> UpsertOutcome {
        self.mutate(|snap| apply::apply_event(&mut snap.tools, event, &self.settings))
    }

    /// Bulk-hydrate from history. Returns how many records changed the table.
    ///
    /// Existing finished records are never downgraded by an older history
    /// record.
    pub fn load_tools(&self, records: impl IntoIterator<Item = ToolCall>) -> usize {
        self.mutate(|snap| {
            let mut changed = 0;
            for record in records {
                if apply::load_record(&mut snap.tools, record, &self.settings) {
                    changed += 1;
                }
            }
            debug!(changed, total = snap.tools.len(), "loaded tool calls from history");
            changed
        })
    }

    /// Calls of one run, ordered by start time then call id.
    pub fn get_tools_for_run(&self, run_id: RunId) -> Vec<ToolCall> {
        self.get_state().tools_for_run(run_id).into_iter().cloned().collect()
    }

    /// Whether the run was marked deferred.
    pub fn is_deferred(&self, run_id: RunId) -> bool {
        self.state.lock().is_deferred(run_id)
    }

    /// Record that the run's visible turn ended while workers keep going.
    pub fn mark_deferred(&self, run_id: RunId) -> bool {
        self.mutate(|snap| snap.deferred_runs.insert(run_id))
    }

    /// Drop every record ("new conversation").
    pub fn clear_tools(&self) {
        self.mutate(|snap| {
            snap.tools.clear();
            snap.deferred_runs.clear();
        });
    }

    /// Drop the records of one run. Returns how many were removed.
    pub fn clear_tools_for_run(&self, run_id: RunId) -> usize {
        self.mutate(|snap| {
            let before = snap.tools.len();
            snap.tools.retain(|_, call| call.run_id != run_id);
            let _ = snap.deferred_runs.remove(&run_id);
            before - snap.tools.len()
        })
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut ToolSnapshot) -> R) -> R {
        let (result, published) = {
            let mut state = self.state.lock();
            let snap = Arc::make_mut(&mut *state);
            let result = f(snap);
            snap.version += 1;
            (result, Arc::clone(&state))
        };
        self.notify(&published);
        result
    }

    fn notify(&self, snapshot: &Arc<ToolSnapshot>) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(snapshot);
        }
    }
}

impl std::fmt::Debug for ToolCallStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ToolCallStore")
            .field("tools", &state.len())
            .field("version", &state.version())
            .field("listeners", &self.listeners.lock().entries.len())
            .finish()
    }
}

/// Keeps a listener registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    /// Unsubscribe now.
    pub fn unsubscribe(self) {}

    /// Keep the listener registered for the life of the store.
    pub fn detach(mut self) {
        self.listeners = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use fiche_core::{ToolResult, ToolStatus};

    fn store() -> Arc<ToolCallStore> {
        Arc::new(ToolCallStore::new(TrackingSettings::default()))
    }

    fn started(call_id: &str, run: u64, ts: u64) -> ToolEvent {
        ToolEvent::ToolStarted {
            run_id: RunId::new(run),
            call_id: call_id.into(),
            tool_name: "web_search".into(),
            timestamp: Some(ts),
            args_preview: None,
        }
    }

    fn completed(call_id: &str, run: u64, ts: u64) -> ToolEvent {
        ToolEvent::ToolCompleted {
            run_id: RunId::new(run),
            call_id: call_id.into(),
            tool_name: None,
            timestamp: Some(ts),
            duration_ms: None,
            result_preview: None,
            result: None,
        }
    }

    fn counter(store: &ToolCallStore) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let sub = store.subscribe(move |_| {
            let _ = seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    #[test]
    fn notifies_once_per_operation() {
        let store = store();
        let (count, _sub) = counter(&store);

        let _ = store.upsert(&started("c1", 1, 10));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // a no-op replay still notifies exactly once
        let _ = store.upsert(&completed("c1", 1, 20));
        let _ = store.upsert(&completed("c1", 1, 20));
        assert_eq!(count.load(Ordering::SeqCst), 3);

        let _ = store.load_tools(Vec::new());
        store.clear_tools();
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn listener_sees_post_mutation_state() {
        let store = store();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        let _sub = store.subscribe(move |snap| {
            sink.lock().push(snap.get("c1").map(ToolCall::status));
        });

        let _ = store.upsert(&started("c1", 1, 10));
        let _ = store.upsert(&completed("c1", 1, 20));
        assert_eq!(
            *statuses.lock(),
            vec![Some(ToolStatus::Running), Some(ToolStatus::Completed)]
        );
    }

    #[test]
    fn listener_may_read_the_store() {
        let store = store();
        let inner = Arc::clone(&store);
        let lens = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lens);
        let _sub = store.subscribe(move |_| {
            sink.lock().push(inner.get_state().len());
        });
        let _ = store.upsert(&started("c1", 1, 10));
        assert_eq!(*lens.lock(), vec![1]);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let store = store();
        let (count, sub) = counter(&store);
        let _ = store.upsert(&started("c1", 1, 10));
        sub.unsubscribe();
        let _ = store.upsert(&started("c2", 1, 11));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detached_subscription_keeps_listening() {
        let store = store();
        let (count, sub) = counter(&store);
        sub.detach();
        let _ = store.upsert(&started("c1", 1, 10));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn snapshots_are_copy_on_write() {
        let store = store();
        let _ = store.upsert(&started("c1", 1, 10));
        let before = store.get_state();
        let _ = store.upsert(&completed("c1", 1, 20));

        assert_eq!(before.get("c1").unwrap().status(), ToolStatus::Running);
        assert_eq!(store.get_state().get("c1").unwrap().status(), ToolStatus::Completed);
        assert!(store.get_state().version() > before.version());
    }

    #[test]
    fn clear_for_run_keeps_other_runs() {
        let store = store();
        let _ = store.upsert(&started("a", 1, 10));
        let _ = store.upsert(&started("b", 1, 11));
        let _ = store.upsert(&started("c", 2, 12));
        assert!(store.mark_deferred(RunId::new(1)));

        assert_eq!(store.clear_tools_for_run(RunId::new(1)), 2);
        assert!(store.get_tools_for_run(RunId::new(1)).is_empty());
        assert_eq!(store.get_tools_for_run(RunId::new(2)).len(), 1);
        assert!(!store.is_deferred(RunId::new(1)));
    }

    #[test]
    fn clear_tools_drops_everything() {
        let store = store();
        let _ = store.upsert(&started("a", 1, 10));
        let _ = store.mark_deferred(RunId::new(1));
        store.clear_tools();
        assert!(store.get_state().is_empty());
        assert!(!store.is_deferred(RunId::new(1)));
    }

    #[test]
    fn load_tools_counts_changes() {
        let store = store();
        let record = ToolCall::new("h1".into(), "grep", RunId::new(3), Some(5), ToolResult::Generic(None));
        assert_eq!(store.load_tools(vec![record.clone()]), 1);
        // a running record never overwrites a known one
        assert_eq!(store.load_tools(vec![record]), 0);
        assert_eq!(store.get_tools_for_run(RunId::new(3)).len(), 1);
    }

    #[tokio::test]
    async fn watch_tracks_latest_snapshot() {
        let store = store();
        let (mut rx, _sub) = store.watch();
        let _ = store.upsert(&started("c1", 1, 10));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);
    }
}
