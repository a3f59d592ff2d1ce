//! Startup reconnection.
//!
//! On initialization the coordinator asks whether a run is already in
//! flight. If one is, it attaches to that run's live stream first and only
//! then reloads finalized history, so an answer that completes while we
//! were away is caught by one or the other. If none is (or the lookup
//! fails), it hydrates from history alone.

mod collaborators;
mod history;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fiche_core::RunId;
use fiche_settings::ReconnectSettings;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use collaborators::{ActiveRunLookup, EventStream, EventTransport, HistorySource};
pub use history::{
    HistoryMessage, HistoryNestedCall, HistorySnapshot, HistoryToolCall, HistoryWorker, Hydration, WireTimestamp,
};

use crate::session::{HydrateReport, LiveSession};

/// How an initialization ended.
#[derive(Debug)]
pub enum InitOutcome {
    /// No active run; the session was hydrated from history.
    Fresh {
        /// What history changed.
        report: HydrateReport,
    },
    /// Attached to the active run. Events flow through `pump` until the
    /// transport closes the stream.
    Reconnected {
        /// The active run.
        run_id: RunId,
        /// Task feeding the stream into the session; yields the number of
        /// items it consumed.
        pump: JoinHandle<usize>,
        /// History reloaded after attaching, if enabled.
        report: Option<HydrateReport>,
    },
    /// A run is active but attaching failed; history was loaded instead.
    AttachFailed {
        /// The active run.
        run_id: RunId,
        /// What history changed.
        report: HydrateReport,
    },
    /// Another initialization is still running.
    AlreadyInProgress,
}

/// Decides between fresh hydration and re-attaching on startup.
pub struct ReconnectionCoordinator {
    session: Arc<LiveSession>,
    lookup: Arc<dyn ActiveRunLookup>,
    history: Arc<dyn HistorySource>,
    transport: Arc<dyn EventTransport>,
    settings: ReconnectSettings,
    in_flight: AtomicBool,
}

impl ReconnectionCoordinator {
    /// Wire the coordinator to a session and its collaborators.
    pub fn new(
        session: Arc<LiveSession>,
        lookup: Arc<dyn ActiveRunLookup>,
        history: Arc<dyn HistorySource>,
        transport: Arc<dyn EventTransport>,
        settings: ReconnectSettings,
    ) -> Self {
        Self {
            session,
            lookup,
            history,
            transport,
            settings,
            in_flight: AtomicBool::new(false),
        }
    }

    /// The session being initialized.
    pub fn session(&self) -> &Arc<LiveSession> {
        &self.session
    }

    /// Run the startup check. Never fails: collaborator errors are logged
    /// and the session degrades to whatever could be loaded.
    ///
    /// Must be called inside a Tokio runtime (the stream pump is spawned).
    pub async fn initialize(&self) -> InitOutcome {
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            debug!("initialization already in progress");
            return InitOutcome::AlreadyInProgress;
        };

        match self.lookup_active_run().await {
            Some(run_id) => self.reattach(run_id).await,
            None => InitOutcome::Fresh {
                report: self.load_history(None).await,
            },
        }
    }

    async fn lookup_active_run(&self) -> Option<RunId> {
        match self.lookup.active_run().await {
            Ok(run) => run.and_then(RunId::assigned),
            Err(err) => {
                warn!(error = %err, category = err.category(), "active run lookup failed, starting fresh");
                None
            }
        }
    }

    async fn reattach(&self, run_id: RunId) -> InitOutcome {
        self.session.mark_reconnecting(run_id);

        match self.transport.attach(run_id, self.settings.transport_buffer).await {
            Ok(stream) => {
                info!(run_id = %run_id, "attached to active run");
                let pump = tokio::spawn(pump_events(Arc::clone(&self.session), run_id, stream));
                let report = if self.settings.reload_history_after_attach {
                    Some(self.load_history(Some(run_id)).await)
                } else {
                    None
                };
                InitOutcome::Reconnected { run_id, pump, report }
            }
            Err(err) => {
                warn!(run_id = %run_id, error = %err, "attaching to active run failed, loading history only");
                self.session.clear_reconnecting(run_id);
                InitOutcome::AttachFailed {
                    run_id,
                    report: self.load_history(Some(run_id)).await,
                }
            }
        }
    }

    async fn load_history(&self, active_run: Option<RunId>) -> HydrateReport {
        match self.history.fetch_history().await {
            Ok(snapshot) => {
                let spawn_tool_names = &self.session.store().settings().spawn_tool_names;
                let hydration = snapshot.into_hydration(spawn_tool_names, active_run);
                self.session.hydrate(hydration, active_run)
            }
            Err(err) => {
                warn!(error = %err, category = err.category(), "history fetch failed, continuing without history");
                HydrateReport::default()
            }
        }
    }
}

impl std::fmt::Debug for ReconnectionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectionCoordinator")
            .field("settings", &self.settings)
            .field("in_flight", &self.in_flight.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// Feed an attached stream into the session until the sender closes it.
/// Returns the number of items consumed.
pub async fn pump_events(session: Arc<LiveSession>, run_id: RunId, mut stream: EventStream) -> usize {
    let mut consumed = 0;
    while let Some(item) = stream.recv().await {
        session.apply_transport(run_id, item);
        consumed += 1;
    }
    debug!(run_id = %run_id, consumed, "event stream closed");
    consumed
}

/// Holds the in-flight flag; releases it on drop.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
