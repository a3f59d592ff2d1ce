//! Dependency injection traits for the services reconnection talks to.
//!
//! The application provides HTTP/SSE implementations; tests provide fakes.
//! Every method is one suspension point of initialization, and every
//! failure is soft: the coordinator logs it and degrades.

use async_trait::async_trait;
use fiche_core::{LiveEvent, RunId, TransportError};
use tokio::sync::mpsc;

use crate::errors::CollaboratorError;
use crate::reconnect::history::HistorySnapshot;

/// Stream of events for one attached run. Closing the sender ends it.
pub type EventStream = mpsc::Receiver<Result<LiveEvent, TransportError>>;

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Asks the server whether a run is in flight for the current session.
#[async_trait]
pub trait ActiveRunLookup: Send + Sync {
    /// The active run, or `None` when the session is idle.
    async fn active_run(&self) -> Result<Option<RunId>, CollaboratorError>;
}

/// Fetches finalized history for the current session.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Messages and tool calls, nested worker calls included.
    async fn fetch_history(&self) -> Result<HistorySnapshot, CollaboratorError>;
}

/// Opens the live event stream of a run.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Attach to `run_id`. `buffer` is the channel capacity to allocate.
    async fn attach(&self, run_id: RunId, buffer: usize) -> Result<EventStream, CollaboratorError>;
}
