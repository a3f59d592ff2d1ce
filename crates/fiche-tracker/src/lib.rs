//! # fiche-tracker
//!
//! Live execution tracking for fiche runs.
//!
//! - [`ToolCallStore`]: observable table of tool calls and their workers
//! - [`RunLifecycleTracker`]: per-run status with the deferred flag
//! - [`timeline::merge`]: messages and tool calls in display order
//! - [`ReconnectionCoordinator`]: re-attach or hydrate on startup
//! - [`LiveSession`]: the one place inbound events enter
//!
//! Everything that reacts to events is synchronous. The only suspension
//! points are the three collaborator calls the coordinator makes and the
//! stream pump it spawns.

#![deny(unsafe_code)]

pub mod chat;
pub mod errors;
pub mod lifecycle;
pub mod reconnect;
pub mod session;
pub mod store;
pub mod timeline;

pub use chat::ChatLog;
pub use errors::CollaboratorError;
pub use lifecycle::RunLifecycleTracker;
pub use reconnect::{
    ActiveRunLookup, EventStream, EventTransport, HistorySnapshot, HistorySource, Hydration, InitOutcome,
    ReconnectionCoordinator, pump_events,
};
pub use session::{HydrateReport, LiveSession};
pub use store::{Subscription, ToolCallStore, ToolSnapshot, UpsertOutcome};
pub use timeline::{TimelineEvent, TimelineItem, TimelineKind, merge};
