//! # fiche-core
//!
//! Shared vocabulary for live fiche run tracking.
//!
//! - **Ids**: `ToolCallId`, `MessageId` as branded newtypes, `RunId` with its
//!   unassigned sentinel
//! - **Tool calls**: `ToolCall`, `NestedToolCall`, `WorkerState`, and the typed
//!   `ToolResult` union
//! - **Messages**: `ChatMessage` with role and assistant status
//! - **Runs**: `RunRecord` and `RunStatus`
//! - **Events**: the closed set of inbound `LiveEvent` shapes and frame decoding
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod runs;
pub mod time;
pub mod tools;

pub use errors::FrameError;
pub use events::{LiveEvent, MessageEvent, RunEvent, ToolEvent, TransportError, decode_frame};
pub use ids::{MessageId, RunId, ToolCallId};
pub use messages::{ChatMessage, MessageStatus, Role};
pub use runs::{RunRecord, RunStatus};
pub use tools::{CallProgress, NestedToolCall, ToolCall, ToolResult, ToolStatus, WorkerState, WorkerStatus};
