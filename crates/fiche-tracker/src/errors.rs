//! Errors surfaced by the external collaborators.
//!
//! None of these escape the tracking core: the reconnection coordinator
//! catches each one at the await point, logs it, and degrades as described
//! on [`crate::reconnect::ReconnectionCoordinator`].

use thiserror::Error;

/// A collaborator call (active-run lookup, history fetch, transport attach)
/// failed.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The request never got a response (network, timeout, refused).
    #[error("request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP-style status code.
        status: u16,
        /// Response body or reason.
        body: String,
    },

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The collaborator was shut down.
    #[error("collaborator closed")]
    Closed,
}

impl CollaboratorError {
    /// Short category string for structured log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Status { .. } => "status",
            Self::Decode(_) => "decode",
            Self::Closed => "closed",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
