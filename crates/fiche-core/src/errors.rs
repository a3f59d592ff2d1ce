//! Error types for decoding inbound event frames.

use thiserror::Error;

/// A frame from the event transport could not be decoded.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame had no payload (keep-alive or blank line).
    #[error("empty frame")]
    Empty,

    /// The payload was not a known event shape.
    #[error("malformed event frame: {0}")]
    Json(#[from] serde_json::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
