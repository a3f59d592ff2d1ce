//! Branded ID newtypes.
//!
//! Tool calls and messages are keyed by opaque strings issued by the server
//! (or generated locally for optimistic user messages). Each gets its own
//! newtype so a message id can never be used to look up a tool call.
//!
//! Runs are keyed by integers. [`RunId::UNASSIGNED`] (`0`) is the sentinel for
//! "not yet associated with a run" and is also what an absent `runId` field
//! deserializes to.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh local ID (UUID v7, time-ordered).
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Unique, immutable identifier of one tool invocation.
    ToolCallId
}

branded_id! {
    /// Unique identifier of a chat message.
    MessageId
}

/// Identifier of one conversational run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(u64);

impl RunId {
    /// Sentinel for records not yet associated with a run.
    pub const UNASSIGNED: Self = Self(0);

    /// Wrap a raw run number.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw run number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this id refers to an actual run.
    #[must_use]
    pub const fn is_assigned(self) -> bool {
        self.0 != 0
    }

    /// `None` for the unassigned sentinel.
    #[must_use]
    pub const fn assigned(self) -> Option<Self> {
        if self.is_assigned() { Some(self) } else { None }
    }
}

impl From<u64> for RunId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
