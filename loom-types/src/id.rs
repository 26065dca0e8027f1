//! Typed ID wrappers for sessions, runs, and trace correlation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed ID wrappers prevent mixing up session IDs, run IDs, etc. at a
/// call site. These are plain strings underneath — no UUID enforcement,
/// no format requirement.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new typed ID from anything that converts to String.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether this ID carries no value (the "absent" sentinel
            /// used in place of `Option<Id>` for fields like
            /// `ParentRunId` that are frequently empty).
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

typed_id!(SessionId, "Unique identifier for a conversation session.");
typed_id!(RunId, "Per-task identifier for one `ExecuteTask` invocation.");
typed_id!(
    ParentRunId,
    "RunId of the delegating run, for subagent/delegated runs. Empty when the run is a root."
);
typed_id!(LogId, "Per-request trace identifier, for log correlation.");
typed_id!(
    CorrelationId,
    "Root of the causal chain. Equal to the root run's own RunId."
);
typed_id!(UserId, "Optional external user identifier, for hook lookups.");
typed_id!(WorkflowId, "Identifier for a workflow snapshot's DAG.");

impl RunId {
    /// Whether this run is a root run (has no parent).
    pub fn is_root(parent: &ParentRunId) -> bool {
        parent.is_empty()
    }
}
