//! Typed identifiers for workflows, runs and node executions.
//!
//! Each id is a ULID, so ids of the same kind sort by creation time. The
//! text form carries a kind prefix (`run_01H...`) in `Display` and in JSON;
//! parsing also accepts the bare ULID.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// An id string that is not a valid id of the expected kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    pub kind: &'static str,
    pub input: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not a valid {} id", self.input, self.kind)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Ulid);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Milliseconds since the Unix epoch at which the id was minted.
            #[must_use]
            pub fn timestamp_ms(&self) -> u64 {
                self.0.timestamp_ms()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                raw.parse::<Ulid>().map(Self).map_err(|_| ParseIdError {
                    kind: $prefix,
                    input: s.to_string(),
                })
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseIdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.to_string()
            }
        }
    };
}

define_id!(
    /// A stored workflow definition.
    WorkflowId,
    "wf"
);

define_id!(
    /// One execution of a workflow.
    WorkflowRunId,
    "run"
);

define_id!(
    /// One node's execution within a run.
    NodeExecutionId,
    "nexec"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_form_round_trips_with_prefix() {
        let id = WorkflowRunId::new();
        let text = id.to_string();
        assert!(text.starts_with("run_"));
        assert_eq!(text.parse::<WorkflowRunId>(), Ok(id));
        assert!(NodeExecutionId::new().to_string().starts_with("nexec_"));
    }

    #[test]
    fn bare_ulid_is_accepted() {
        let ulid = Ulid::new();
        let id: WorkflowId = ulid.to_string().parse().expect("parse");
        assert_eq!(id.to_string(), format!("wf_{ulid}"));
    }

    #[test]
    fn wrong_or_garbage_input_is_rejected() {
        let err = "run_not-a-ulid"
            .parse::<WorkflowRunId>()
            .expect_err("garbage");
        assert_eq!(err.kind, "run");
        assert_eq!(err.to_string(), "'run_not-a-ulid' is not a valid run id");

        let workflow = WorkflowId::new().to_string();
        assert!(workflow.parse::<WorkflowRunId>().is_err());
    }

    #[test]
    fn json_uses_prefixed_text() {
        let id = WorkflowRunId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{id}\""));
        let back: WorkflowRunId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
        assert!(serde_json::from_str::<WorkflowRunId>("\"nope\"").is_err());
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let first = WorkflowRunId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = WorkflowRunId::new();
        assert!(first < second);
        assert!(first.timestamp_ms() <= second.timestamp_ms());
    }
}
