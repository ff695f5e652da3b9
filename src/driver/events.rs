//! Event record wire shapes emitted by a sandbox driver during `execute`.
//!
//! These are the same records that flow driver → bridge → manager →
//! subscriber → stream consumer, and the same shapes that cross the IPC wire
//! for `executeStream`. Using one strongly-typed enum everywhere means a typo
//! in a field name fails to compile rather than silently dropping data on the
//! floor at a dict boundary.

use crate::types::ExecutionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One event produced during or around a single `execute` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventRecord {
    Stream {
        name: StreamName,
        text: String,
    },
    DisplayData {
        data: HashMap<String, Value>,
        metadata: HashMap<String, Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_id: Option<String>,
    },
    UpdateDisplayData {
        data: HashMap<String, Value>,
        metadata: HashMap<String, Value>,
        display_id: String,
    },
    ExecuteInput {
        code: String,
        execution_count: u64,
    },
    ExecuteResult {
        execution_count: u64,
        data: HashMap<String, Value>,
        metadata: HashMap<String, Value>,
    },
    ExecuteError {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
    InputRequest {
        prompt: String,
        password: bool,
    },
    BackpressureDrop {
        dropped_count: u64,
    },
    ExecutionStalled {
        execution_id: ExecutionId,
        max_execution_time_ms: u64,
    },
}

/// stdout/stderr discriminator for `stream` events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamName {
    Stdout,
    Stderr,
}

impl EventRecord {
    /// Terminal events end an execution: exactly one of these closes the
    /// event sequence for a given `execute` call.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventRecord::ExecuteResult { .. } | EventRecord::ExecuteError { .. })
    }

    /// Events that must never be coalesced or dropped under backpressure.
    pub fn is_undroppable(&self) -> bool {
        matches!(
            self,
            EventRecord::DisplayData { .. }
                | EventRecord::ExecuteResult { .. }
                | EventRecord::ExecuteError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_event_is_not_terminal() {
        let e = EventRecord::Stream {
            name: StreamName::Stdout,
            text: "hi".into(),
        };
        assert!(!e.is_terminal());
        assert!(!e.is_undroppable());
    }

    #[test]
    fn execute_result_is_terminal_and_undroppable() {
        let e = EventRecord::ExecuteResult {
            execution_count: 1,
            data: HashMap::new(),
            metadata: HashMap::new(),
        };
        assert!(e.is_terminal());
        assert!(e.is_undroppable());
    }

    #[test]
    fn wire_tag_matches_spec_shape() {
        let e = EventRecord::ExecuteError {
            ename: "ZeroDivisionError".into(),
            evalue: "division by zero".into(),
            traceback: vec!["line 1".into()],
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "execute_error");
        assert_eq!(v["ename"], "ZeroDivisionError");
    }
}
