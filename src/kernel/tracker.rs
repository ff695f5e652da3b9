//! Execution Tracker (C6): bookkeeping for in-flight executions.
//!
//! Owned directly by the manager rather than wrapped in its own lock — the
//! manager is itself the single serialization point, so this is plain
//! `&mut self` state.

use crate::types::{ExecutionId, KernelId};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Snapshot returned by `info()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionInfo {
    pub count: usize,
    pub stuck: bool,
    pub longest_running_ms: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct ExecutionTracker {
    ongoing: HashMap<KernelId, HashSet<ExecutionId>>,
    started_at: HashMap<KernelId, HashMap<ExecutionId, Instant>>,
    last_activity: HashMap<KernelId, DateTime<Utc>>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking a new execution on `kernel_id`. Caller supplies the ID
    /// (allocated once, up front, so it can be echoed back to the caller
    /// before the execution completes).
    pub fn begin(&mut self, kernel_id: &KernelId, execution_id: ExecutionId) {
        self.ongoing.entry(kernel_id.clone()).or_default().insert(execution_id.clone());
        self.started_at
            .entry(kernel_id.clone())
            .or_default()
            .insert(execution_id, Instant::now());
        self.touch_activity(kernel_id);
    }

    /// Mark an execution complete. No-op if it was never begun (e.g. double
    /// completion after a cancelled stream).
    pub fn end(&mut self, kernel_id: &KernelId, execution_id: &ExecutionId) {
        if let Some(set) = self.ongoing.get_mut(kernel_id) {
            set.remove(execution_id);
        }
        if let Some(starts) = self.started_at.get_mut(kernel_id) {
            starts.remove(execution_id);
        }
        self.touch_activity(kernel_id);
    }

    pub fn touch_activity(&mut self, kernel_id: &KernelId) {
        self.last_activity.insert(kernel_id.clone(), Utc::now());
    }

    pub fn last_activity(&self, kernel_id: &KernelId) -> Option<DateTime<Utc>> {
        self.last_activity.get(kernel_id).copied()
    }

    pub fn has_ongoing(&self, kernel_id: &KernelId) -> bool {
        self.ongoing
            .get(kernel_id)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }

    pub fn is_ongoing(&self, kernel_id: &KernelId, execution_id: &ExecutionId) -> bool {
        self.ongoing
            .get(kernel_id)
            .map(|set| set.contains(execution_id))
            .unwrap_or(false)
    }

    /// Summary used by `info(id)` and stall detection. `max_execution_time_ms
    /// = 0` disables stall classification (never reports `stuck`).
    pub fn info(&self, kernel_id: &KernelId, max_execution_time_ms: u64) -> ExecutionInfo {
        let count = self.ongoing.get(kernel_id).map(|s| s.len()).unwrap_or(0);
        let longest_running_ms = self
            .started_at
            .get(kernel_id)
            .and_then(|starts| starts.values().map(|t| t.elapsed().as_millis() as u64).max())
            .unwrap_or(0);
        let stuck = max_execution_time_ms > 0 && longest_running_ms > max_execution_time_ms;
        ExecutionInfo {
            count,
            stuck,
            longest_running_ms,
            last_activity: self.last_activity(kernel_id),
        }
    }

    /// Drop every record for a kernel. Called as part of `destroy`'s cleanup
    /// stack.
    pub fn remove_kernel(&mut self, kernel_id: &KernelId) {
        self.ongoing.remove(kernel_id);
        self.started_at.remove(kernel_id);
        self.last_activity.remove(kernel_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_then_end_clears_ongoing() {
        let mut tracker = ExecutionTracker::new();
        let kernel_id = KernelId::compose(None, "k1");
        let exec_id = ExecutionId::new();

        tracker.begin(&kernel_id, exec_id.clone());
        assert!(tracker.has_ongoing(&kernel_id));
        assert_eq!(tracker.info(&kernel_id, 0).count, 1);

        tracker.end(&kernel_id, &exec_id);
        assert!(!tracker.has_ongoing(&kernel_id));
        assert_eq!(tracker.info(&kernel_id, 0).count, 0);
    }

    #[test]
    fn stuck_only_reported_when_threshold_exceeded() {
        let mut tracker = ExecutionTracker::new();
        let kernel_id = KernelId::compose(None, "k1");
        tracker.begin(&kernel_id, ExecutionId::new());

        assert!(!tracker.info(&kernel_id, 0).stuck);
        assert!(!tracker.info(&kernel_id, u64::MAX).stuck);
    }
}
