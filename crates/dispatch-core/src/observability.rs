use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a dispatcher.
///
/// State transitions:
/// - Unstarted -> Running -> Draining -> Terminated
/// - Unstarted -> Draining -> Terminated (stopped without ever starting)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    /// Created; no workers yet. Submissions are buffered up to capacity.
    Unstarted,

    /// Workers are consuming the queue.
    Running,

    /// Queue closed; workers are finishing what was already queued.
    Draining,

    /// Every worker has exited.
    Terminated,
}

impl DispatcherState {
    pub fn accepts_tasks(self) -> bool {
        matches!(self, DispatcherState::Unstarted | DispatcherState::Running)
    }
}

/// Job counters shared by all workers of one dispatcher.
#[derive(Debug, Default)]
pub(crate) struct JobCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

impl JobCounters {
    pub(crate) fn record_success(&self) {
        self.processed.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::AcqRel);
        self.processed.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_panic(&self) {
        self.panicked.fetch_add(1, Ordering::AcqRel);
        self.processed.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    pub(crate) fn failed(&self) -> u64 {
        self.failed.load(Ordering::Acquire)
    }

    pub(crate) fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Acquire)
    }
}

/// Point-in-time view of a dispatcher, suitable for logging or JSON output.
///
/// `failed` and `panicked` are both included in `processed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    pub id: String,
    pub state: DispatcherState,
    pub workers: usize,
    pub queue_capacity: usize,
    pub queued: usize,
    pub processed: u64,
    pub failed: u64,
    pub panicked: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl DispatcherStats {
    pub fn succeeded(&self) -> u64 {
        // snapshots taken while workers run are not atomic across counters
        self.processed
            .saturating_sub(self.failed)
            .saturating_sub(self.panicked)
    }
}
