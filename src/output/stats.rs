//! Engine statistics
//!
//! Lock-free counters updated by the scheduler, the workers and the result
//! handler. They back progress logging, the final summary and idle detection.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of a running engine
#[derive(Debug)]
pub struct EngineStats {
    started_at: DateTime<Utc>,
    submitted: AtomicU64,
    dispatched: AtomicU64,
    completed: AtomicU64,
    fetch_failures: AtomicU64,
    retries: AtomicU64,
    dead_letters: AtomicU64,
    depth_exceeded: AtomicU64,
    duplicates: AtomicU64,
    parse_failures: AtomicU64,
    items_forwarded: AtomicU64,
    items_emitted: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            submitted: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            dead_letters: AtomicU64::new(0),
            depth_exceeded: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
            items_forwarded: AtomicU64::new(0),
            items_emitted: AtomicU64::new(0),
        }
    }

    pub fn record_submitted(&self, count: usize) {
        self.submitted.fetch_add(count as u64, Ordering::SeqCst);
    }

    /// Takes back one submission the scheduler did not accept
    pub fn record_rejected(&self) {
        self.submitted.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker is done with a request, whatever the outcome
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_letter(&self) {
        self.dead_letters.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_depth_exceeded(&self) {
        self.depth_exceeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_item_forwarded(&self) {
        self.items_forwarded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_item_emitted(&self) {
        self.items_emitted.fetch_add(1, Ordering::SeqCst);
    }

    /// True when every submitted request has completed and every forwarded item
    /// has reached the sink
    ///
    /// A request is counted as submitted before it enters the intake channel, and
    /// workers submit derived requests and retries before counting the parent as
    /// completed. So `completed` is read first: if it has caught up with
    /// `submitted` read afterwards, nothing can be in flight.
    pub fn is_idle(&self) -> bool {
        let completed = self.completed.load(Ordering::SeqCst);
        let submitted = self.submitted.load(Ordering::SeqCst);
        if completed < submitted {
            return false;
        }
        let emitted = self.items_emitted.load(Ordering::SeqCst);
        let forwarded = self.items_forwarded.load(Ordering::SeqCst);
        emitted >= forwarded
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started_at: self.started_at,
            submitted: self.submitted.load(Ordering::SeqCst),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::SeqCst),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dead_letters: self.dead_letters.load(Ordering::Relaxed),
            depth_exceeded: self.depth_exceeded.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            items_forwarded: self.items_forwarded.load(Ordering::SeqCst),
            items_emitted: self.items_emitted.load(Ordering::SeqCst),
        }
    }
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the engine counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub submitted: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub fetch_failures: u64,
    pub retries: u64,
    pub dead_letters: u64,
    pub depth_exceeded: u64,
    pub duplicates: u64,
    pub parse_failures: u64,
    pub items_forwarded: u64,
    pub items_emitted: u64,
}

impl StatsSnapshot {
    /// Requests queued or in flight at snapshot time
    pub fn outstanding(&self) -> u64 {
        self.submitted.saturating_sub(self.completed)
    }

    /// Seconds since the engine started
    pub fn elapsed_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} submitted, {} completed, {} items, {} fetch failures ({} retried, {} given up), \
             {} depth exceeded, {} duplicates, {} parse failures in {}s",
            self.submitted,
            self.completed,
            self.items_emitted,
            self.fetch_failures,
            self.retries,
            self.dead_letters,
            self.depth_exceeded,
            self.duplicates,
            self.parse_failures,
            self.elapsed_secs()
        )
    }
}
