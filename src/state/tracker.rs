use crate::crawler::{Intake, Method, Request};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Bookkeeping for a fingerprint whose fetch has failed at least once
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub fingerprint: String,
    pub url: String,
    pub method: Method,

    /// Number of failed attempts seen so far
    pub attempts: u32,

    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
}

/// What `set_failure` decided for a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// First failure: the request went back to the scheduler
    Retried,

    /// Repeat failure: the request is dropped
    GaveUp { attempts: u32 },

    /// First failure, but the scheduler no longer accepts requests
    Abandoned,
}

/// Visited set and failure set of one task
///
/// Each set has its own lock and every operation is one short critical section.
/// No lock is ever held across a fetch or a parse.
#[derive(Debug, Default)]
pub struct VisitTracker {
    visited: Mutex<HashSet<String>>,
    failures: Mutex<HashMap<String, FailureRecord>>,
}

impl VisitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn visited(&self) -> MutexGuard<'_, HashSet<String>> {
        self.visited.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<String, FailureRecord>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True iff the request's fingerprint is in the visited set
    pub fn has_visited(&self, request: &Request) -> bool {
        self.visited().contains(&request.fingerprint())
    }

    /// Inserts each request's fingerprint into the visited set
    pub fn store_visited<'a, I>(&self, requests: I)
    where
        I: IntoIterator<Item = &'a Request>,
    {
        let fingerprints: Vec<String> = requests.into_iter().map(Request::fingerprint).collect();
        let mut visited = self.visited();
        visited.extend(fingerprints);
    }

    /// Inserts the request's fingerprint, returning false if it was already present
    ///
    /// Check and insert happen under one lock, so of several workers racing on the
    /// same target exactly one gets `true`.
    pub fn mark_visited(&self, request: &Request) -> bool {
        self.visited().insert(request.fingerprint())
    }

    pub fn visited_count(&self) -> usize {
        self.visited().len()
    }

    /// Runs the failure protocol for a failed fetch
    ///
    /// 1. If the task disallows revisiting, the fingerprint leaves the visited set so
    ///    the retry is not rejected as a duplicate.
    /// 2. On the first failure the fingerprint is recorded and the request is
    ///    resubmitted unchanged. Any later failure is recorded and dropped.
    pub fn set_failure(&self, request: &Request, intake: &Intake) -> FailureOutcome {
        let fingerprint = request.fingerprint();

        if !request.task().reload() {
            self.visited().remove(&fingerprint);
        }

        let now = Utc::now();
        let mut failures = self.failures();
        match failures.get_mut(&fingerprint) {
            Some(record) => {
                record.attempts += 1;
                record.last_failed_at = now;
                FailureOutcome::GaveUp {
                    attempts: record.attempts,
                }
            }
            None => {
                failures.insert(
                    fingerprint.clone(),
                    FailureRecord {
                        fingerprint,
                        url: request.url.clone(),
                        method: request.method,
                        attempts: 1,
                        first_failed_at: now,
                        last_failed_at: now,
                    },
                );
                if intake.submit(request.clone()) {
                    FailureOutcome::Retried
                } else {
                    FailureOutcome::Abandoned
                }
            }
        }
    }

    /// True iff the request has failed at least once
    pub fn has_failed(&self, request: &Request) -> bool {
        self.failures().contains_key(&request.fingerprint())
    }

    /// Number of failed attempts recorded for a fingerprint
    pub fn failure_count(&self, fingerprint: &str) -> u32 {
        self.failures()
            .get(fingerprint)
            .map(|record| record.attempts)
            .unwrap_or(0)
    }

    /// Requests that failed on their retry as well
    pub fn dead_letters(&self) -> Vec<FailureRecord> {
        let mut records: Vec<FailureRecord> = self
            .failures()
            .values()
            .filter(|record| record.attempts > 1)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.first_failed_at.cmp(&b.first_failed_at));
        records
    }
}
