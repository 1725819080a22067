//! State module for dedup and retry bookkeeping
//!
//! Every task owns one `VisitTracker` holding the fingerprints it has already
//! visited and the fingerprints whose fetch has failed.
//!
//! # Components
//!
//! - `VisitTracker`: visited set + failure set, each behind its own lock
//! - `FailureRecord`: per-fingerprint failure bookkeeping
//! - `FailureOutcome`: what the retry-once policy decided for a failure

mod tracker;

// Re-export main types
pub use tracker::{FailureOutcome, FailureRecord, VisitTracker};
