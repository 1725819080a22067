//! Output handler traits and types
//!
//! This module defines the trait interface for result sinks and the item type the
//! engine forwards to them.

use crate::crawler::Request;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while delivering an item
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// One extracted value
///
/// The engine never looks inside `value`; it only forwards it.
#[derive(Debug, Clone)]
pub struct Item {
    /// Name of the task whose rule produced the item
    pub task: String,

    /// URL of the page the item was extracted from
    pub url: String,

    /// Extracted payload
    pub value: String,

    pub collected_at: DateTime<Utc>,
}

impl Item {
    /// Creates an item attributed to the request being parsed
    pub fn new(request: &Request, value: impl Into<String>) -> Self {
        Self {
            task: request.task().name().to_string(),
            url: request.url.clone(),
            value: value.into(),
            collected_at: Utc::now(),
        }
    }
}

/// Receives extracted items one at a time
///
/// Items from different workers arrive interleaved in no particular order.
/// Delivery is best effort: an error is logged by the engine and the item is lost.
pub trait ResultSink: Send + Sync {
    fn emit(&self, item: &Item) -> OutputResult<()>;
}
