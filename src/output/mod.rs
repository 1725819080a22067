//! Output module for extracted items and engine statistics
//!
//! This module handles:
//! - The `Item` type parse rules emit
//! - The `ResultSink` boundary items are delivered to
//! - Built-in sinks (logging, in-memory)
//! - Engine counters used for logging and idle detection

mod sink;
pub mod stats;
mod traits;

pub use sink::{LogSink, MemorySink};
pub use stats::{EngineStats, StatsSnapshot};
pub use traits::{Item, OutputError, OutputResult, ResultSink};
