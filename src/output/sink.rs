use crate::output::traits::{Item, OutputResult, ResultSink};
use std::sync::{Mutex, PoisonError};

/// Logs every item through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn emit(&self, item: &Item) -> OutputResult<()> {
        tracing::info!(task = %item.task, url = %item.url, "get result: {}", item.value);
        Ok(())
    }
}

/// Keeps every item in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    items: Mutex<Vec<Item>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything received so far, in arrival order
    pub fn items(&self) -> Vec<Item> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for MemorySink {
    fn emit(&self, item: &Item) -> OutputResult<()> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item.clone());
        Ok(())
    }
}
