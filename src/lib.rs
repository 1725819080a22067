//! Weft: a priority-aware crawl scheduling engine
//!
//! This crate accepts seed requests for configured crawl tasks, dispatches them to a
//! bounded pool of concurrent workers, tracks which targets have already been
//! processed, enforces per-task depth limits and resubmits requests discovered while
//! parsing. Priority requests always run ahead of normal ones and a failed fetch is
//! retried exactly once.

pub mod config;
pub mod crawler;
pub mod output;
pub mod registry;
pub mod rules;
pub mod state;

use thiserror::Error;

/// Main error type for setup-time operations
#[derive(Debug, Error)]
pub enum WeftError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Rule error: {0}")]
    Parse(#[from] ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while processing a single request
///
/// None of these ever stop the engine; they are logged and counted by the worker
/// that hit them.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Depth {depth} exceeds max depth {max_depth} for {url}")]
    DepthExceeded {
        url: String,
        depth: u32,
        max_depth: u32,
    },

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Parse failed: {0}")]
    Parse(#[from] ParseError),
}

/// Fetch failures, all of which are subject to the retry-once policy
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Body of {url} is {len} bytes, below the {min} byte minimum")]
    BodyTooSmall { url: String, len: usize, min: usize },

    #[error("Task '{task}' has no fetcher attached")]
    NoFetcher { task: String },

    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },
}

/// Rule construction and rule invocation errors
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Task '{task}' has no rule named '{rule}'")]
    UnknownRule { task: String, rule: String },

    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Rule '{rule}' failed: {message}")]
    Rule { rule: String, message: String },
}

/// Task registration errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("Unknown builtin rule set: {0}")]
    UnknownBuiltin(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for setup-time operations
pub type Result<T> = std::result::Result<T, WeftError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{
    fingerprint, Context, DispatchPolicy, Engine, EngineHandle, EngineOptions, Fetcher,
    Method, ParseFunc, ParseResult, Request, RootGenerator, RuleTree, Task, TaskProperty,
};
pub use output::{Item, LogSink, MemorySink, ResultSink};
pub use registry::TaskStore;
