use crate::crawler::{DispatchPolicy, DEFAULT_USER_AGENT};
use crate::rules::{RootSpec, RuleSpec};
use serde::Deserialize;

/// Main configuration structure for Weft
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskConfig>,
}

/// Engine behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Responses shorter than this are treated as failed fetches
    #[serde(rename = "min-body-bytes", default = "default_min_body_bytes")]
    pub min_body_bytes: usize,

    /// How the scheduler picks the next request
    #[serde(default)]
    pub dispatch: DispatchPolicy,

    /// Task names whose root requests seed the crawl
    #[serde(default)]
    pub seeds: Vec<String>,
}

/// HTTP fetch client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Proxies used in rotation; empty means direct connections
    #[serde(default)]
    pub proxies: Vec<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            proxies: Vec::new(),
        }
    }
}

/// One crawl task
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Unique task name
    pub name: String,

    /// Target URL of the crawl
    pub url: String,

    /// Cookie string sent with every request
    #[serde(default)]
    pub cookie: String,

    /// Wait before each request (milliseconds)
    #[serde(rename = "wait-ms", default)]
    pub wait_ms: u64,

    /// Deepest request depth still processed
    #[serde(rename = "max-depth", default = "default_max_depth")]
    pub max_depth: u32,

    /// Whether visited targets may be fetched again
    #[serde(default)]
    pub reload: bool,

    /// Compiled rule set to use (e.g. "forum")
    #[serde(default)]
    pub builtin: Option<String>,

    /// Keyword for builtin rule sets that match on content
    #[serde(default)]
    pub keyword: Option<String>,

    /// Declarative root generator
    #[serde(default)]
    pub root: Option<RootSpec>,

    /// Declarative rules, added on top of any builtin rules
    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleSpec>,
}

fn default_workers() -> usize {
    5
}

fn default_min_body_bytes() -> usize {
    6000
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_depth() -> u32 {
    5
}
