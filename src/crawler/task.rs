//! Task model: one configured crawl job
//!
//! A task owns its rule tree and its visited/failure tracker. Tasks are built once
//! before the engine starts and shared read-only (behind `Arc`) by every request
//! that belongs to them; the only mutable state, the tracker, guards itself.

use crate::crawler::fetcher::Fetcher;
use crate::crawler::request::Request;
use crate::output::Item;
use crate::state::VisitTracker;
use crate::ParseError;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Parses a fetched document in the context of the request that produced it
pub type ParseFunc = Arc<dyn Fn(&Context<'_>) -> Result<ParseResult, ParseError> + Send + Sync>;

/// Produces a task's seed requests; invoked once per task at startup
pub type RootGenerator = Arc<dyn Fn(&Arc<Task>) -> Result<Vec<Request>, ParseError> + Send + Sync>;

/// Input handed to a parse function
pub struct Context<'a> {
    /// Fetched body, already decoded to UTF-8
    pub body: &'a str,

    /// The request whose response is being parsed
    pub request: &'a Request,
}

/// Output of a parse function
#[derive(Debug, Default)]
pub struct ParseResult {
    /// Newly discovered requests to schedule
    pub requests: Vec<Request>,

    /// Extracted items, forwarded verbatim to the result sink
    pub items: Vec<Item>,
}

/// Static task settings
#[derive(Debug, Clone)]
pub struct TaskProperty {
    /// Display name, unique within a task store
    pub name: String,

    /// Target URL of the crawl
    pub url: String,

    /// Cookie string sent with every request of this task
    pub cookie: String,

    /// Wait hint applied by the fetcher before each request
    pub wait_time: Duration,

    /// Deepest request depth that is still processed
    pub max_depth: u32,

    /// Whether an already visited target may be fetched again
    pub reload: bool,
}

impl TaskProperty {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: String::new(),
            cookie: String::new(),
            wait_time: Duration::ZERO,
            max_depth: 5,
            reload: false,
        }
    }
}

/// Root generator plus the rule-name → parse-function map
#[derive(Clone)]
pub struct RuleTree {
    pub root: RootGenerator,
    pub trunk: HashMap<String, ParseFunc>,
}

impl RuleTree {
    pub fn new<F>(root: F) -> Self
    where
        F: Fn(&Arc<Task>) -> Result<Vec<Request>, ParseError> + Send + Sync + 'static,
    {
        Self {
            root: Arc::new(root),
            trunk: HashMap::new(),
        }
    }

    /// Adds (or replaces) a named rule
    pub fn with_rule<F>(mut self, name: impl Into<String>, parse: F) -> Self
    where
        F: Fn(&Context<'_>) -> Result<ParseResult, ParseError> + Send + Sync + 'static,
    {
        self.trunk.insert(name.into(), Arc::new(parse));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, parse: ParseFunc) {
        self.trunk.insert(name.into(), parse);
    }

    pub fn rule(&self, name: &str) -> Option<&ParseFunc> {
        self.trunk.get(name)
    }
}

/// One crawl job
pub struct Task {
    property: TaskProperty,
    rules: RuleTree,
    fetcher: OnceLock<Arc<dyn Fetcher>>,
    tracker: VisitTracker,
}

impl Task {
    pub fn new(property: TaskProperty, rules: RuleTree) -> Self {
        Self {
            property,
            rules,
            fetcher: OnceLock::new(),
            tracker: VisitTracker::new(),
        }
    }

    /// Pins a fetcher to this task; the engine's fetcher is used otherwise
    pub fn with_fetcher(self, fetcher: Arc<dyn Fetcher>) -> Self {
        let _ = self.fetcher.set(fetcher);
        self
    }

    /// Attaches a fetcher unless one is already set
    ///
    /// Returns true if this call attached it.
    pub fn attach_fetcher(&self, fetcher: Arc<dyn Fetcher>) -> bool {
        self.fetcher.set(fetcher).is_ok()
    }

    pub fn fetcher(&self) -> Option<&Arc<dyn Fetcher>> {
        self.fetcher.get()
    }

    pub fn name(&self) -> &str {
        &self.property.name
    }

    pub fn property(&self) -> &TaskProperty {
        &self.property
    }

    pub fn max_depth(&self) -> u32 {
        self.property.max_depth
    }

    pub fn reload(&self) -> bool {
        self.property.reload
    }

    pub fn cookie(&self) -> &str {
        &self.property.cookie
    }

    pub fn wait_time(&self) -> Duration {
        self.property.wait_time
    }

    pub fn rules(&self) -> &RuleTree {
        &self.rules
    }

    pub fn tracker(&self) -> &VisitTracker {
        &self.tracker
    }

    /// Looks up the parse function a request names
    pub fn parse_func(&self, rule: &str) -> Result<&ParseFunc, ParseError> {
        self.rules.rule(rule).ok_or_else(|| ParseError::UnknownRule {
            task: self.property.name.clone(),
            rule: rule.to_string(),
        })
    }

    /// Runs the root generator
    pub fn root_requests(self: &Arc<Self>) -> Result<Vec<Request>, ParseError> {
        (self.rules.root)(self)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rules: Vec<&String> = self.rules.trunk.keys().collect();
        rules.sort();
        f.debug_struct("Task")
            .field("property", &self.property)
            .field("rules", &rules)
            .field("has_fetcher", &self.fetcher.get().is_some())
            .finish()
    }
}

/// A task with a single-request root and no rules, for unit tests
#[cfg(test)]
pub(crate) fn test_task(max_depth: u32, reload: bool) -> Arc<Task> {
    let property = TaskProperty {
        max_depth,
        reload,
        url: "https://example.com/".to_string(),
        ..TaskProperty::new("test")
    };
    let rules = RuleTree::new(|task| Ok(vec![Request::new(task, "https://example.com/", "root")]));
    Arc::new(Task::new(property, rules))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_requests_belong_to_task() {
        let task = test_task(3, false);
        let roots = task.root_requests().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].depth, 0);
        assert!(Arc::ptr_eq(roots[0].task(), &task));
    }

    #[test]
    fn test_parse_func_lookup() {
        let property = TaskProperty::new("lookup");
        let rules = RuleTree::new(|_| Ok(Vec::new()))
            .with_rule("list", |_ctx| Ok(ParseResult::default()));
        let task = Task::new(property, rules);

        assert!(task.parse_func("list").is_ok());
        assert!(matches!(
            task.parse_func("missing"),
            Err(ParseError::UnknownRule { .. })
        ));
    }

    #[test]
    fn test_property_defaults() {
        let property = TaskProperty::new("defaults");
        assert_eq!(property.max_depth, 5);
        assert!(!property.reload);
        assert_eq!(property.wait_time, Duration::ZERO);
    }
}
