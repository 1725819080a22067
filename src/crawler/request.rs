//! Request model: one unit of scheduled work
//!
//! A request carries the target URL, method, priority, current depth and the name of
//! the rule that must parse its response. It holds a shared handle to its owning
//! task, which is the only way any component reads task-level configuration or
//! reaches the task's visited and failure sets.

use crate::crawler::task::Task;
use crate::CrawlError;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// HTTP method of a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
}

impl Method {
    /// Returns the canonical upper-case method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        }
    }
}

/// One unit of scheduled work
#[derive(Clone)]
pub struct Request {
    /// The URL to fetch
    pub url: String,

    /// The HTTP method
    pub method: Method,

    /// 0 is normal, anything above 0 is expedited
    pub priority: u32,

    /// Distance from the seed request that started this chain
    pub depth: u32,

    /// Name of the rule in the owning task that parses the response
    pub rule_name: String,

    task: Arc<Task>,
}

impl Request {
    /// Creates a depth-0, normal-priority GET request for a task
    pub fn new(task: &Arc<Task>, url: impl Into<String>, rule_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            priority: 0,
            depth: 0,
            rule_name: rule_name.into(),
            task: Arc::clone(task),
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Creates a request discovered while parsing this one
    ///
    /// The derived request belongs to the same task and sits one level deeper.
    pub fn derive(&self, url: impl Into<String>, rule_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            priority: 0,
            depth: self.depth + 1,
            rule_name: rule_name.into(),
            task: Arc::clone(&self.task),
        }
    }

    /// The task this request belongs to
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// Fails with `DepthExceeded` when the request is deeper than its task allows
    ///
    /// A request exactly at the task's max depth is still valid.
    pub fn check(&self) -> Result<(), CrawlError> {
        let max_depth = self.task.max_depth();
        if self.depth > max_depth {
            return Err(CrawlError::DepthExceeded {
                url: self.url.clone(),
                depth: self.depth,
                max_depth,
            });
        }
        Ok(())
    }

    /// Content address of this request, see [`fingerprint`]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.url, self.method)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("priority", &self.priority)
            .field("depth", &self.depth)
            .field("rule_name", &self.rule_name)
            .field("task", &self.task.name())
            .finish()
    }
}

/// Hex-encoded MD5 of `url + method`
///
/// This is the sole key for dedup and failure tracking: identical URL and method
/// always give the identical fingerprint.
pub fn fingerprint(url: &str, method: Method) -> String {
    let mut context = md5::Context::new();
    context.consume(url.as_bytes());
    context.consume(method.as_str().as_bytes());
    hex::encode(context.compute().0)
}
