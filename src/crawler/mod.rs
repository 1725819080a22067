//! Crawler module: the scheduling engine
//!
//! This module contains the core crawling machinery, including:
//! - The request and task data model
//! - The scheduler that owns the priority and normal queues
//! - The worker loop: check, dedup, fetch, parse, requeue
//! - The engine coordinator that seeds and runs everything
//! - The HTTP fetcher and proxy rotation

mod coordinator;
mod fetcher;
mod proxy;
mod request;
mod scheduler;
mod task;
mod worker;

pub use coordinator::{Engine, EngineHandle, EngineOptions};
pub use fetcher::{build_http_client, BrowserFetcher, Fetcher, DEFAULT_USER_AGENT};
pub use proxy::RoundRobinProxy;
pub use request::{fingerprint, Method, Request};
pub use scheduler::{channel, Dispatch, DispatchPolicy, Intake, Scheduler};
pub use task::{Context, ParseFunc, ParseResult, RootGenerator, RuleTree, Task, TaskProperty};

#[cfg(test)]
pub(crate) use task::test_task;
