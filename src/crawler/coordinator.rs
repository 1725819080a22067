//! Engine coordinator - wires the scheduler, workers and result handler together
//!
//! This module contains the startup sequence of a crawl:
//! - Attaching the engine's fetcher to every registered task that lacks one
//! - Resolving seed task names against the task store
//! - Generating root requests and pushing them into the scheduler
//! - Spawning the scheduler, `W` workers and the result handler
//! - Shutdown and idle detection for embedders and tests

use crate::config::EngineConfig;
use crate::crawler::fetcher::Fetcher;
use crate::crawler::request::Request;
use crate::crawler::scheduler::{self, DispatchPolicy, Intake};
use crate::crawler::worker::Worker;
use crate::output::{EngineStats, Item, ResultSink, StatsSnapshot};
use crate::registry::TaskStore;
use crate::WeftError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Runtime settings of the engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Number of concurrent workers
    pub workers: usize,

    /// Responses shorter than this many bytes count as failed fetches
    pub min_body_bytes: usize,

    pub dispatch: DispatchPolicy,

    /// Names of the tasks whose root requests seed the crawl
    pub seeds: Vec<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            workers: 5,
            min_body_bytes: 6000,
            dispatch: DispatchPolicy::default(),
            seeds: Vec::new(),
        }
    }
}

impl From<&EngineConfig> for EngineOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            workers: config.workers,
            min_body_bytes: config.min_body_bytes,
            dispatch: config.dispatch,
            seeds: config.seeds.clone(),
        }
    }
}

/// A configured, not yet running crawl
pub struct Engine {
    options: EngineOptions,
    store: Arc<TaskStore>,
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn ResultSink>,
}

impl Engine {
    /// Creates an engine over a fully populated task store
    ///
    /// The store is frozen from here on: tasks can no longer be added.
    pub fn new(
        options: EngineOptions,
        store: TaskStore,
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            options,
            store: Arc::new(store),
            fetcher,
            sink,
        }
    }

    /// Resolves every seed and collects its root requests
    ///
    /// A seed naming an unknown task, or a root generator that fails, only costs
    /// that seed its contribution.
    fn seed_requests(&self) -> Vec<Request> {
        let mut requests = Vec::new();

        for name in &self.options.seeds {
            let task = match self.store.get(name) {
                Ok(task) => task,
                Err(e) => {
                    tracing::error!("Skipping seed: {}", e);
                    continue;
                }
            };

            match task.root_requests() {
                Ok(roots) => {
                    tracing::info!("Task '{}' seeded {} requests", name, roots.len());
                    requests.extend(roots);
                }
                Err(e) => tracing::error!("Get root of task '{}' failed: {}", name, e),
            }
        }

        requests
    }

    /// Spawns the scheduler, the workers and the result handler
    ///
    /// Must be called from within a tokio runtime. The engine keeps running until
    /// [`EngineHandle::shutdown`] is called or the handle is dropped.
    pub fn start(self) -> EngineHandle {
        let stats = Arc::new(EngineStats::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (scheduler, intake, dispatch) =
            scheduler::channel(self.options.dispatch, Arc::clone(&stats));
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Item>();

        // Seeds and requests submitted later may target any registered task
        for task in self.store.iter() {
            task.attach_fetcher(Arc::clone(&self.fetcher));
        }

        let seeds = self.seed_requests();
        let seeded = intake.submit_all(seeds);
        tracing::info!(
            "Starting engine: {} workers, {} seed requests",
            self.options.workers,
            seeded
        );

        let mut handles = Vec::with_capacity(self.options.workers + 2);
        handles.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));

        for id in 1..=self.options.workers {
            let worker = Worker {
                id,
                dispatch: dispatch.clone(),
                intake: intake.clone(),
                out: out_tx.clone(),
                stats: Arc::clone(&stats),
                min_body_bytes: self.options.min_body_bytes,
            };
            let span = tracing::info_span!("worker", worker_id = %id);
            handles.push(tokio::spawn(
                worker.run(shutdown_rx.clone()).instrument(span),
            ));
        }

        // The workers hold the only senders, so the handler ends after the last
        // of them has stopped
        drop(out_tx);
        handles.push(tokio::spawn(handle_results(
            out_rx,
            Arc::clone(&self.sink),
            Arc::clone(&stats),
        )));

        EngineHandle {
            shutdown: shutdown_tx,
            stats,
            store: self.store,
            intake,
            handles,
        }
    }

    /// Runs the crawl until Ctrl-C
    pub async fn run(self) -> Result<StatsSnapshot, WeftError> {
        let handle = self.start();
        tokio::signal::ctrl_c().await?;
        tracing::info!("Interrupt received, shutting down");
        Ok(handle.shutdown().await)
    }
}

/// Drains extracted items into the sink
///
/// Runs until every worker has dropped its sender, so items forwarded by requests
/// still in flight at shutdown are delivered too. Sink failures are logged and
/// never stop the crawl.
async fn handle_results(
    mut rx: mpsc::UnboundedReceiver<Item>,
    sink: Arc<dyn ResultSink>,
    stats: Arc<EngineStats>,
) {
    while let Some(item) = rx.recv().await {
        if let Err(e) = sink.emit(&item) {
            tracing::error!("Sink rejected item from {}: {}", item.url, e);
        }
        stats.record_item_emitted();
    }
}

/// Control handle of a running engine
pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    stats: Arc<EngineStats>,
    store: Arc<TaskStore>,
    intake: Intake,
    handles: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Pushes an extra request into the running crawl
    pub fn submit(&self, request: Request) -> bool {
        self.intake.submit(request)
    }

    /// Waits until no request is queued or in flight and every item has reached
    /// the sink
    ///
    /// Returns false if that does not happen within `timeout`.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let poll = async {
            let mut idle_polls = 0;
            loop {
                if self.stats.is_idle() {
                    idle_polls += 1;
                    // Two consecutive idle readings rule out a worker caught
                    // between pulling and counting.
                    if idle_polls >= 2 {
                        return;
                    }
                } else {
                    idle_polls = 0;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }

    /// Signals every component to stop and waits for them
    ///
    /// In-flight requests finish and their items reach the sink; nothing new is
    /// dispatched.
    pub async fn shutdown(self) -> StatsSnapshot {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Engine task panicked: {}", e);
            }
        }
        let snapshot = self.stats.snapshot();
        tracing::info!("Engine stopped: {}", snapshot);
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::task::{ParseResult, RuleTree, Task, TaskProperty};
    use crate::output::{MemorySink, OutputError, OutputResult};
    use crate::FetchError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned bodies; unknown URLs fail with a transport error
    #[derive(Default)]
    struct StubFetcher {
        pages: HashMap<String, String>,
        calls: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl StubFetcher {
        fn with_page(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), body.to_string());
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls_to(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn get(&self, request: &Request) -> Result<String, FetchError> {
            self.calls.lock().unwrap().push(request.url.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.pages
                .get(&request.url)
                .cloned()
                .ok_or_else(|| FetchError::Transport {
                    url: request.url.clone(),
                    message: "connection refused".to_string(),
                })
        }
    }

    /// Rejects every item
    struct RejectingSink;

    impl ResultSink for RejectingSink {
        fn emit(&self, _item: &Item) -> OutputResult<()> {
            Err(OutputError::Write("disk full".to_string()))
        }
    }

    /// Task with a single root request whose rule emits the page body
    fn echo_task(name: &str, url: &str) -> Task {
        let url = url.to_string();
        let rules = RuleTree::new(move |task| Ok(vec![Request::new(task, url.as_str(), "root")]))
            .with_rule("root", |ctx| {
                Ok(ParseResult {
                    requests: vec![],
                    items: vec![Item::new(ctx.request, ctx.body.to_string())],
                })
            });
        Task::new(property(name, 3), rules)
    }

    fn create_options(seeds: &[&str]) -> EngineOptions {
        EngineOptions {
            workers: 3,
            min_body_bytes: 0,
            dispatch: DispatchPolicy::Prioritized,
            seeds: seeds.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn property(name: &str, max_depth: u32) -> TaskProperty {
        TaskProperty {
            max_depth,
            ..TaskProperty::new(name)
        }
    }

    #[tokio::test]
    async fn test_depth_limited_chain_emits_one_item() {
        let rules = RuleTree::new(|task| Ok(vec![Request::new(task, "https://site/0", "root")]))
            .with_rule("root", |ctx| {
                Ok(ParseResult {
                    requests: vec![ctx.request.derive("https://site/1", "leaf")],
                    items: vec![Item::new(ctx.request, "X")],
                })
            })
            .with_rule("leaf", |ctx| {
                Ok(ParseResult {
                    requests: vec![ctx.request.derive("https://site/2", "leaf")],
                    items: vec![],
                })
            });

        let mut store = TaskStore::new();
        store.add(Task::new(property("chain", 1), rules)).unwrap();

        let fetcher = StubFetcher::default()
            .with_page("https://site/0", "root page")
            .with_page("https://site/1", "leaf page")
            .with_page("https://site/2", "too deep");
        let sink = Arc::new(MemorySink::new());

        let engine = Engine::new(create_options(&["chain"]), store, Arc::new(fetcher), sink.clone());
        let handle = engine.start();
        assert!(handle.wait_idle(Duration::from_secs(5)).await);

        let items = sink.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].value, "X");

        let stats = handle.shutdown().await;
        assert_eq!(stats.depth_exceeded, 1);
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.completed, 3);
    }

    #[tokio::test]
    async fn test_failing_target_is_retried_once() {
        let rules = RuleTree::new(|task| Ok(vec![Request::new(task, "https://site/A", "root")]))
            .with_rule("root", |_ctx| Ok(ParseResult::default()));

        let mut store = TaskStore::new();
        let task = store.add(Task::new(property("failing", 3), rules)).unwrap();

        let fetcher = Arc::new(StubFetcher::default());
        let sink = Arc::new(MemorySink::new());
        let engine = Engine::new(create_options(&["failing"]), store, fetcher.clone(), sink);

        let handle = engine.start();
        assert!(handle.wait_idle(Duration::from_secs(5)).await);

        let probe = Request::new(&task, "https://site/A", "root");
        assert!(task.tracker().has_failed(&probe));
        assert!(!task.tracker().has_visited(&probe));
        assert_eq!(fetcher.calls_to("https://site/A"), 2);

        let stats = handle.shutdown().await;
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.dead_letters, 1);
        assert_eq!(stats.fetch_failures, 2);
    }

    #[tokio::test]
    async fn test_small_body_counts_as_fetch_failure() {
        let rules = RuleTree::new(|task| Ok(vec![Request::new(task, "https://site/shell", "root")]))
            .with_rule("root", |ctx| {
                Ok(ParseResult {
                    requests: vec![],
                    items: vec![Item::new(ctx.request, "should not appear")],
                })
            });

        let mut store = TaskStore::new();
        store.add(Task::new(property("shell", 3), rules)).unwrap();

        let fetcher = StubFetcher::default().with_page("https://site/shell", "captcha");
        let sink = Arc::new(MemorySink::new());
        let options = EngineOptions {
            min_body_bytes: 100,
            ..create_options(&["shell"])
        };

        let handle = Engine::new(options, store, Arc::new(fetcher), sink.clone()).start();
        assert!(handle.wait_idle(Duration::from_secs(5)).await);
        assert!(sink.items().is_empty());

        let stats = handle.shutdown().await;
        assert_eq!(stats.fetch_failures, 2);
        assert_eq!(stats.dead_letters, 1);
    }

    #[tokio::test]
    async fn test_cyclic_links_are_deduplicated() {
        // Two pages linking to each other, never exceeding depth.
        let rules = RuleTree::new(|task| Ok(vec![Request::new(task, "https://site/a", "page")]))
            .with_rule("page", |ctx| {
                let other = if ctx.request.url.ends_with('a') {
                    "https://site/b"
                } else {
                    "https://site/a"
                };
                Ok(ParseResult {
                    requests: vec![ctx.request.derive(other, "page")],
                    items: vec![Item::new(ctx.request, ctx.request.url.clone())],
                })
            });

        let mut store = TaskStore::new();
        store.add(Task::new(property("cycle", 10), rules)).unwrap();

        let fetcher = Arc::new(
            StubFetcher::default()
                .with_page("https://site/a", "a")
                .with_page("https://site/b", "b"),
        );
        let sink = Arc::new(MemorySink::new());
        let handle =
            Engine::new(create_options(&["cycle"]), store, fetcher.clone(), sink.clone()).start();
        assert!(handle.wait_idle(Duration::from_secs(5)).await);

        assert_eq!(sink.items().len(), 2);
        assert_eq!(fetcher.calls_to("https://site/a"), 1);
        assert_eq!(fetcher.calls_to("https://site/b"), 1);

        let stats = handle.shutdown().await;
        assert_eq!(stats.duplicates, 1);
    }

    #[tokio::test]
    async fn test_parse_error_is_not_retried() {
        let rules = RuleTree::new(|task| Ok(vec![Request::new(task, "https://site/bad", "root")]))
            .with_rule("root", |ctx| {
                Err(crate::ParseError::Rule {
                    rule: ctx.request.rule_name.clone(),
                    message: "unexpected layout".to_string(),
                })
            });

        let mut store = TaskStore::new();
        store.add(Task::new(property("broken", 3), rules)).unwrap();

        let fetcher = Arc::new(StubFetcher::default().with_page("https://site/bad", "body"));
        let handle = Engine::new(
            create_options(&["broken"]),
            store,
            fetcher.clone(),
            Arc::new(MemorySink::new()),
        )
        .start();
        assert!(handle.wait_idle(Duration::from_secs(5)).await);
        assert_eq!(fetcher.calls_to("https://site/bad"), 1);

        let stats = handle.shutdown().await;
        assert_eq!(stats.parse_failures, 1);
        assert_eq!(stats.retries, 0);
    }

    #[tokio::test]
    async fn test_unknown_seed_is_skipped() {
        let rules = RuleTree::new(|task| Ok(vec![Request::new(task, "https://site/ok", "root")]))
            .with_rule("root", |ctx| {
                Ok(ParseResult {
                    requests: vec![],
                    items: vec![Item::new(ctx.request, "ok")],
                })
            });

        let mut store = TaskStore::new();
        store.add(Task::new(property("known", 3), rules)).unwrap();

        let fetcher = StubFetcher::default().with_page("https://site/ok", "body");
        let sink = Arc::new(MemorySink::new());
        let handle = Engine::new(
            create_options(&["missing", "known"]),
            store,
            Arc::new(fetcher),
            sink.clone(),
        )
        .start();

        assert!(handle.wait_idle(Duration::from_secs(5)).await);
        assert_eq!(sink.items().len(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_task_fetcher_takes_precedence() {
        let rules = RuleTree::new(|task| Ok(vec![Request::new(task, "https://site/own", "root")]))
            .with_rule("root", |ctx| {
                Ok(ParseResult {
                    requests: vec![],
                    items: vec![Item::new(ctx.request, ctx.body.to_string())],
                })
            });

        let own = StubFetcher::default().with_page("https://site/own", "from task fetcher");
        let task = Task::new(property("pinned", 3), rules).with_fetcher(Arc::new(own));

        let mut store = TaskStore::new();
        store.add(task).unwrap();

        let engine_fetcher = StubFetcher::default().with_page("https://site/own", "from engine");
        let sink = Arc::new(MemorySink::new());
        let handle = Engine::new(
            create_options(&["pinned"]),
            store,
            Arc::new(engine_fetcher),
            sink.clone(),
        )
        .start();

        assert!(handle.wait_idle(Duration::from_secs(5)).await);
        assert_eq!(sink.items()[0].value, "from task fetcher");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_rule_does_not_stop_worker() {
        let bad = RuleTree::new(|task| Ok(vec![Request::new(task, "https://site/bad", "root")]))
            .with_rule("root", |_ctx| panic!("unexpected layout"));

        let mut store = TaskStore::new();
        store.add(Task::new(property("bad", 3), bad)).unwrap();
        store.add(echo_task("good", "https://site/good")).unwrap();

        let fetcher = StubFetcher::default()
            .with_page("https://site/bad", "bad page")
            .with_page("https://site/good", "good page");
        let sink = Arc::new(MemorySink::new());
        let options = EngineOptions {
            workers: 1,
            ..create_options(&["bad", "good"])
        };

        let handle = Engine::new(options, store, Arc::new(fetcher), sink.clone()).start();
        assert!(handle.wait_idle(Duration::from_secs(5)).await);

        let items = sink.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].value, "good page");

        let stats = handle.shutdown().await;
        assert_eq!(stats.parse_failures, 1);
        assert_eq!(stats.completed, 2);
    }

    #[tokio::test]
    async fn test_submit_to_task_without_seed() {
        let mut store = TaskStore::new();
        store.add(echo_task("seeded", "https://site/seeded")).unwrap();
        let extra = store.add(echo_task("extra", "https://site/unused")).unwrap();

        let fetcher = StubFetcher::default()
            .with_page("https://site/seeded", "seeded page")
            .with_page("https://site/extra", "extra page");
        let sink = Arc::new(MemorySink::new());
        let handle =
            Engine::new(create_options(&["seeded"]), store, Arc::new(fetcher), sink.clone()).start();
        assert!(handle.wait_idle(Duration::from_secs(5)).await);

        assert!(handle.submit(Request::new(&extra, "https://site/extra", "root")));
        assert!(handle.wait_idle(Duration::from_secs(5)).await);

        let values: Vec<String> = sink.items().into_iter().map(|item| item.value).collect();
        assert_eq!(values, vec!["seeded page".to_string(), "extra page".to_string()]);

        let stats = handle.shutdown().await;
        assert_eq!(stats.fetch_failures, 0);
        assert_eq!(stats.dead_letters, 0);
    }

    #[tokio::test]
    async fn test_shutdown_delivers_in_flight_items() {
        let mut store = TaskStore::new();
        store.add(echo_task("slow", "https://site/slow")).unwrap();

        let fetcher = Arc::new(
            StubFetcher::default()
                .with_page("https://site/slow", "slow page")
                .with_delay(Duration::from_millis(200)),
        );
        let sink = Arc::new(MemorySink::new());
        let handle =
            Engine::new(create_options(&["slow"]), store, fetcher.clone(), sink.clone()).start();

        // Shut down while the fetch is still sleeping
        let fetching = async {
            while fetcher.calls_to("https://site/slow") == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), fetching)
            .await
            .unwrap();

        let stats = handle.shutdown().await;
        assert_eq!(sink.len(), 1);
        assert_eq!(stats.items_forwarded, 1);
        assert_eq!(stats.items_emitted, 1);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stop_crawl() {
        let mut store = TaskStore::new();
        store.add(echo_task("first", "https://site/1")).unwrap();
        store.add(echo_task("second", "https://site/2")).unwrap();

        let fetcher = StubFetcher::default()
            .with_page("https://site/1", "one")
            .with_page("https://site/2", "two");
        let handle = Engine::new(
            create_options(&["first", "second"]),
            store,
            Arc::new(fetcher),
            Arc::new(RejectingSink),
        )
        .start();
        assert!(handle.wait_idle(Duration::from_secs(5)).await);

        let stats = handle.shutdown().await;
        assert_eq!(stats.items_forwarded, 2);
        assert_eq!(stats.items_emitted, 2);
    }
}
