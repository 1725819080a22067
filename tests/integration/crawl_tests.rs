//! Integration tests for the crawl engine
//!
//! These tests use wiremock to create mock HTTP servers and run configured
//! tasks end-to-end through the real reqwest fetcher.

use std::sync::Arc;
use std::time::Duration;
use weft_crawl::config::parse_config;
use weft_crawl::crawler::BrowserFetcher;
use weft_crawl::{Engine, EngineHandle, EngineOptions, MemorySink, TaskStore};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds and starts an engine from a TOML configuration
fn start_engine(config: &str) -> (EngineHandle, Arc<MemorySink>) {
    let config = parse_config(config).expect("config should be valid");
    let store = TaskStore::from_config(&config).expect("tasks should build");
    let fetcher = BrowserFetcher::new(&config.fetcher).expect("client should build");
    let sink = Arc::new(MemorySink::new());

    let engine = Engine::new(
        EngineOptions::from(&config.engine),
        store,
        Arc::new(fetcher),
        sink.clone(),
    );
    (engine.start(), sink)
}

fn html_page(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(format!("<html><body>{}</body></html>", body))
        .insert_header("content-type", "text/html; charset=utf-8")
}

async fn requests_to(server: &MockServer, target: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == target)
        .count()
}

#[tokio::test]
async fn test_forum_task_emits_matching_topics() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    // Every list page links to the same two topics
    Mock::given(method("GET"))
        .and(path("/group/szsh/discussion"))
        .respond_with(html_page(&format!(
            r#"<table>
                <tr><td class="title"><a href="{0}/group/topic/1/">Sunny room</a></td></tr>
                <tr><td class="title"><a href="{0}/group/topic/2/">Quiet room</a></td></tr>
                <tr><td><a href="{0}/people/alice/">alice</a></td></tr>
            </table>"#,
            base_url
        )))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/group/topic/1/"))
        .respond_with(html_page(r#"<div class="topic-content">南向卧室，带阳台</div>"#))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/group/topic/2/"))
        .respond_with(html_page(r#"<div class="topic-content">北向卧室</div>"#))
        .mount(&mock_server)
        .await;

    let (handle, sink) = start_engine(&format!(
        r#"
[engine]
workers = 4
min-body-bytes = 0
seeds = ["szsh"]

[[task]]
name = "szsh"
url = "{}/group/szsh/"
builtin = "forum"
"#,
        base_url
    ));

    assert!(handle.wait_idle(IDLE_TIMEOUT).await, "crawl should settle");
    let stats = handle.shutdown().await;

    let items = sink.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].task, "szsh");
    assert_eq!(items[0].value, format!("{}/group/topic/1/", base_url));

    // Three list pages, each topic fetched once despite being linked three times
    assert_eq!(requests_to(&mock_server, "/group/szsh/discussion").await, 3);
    assert_eq!(requests_to(&mock_server, "/group/topic/1/").await, 1);
    assert_eq!(requests_to(&mock_server, "/group/topic/2/").await, 1);
    assert_eq!(requests_to(&mock_server, "/people/alice/").await, 0);
    assert_eq!(stats.duplicates, 4);
    assert_eq!(stats.outstanding(), 0);
}

#[tokio::test]
async fn test_failed_fetch_is_retried_once() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    // First attempt fails, the retry succeeds
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(html_page("<h1>Recovered</h1>"))
        .mount(&mock_server)
        .await;

    let (handle, sink) = start_engine(&format!(
        r#"
[engine]
workers = 2
min-body-bytes = 0
seeds = ["flaky"]

[[task]]
name = "flaky"
url = "{0}/"

[task.root]
urls = ["{0}/flaky"]
rule = "title"

[[task.rule]]
name = "title"
kind = "text"
selector = "h1"
"#,
        base_url
    ));

    assert!(handle.wait_idle(IDLE_TIMEOUT).await);
    let stats = handle.shutdown().await;

    let values: Vec<String> = sink.items().into_iter().map(|item| item.value).collect();
    assert_eq!(values, vec!["Recovered".to_string()]);
    assert_eq!(requests_to(&mock_server, "/flaky").await, 2);
    assert_eq!(stats.fetch_failures, 1);
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.dead_letters, 0);
}

#[tokio::test]
async fn test_persistent_failure_gives_up_after_retry() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let (handle, sink) = start_engine(&format!(
        r#"
[engine]
min-body-bytes = 0
seeds = ["down"]

[[task]]
name = "down"
url = "{0}/"

[task.root]
urls = ["{0}/down"]
rule = "title"

[[task.rule]]
name = "title"
kind = "text"
selector = "h1"
"#,
        base_url
    ));

    assert!(handle.wait_idle(IDLE_TIMEOUT).await);

    let task = Arc::clone(handle.store().get("down").unwrap());
    let stats = handle.shutdown().await;

    assert!(sink.is_empty());
    assert_eq!(requests_to(&mock_server, "/down").await, 2);
    assert_eq!(stats.fetch_failures, 2);
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.dead_letters, 1);

    let dead = task.tracker().dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].url, format!("{}/down", base_url));
    assert_eq!(dead[0].attempts, 2);
}

#[tokio::test]
async fn test_short_body_counts_as_failure() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/stub"))
        .respond_with(html_page("<h1>tiny</h1>"))
        .mount(&mock_server)
        .await;

    let (handle, sink) = start_engine(&format!(
        r#"
[engine]
min-body-bytes = 6000
seeds = ["stub"]

[[task]]
name = "stub"
url = "{0}/"

[task.root]
urls = ["{0}/stub"]
rule = "title"

[[task.rule]]
name = "title"
kind = "text"
selector = "h1"
"#,
        base_url
    ));

    assert!(handle.wait_idle(IDLE_TIMEOUT).await);
    let stats = handle.shutdown().await;

    assert!(sink.is_empty());
    assert_eq!(requests_to(&mock_server, "/stub").await, 2);
    assert_eq!(stats.dead_letters, 1);
}

#[tokio::test]
async fn test_crawl_with_depth_limit() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    // A chain a -> b -> c
    for (page, next) in [("a", "b"), ("b", "c"), ("c", "d")] {
        Mock::given(method("GET"))
            .and(path(format!("/{}", page)))
            .respond_with(html_page(&format!(r#"<a href="/{}">next</a>"#, next)))
            .mount(&mock_server)
            .await;
    }

    let (handle, _sink) = start_engine(&format!(
        r#"
[engine]
min-body-bytes = 0
seeds = ["chain"]

[[task]]
name = "chain"
url = "{0}/"
max-depth = 1

[task.root]
urls = ["{0}/a"]
rule = "page"

[[task.rule]]
name = "page"
kind = "links"
selector = "a"
next = "page"
"#,
        base_url
    ));

    assert!(handle.wait_idle(IDLE_TIMEOUT).await);
    let stats = handle.shutdown().await;

    assert_eq!(requests_to(&mock_server, "/a").await, 1);
    assert_eq!(requests_to(&mock_server, "/b").await, 1);
    assert_eq!(requests_to(&mock_server, "/c").await, 0);
    assert_eq!(stats.depth_exceeded, 1);
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.completed, 3);
}
