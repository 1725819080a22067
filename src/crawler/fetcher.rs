//! HTTP fetcher implementation
//!
//! This module handles all network access for the engine, including:
//! - The `Fetcher` capability the workers call
//! - Building a browser-like reqwest client with a per-instance timeout
//! - Applying a task's cookie and wait hint to each request
//! - Decoding response bodies to UTF-8 using the declared charset
//! - Optional round-robin proxy rotation

use crate::config::FetcherConfig;
use crate::crawler::proxy::RoundRobinProxy;
use crate::crawler::request::Request;
use crate::{FetchError, WeftError};
use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::{Client, Proxy};
use std::sync::Arc;
use std::time::Duration;

/// Fetches the body of a request
///
/// Implementations return the body already decoded to UTF-8. The engine treats
/// every error the same way, so the variant only matters for logging.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, request: &Request) -> Result<String, FetchError>;
}

/// Default user agent: a desktop browser, since many targets serve bots a shell page
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_4) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/80.0.3987.149 Safari/537.36";

/// reqwest-backed fetcher that presents itself as a browser
#[derive(Debug, Clone)]
pub struct BrowserFetcher {
    client: Client,
}

impl BrowserFetcher {
    /// Builds a fetcher from configuration
    ///
    /// # Returns
    ///
    /// * `Ok(BrowserFetcher)` - Client built, proxies (if any) installed
    /// * `Err(WeftError)` - Invalid proxy list or client build failure
    pub fn new(config: &FetcherConfig) -> Result<Self, WeftError> {
        let proxy = if config.proxies.is_empty() {
            None
        } else {
            Some(RoundRobinProxy::new(&config.proxies)?)
        };
        let client = build_http_client(config, proxy)?;
        Ok(Self { client })
    }
}

/// Builds an HTTP client with a browser user agent and the configured timeout
pub fn build_http_client(
    config: &FetcherConfig,
    proxy: Option<RoundRobinProxy>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_secs(config.timeout_secs))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        tracing::info!("Rotating over {} proxies", proxy.len());
        let proxy = Arc::new(proxy);
        builder = builder.proxy(Proxy::custom(move |_url| Some(proxy.next().clone())));
    }

    builder.build()
}

#[async_trait]
impl Fetcher for BrowserFetcher {
    async fn get(&self, request: &Request) -> Result<String, FetchError> {
        let task = request.task();
        let url = request.url.as_str();

        let wait = task.wait_time();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let mut builder = self.client.request(request.method.into(), url);
        if !task.cookie().is_empty() {
            builder = builder.header(COOKIE, task.cookie());
        }

        let response = builder.send().await.map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| classify(url, e))
    }
}

/// Maps a reqwest error onto the fetch error taxonomy
fn classify(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Http {
            url: url.to_string(),
            source: error,
        }
    }
}
