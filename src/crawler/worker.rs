//! Worker loop
//!
//! Each worker repeatedly pulls one request from the scheduler and runs it through
//! depth check, dedup, fetch, the plausible-size gate and the request's rule.
//! Derived requests go back to the scheduler's intake; items go to the result
//! channel. Failures never leave the worker.

use crate::crawler::request::Request;
use crate::crawler::scheduler::{Dispatch, Intake};
use crate::crawler::task::Context;
use crate::output::{EngineStats, Item};
use crate::state::FailureOutcome;
use crate::FetchError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub(crate) struct Worker {
    pub id: usize,
    pub dispatch: Dispatch,
    pub intake: Intake,
    pub out: mpsc::UnboundedSender<Item>,
    pub stats: Arc<EngineStats>,

    /// Bodies shorter than this are treated as failed fetches
    pub min_body_bytes: usize,
}

impl Worker {
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("Worker {} started", self.id);

        loop {
            let request = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = self.dispatch.pull() => match next {
                    Some(request) => request,
                    None => break,
                },
            };

            self.process(request).await;
            self.stats.record_completed();
        }

        tracing::debug!("Worker {} stopped", self.id);
    }

    async fn process(&self, request: Request) {
        if let Err(e) = request.check() {
            tracing::warn!("Dropping request: {}", e);
            self.stats.record_depth_exceeded();
            return;
        }

        let task = Arc::clone(request.task());
        let tracker = task.tracker();

        if task.reload() {
            tracker.store_visited([&request]);
        } else if !tracker.mark_visited(&request) {
            tracing::debug!("Skipping already visited {}", request.url);
            self.stats.record_duplicate();
            return;
        }

        let body = match self.fetch(&request).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Can't fetch {}: {}", request.url, e);
                self.stats.record_fetch_failure();
                self.fail(&request);
                return;
            }
        };

        let parse = match task.parse_func(&request.rule_name) {
            Ok(parse) => parse,
            Err(e) => {
                tracing::error!("Can't parse {}: {}", request.url, e);
                self.stats.record_parse_failure();
                return;
            }
        };

        let context = Context {
            body: &body,
            request: &request,
        };
        // A panicking rule must not take the worker down with it
        let result = match panic::catch_unwind(AssertUnwindSafe(|| parse(&context))) {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!("Rule '{}' failed for {}: {}", request.rule_name, request.url, e);
                self.stats.record_parse_failure();
                return;
            }
            Err(cause) => {
                tracing::error!(
                    "Rule '{}' panicked on {}: {}",
                    request.rule_name,
                    request.url,
                    panic_message(&*cause)
                );
                self.stats.record_parse_failure();
                return;
            }
        };

        tracing::debug!(
            "Parsed {}: {} requests, {} items",
            request.url,
            result.requests.len(),
            result.items.len()
        );

        if !result.requests.is_empty() {
            self.intake.submit_all(result.requests);
        }

        for item in result.items {
            if self.out.send(item).is_err() {
                tracing::warn!("Result channel closed, dropping item from {}", request.url);
                break;
            }
            self.stats.record_item_forwarded();
        }
    }

    /// Fetches the body and applies the plausible-size gate
    async fn fetch(&self, request: &Request) -> Result<String, FetchError> {
        let fetcher = request
            .task()
            .fetcher()
            .ok_or_else(|| FetchError::NoFetcher {
                task: request.task().name().to_string(),
            })?;

        let body = fetcher.get(request).await?;
        if body.len() < self.min_body_bytes {
            return Err(FetchError::BodyTooSmall {
                url: request.url.clone(),
                len: body.len(),
                min: self.min_body_bytes,
            });
        }
        Ok(body)
    }

    fn fail(&self, request: &Request) {
        match request.task().tracker().set_failure(request, &self.intake) {
            FailureOutcome::Retried => {
                tracing::info!("Retrying {}", request.url);
                self.stats.record_retry();
            }
            FailureOutcome::GaveUp { attempts } => {
                tracing::error!("Giving up on {} after {} attempts", request.url, attempts);
                self.stats.record_dead_letter();
            }
            FailureOutcome::Abandoned => {
                tracing::warn!("Retry of {} abandoned, scheduler stopped", request.url);
            }
        }
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> &str {
    if let Some(message) = cause.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown cause"
    }
}
