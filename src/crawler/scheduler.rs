//! Scheduler: the single dispatch authority
//!
//! This module handles:
//! - The priority queue and the normal queue, owned exclusively by the scheduler
//! - Intake of new requests from seeding, workers and the retry path
//! - Hand-off of the next eligible request to whichever worker asks first
//!
//! Nothing outside the scheduler task touches the queues. Requests come in over an
//! unbounded intake channel; idle workers announce themselves by sending a oneshot
//! reply slot over the ready channel and the scheduler answers it with a request.

use crate::crawler::request::Request;
use crate::output::EngineStats;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// How the scheduler picks the request a ready worker receives
///
/// Both policies drain pending arrivals before serving a ready worker when the two
/// events are available at the same time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchPolicy {
    /// The request is chosen at hand-off time, so every queued priority request is
    /// dispatched before any queued normal request.
    #[default]
    Prioritized,

    /// One request is taken off the queues and held until a worker accepts it.
    /// Requests arriving while one is held are queued behind it even if they carry
    /// a higher priority.
    HeldSlot,
}

/// Submit side of the scheduler; cheap to clone
#[derive(Debug, Clone)]
pub struct Intake {
    tx: mpsc::UnboundedSender<Request>,
    stats: Arc<EngineStats>,
}

impl Intake {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Request>, stats: Arc<EngineStats>) -> Self {
        Self { tx, stats }
    }

    /// Queues a request; returns false if the scheduler has stopped
    ///
    /// Never blocks: the intake channel is unbounded.
    pub fn submit(&self, request: Request) -> bool {
        // Counted before the send so a worker can never complete a request that
        // is not yet counted as submitted
        self.stats.record_submitted(1);
        match self.tx.send(request) {
            Ok(()) => true,
            Err(rejected) => {
                self.stats.record_rejected();
                tracing::warn!("Scheduler stopped, dropping {}", rejected.0.url);
                false
            }
        }
    }

    /// Queues every request in order; returns how many were accepted
    pub fn submit_all<I>(&self, requests: I) -> usize
    where
        I: IntoIterator<Item = Request>,
    {
        requests
            .into_iter()
            .map(|request| self.submit(request))
            .filter(|accepted| *accepted)
            .count()
    }
}

/// Pull side of the scheduler, shared by all workers
#[derive(Debug, Clone)]
pub struct Dispatch {
    ready_tx: mpsc::UnboundedSender<oneshot::Sender<Request>>,
}

impl Dispatch {
    /// Waits for the next request
    ///
    /// Returns None once the scheduler has stopped.
    pub async fn pull(&self) -> Option<Request> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ready_tx.send(reply_tx).ok()?;
        reply_rx.await.ok()
    }
}

/// Creates a scheduler together with its intake and dispatch handles
pub fn channel(policy: DispatchPolicy, stats: Arc<EngineStats>) -> (Scheduler, Intake, Dispatch) {
    let (intake_tx, intake_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = mpsc::unbounded_channel();

    let scheduler = Scheduler {
        intake_rx,
        ready_rx,
        priority_queue: VecDeque::new(),
        queue: VecDeque::new(),
        held: None,
        policy,
        stats: Arc::clone(&stats),
    };

    (scheduler, Intake::new(intake_tx, stats), Dispatch { ready_tx })
}

/// Owns the request queues and decides which request each idle worker receives
pub struct Scheduler {
    intake_rx: mpsc::UnboundedReceiver<Request>,
    ready_rx: mpsc::UnboundedReceiver<oneshot::Sender<Request>>,

    /// Requests with priority > 0, FIFO
    priority_queue: VecDeque<Request>,

    /// Requests with priority 0, FIFO
    queue: VecDeque<Request>,

    /// Request taken off the queues and waiting for a worker (held-slot policy)
    held: Option<Request>,

    policy: DispatchPolicy,
    stats: Arc<EngineStats>,
}

impl Scheduler {
    /// Runs the dispatch loop until shutdown is signalled or every handle is gone
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("Scheduler started with {:?} dispatch", self.policy);
        let mut intake_open = true;

        loop {
            if *shutdown.borrow() {
                break;
            }

            if self.policy == DispatchPolicy::HeldSlot && self.held.is_none() {
                self.held = self.pop_next();
            }

            let can_dispatch = match self.policy {
                DispatchPolicy::HeldSlot => self.held.is_some(),
                DispatchPolicy::Prioritized => !self.is_empty(),
            };

            if !intake_open && !can_dispatch {
                break;
            }

            tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                incoming = self.intake_rx.recv(), if intake_open => match incoming {
                    Some(request) => self.enqueue(request),
                    None => intake_open = false,
                },

                Some(worker) = self.ready_rx.recv(), if can_dispatch => {
                    let next = match self.policy {
                        DispatchPolicy::HeldSlot => self.held.take(),
                        DispatchPolicy::Prioritized => self.pop_next(),
                    };
                    if let Some(request) = next {
                        self.hand_off(worker, request);
                    }
                }

                else => break,
            }
        }

        tracing::debug!("Scheduler stopped with {} requests pending", self.pending());
    }

    /// Appends a request to the queue of its priority class
    fn enqueue(&mut self, request: Request) {
        tracing::trace!(
            "Queued {} (priority {}, depth {})",
            request.url,
            request.priority,
            request.depth
        );
        if request.priority > 0 {
            self.priority_queue.push_back(request);
        } else {
            self.queue.push_back(request);
        }
    }

    /// Head of the priority queue, else head of the normal queue
    fn pop_next(&mut self) -> Option<Request> {
        self.priority_queue
            .pop_front()
            .or_else(|| self.queue.pop_front())
    }

    fn hand_off(&mut self, worker: oneshot::Sender<Request>, request: Request) {
        match worker.send(request) {
            Ok(()) => self.stats.record_dispatched(),
            Err(request) => {
                // The worker stopped waiting; the request keeps its place.
                tracing::trace!("Worker gone before receiving {}", request.url);
                self.restore(request);
            }
        }
    }

    /// Puts an undelivered request back at the front of the line
    fn restore(&mut self, request: Request) {
        match self.policy {
            DispatchPolicy::HeldSlot => self.held = Some(request),
            DispatchPolicy::Prioritized if request.priority > 0 => {
                self.priority_queue.push_front(request)
            }
            DispatchPolicy::Prioritized => self.queue.push_front(request),
        }
    }

    /// Number of requests waiting for a worker
    pub fn pending(&self) -> usize {
        self.priority_queue.len() + self.queue.len() + usize::from(self.held.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}
