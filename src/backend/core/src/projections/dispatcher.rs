//! Post-commit delivery of events to projection builders.
//!
//! The repository hands each committed batch to a [`DispatchHandle`]; a single
//! background worker feeds the batches, in order, to every registered builder.
//! Projections therefore lag the write path and are eventually consistent.
//!
//! Delivery is at-least-once. A retryable builder failure is retried with
//! backoff. An event that arrives ahead of its document, or a stream whose
//! delivery kept failing, is caught up by re-reading the stream from the
//! event store; builders skip what they have already applied. Streams still
//! failing are retried before every later batch and once more at shutdown.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::builder::ProjectionBuilder;
use crate::config::{ProjectionConfig, RetryConfig};
use crate::error::{KernelError, Result};
use crate::events::{EventStore, StoredEvent, StreamKey};
use crate::telemetry::metrics::ProjectionOutcome;

/// Counters reported when the worker stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub batches: u64,
    pub applied: u64,
    pub skipped: u64,
    pub ignored: u64,
    pub rejected: u64,
    /// Events that arrived ahead of their document.
    pub out_of_order: u64,
    /// Handler attempts repeated after a retryable failure.
    pub retried: u64,
    /// Stream re-reads from the event store.
    pub catch_ups: u64,
    /// Deliveries that failed after every retry.
    pub failed: u64,
    /// Builder/stream pairs still behind when the worker stopped.
    pub abandoned: u64,
}

impl DispatchStats {
    fn record(&mut self, outcome: ProjectionOutcome) {
        match outcome {
            ProjectionOutcome::Applied => self.applied += 1,
            ProjectionOutcome::Skipped => self.skipped += 1,
            ProjectionOutcome::Ignored => self.ignored += 1,
            ProjectionOutcome::Rejected => self.rejected += 1,
            ProjectionOutcome::OutOfOrder => self.out_of_order += 1,
        }
    }
}

/// Cloneable sender side of the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    sender: mpsc::Sender<Vec<StoredEvent>>,
}

impl DispatchHandle {
    /// Queue a committed batch. Waits while the queue is full.
    pub async fn dispatch(&self, events: Vec<StoredEvent>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        self.sender
            .send(events)
            .await
            .map_err(|_| KernelError::internal("projection dispatcher has stopped"))
    }
}

/// Background worker that owns the builders.
pub struct ProjectionDispatcher {
    handle: DispatchHandle,
    shutdown: oneshot::Sender<()>,
    worker: JoinHandle<DispatchStats>,
}

impl std::fmt::Debug for ProjectionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionDispatcher")
            .field("finished", &self.worker.is_finished())
            .finish()
    }
}

impl ProjectionDispatcher {
    /// Spawn the worker on the current tokio runtime with the default
    /// delivery retry policy. `store` is read when a stream needs catching up.
    pub fn spawn(
        store: Arc<dyn EventStore>,
        builders: Vec<Arc<dyn ProjectionBuilder>>,
        capacity: usize,
    ) -> Self {
        Self::start(store, builders, capacity, RetryConfig::default())
    }

    /// Spawn the worker with queue capacity and retry policy from config.
    pub fn from_config(
        store: Arc<dyn EventStore>,
        builders: Vec<Arc<dyn ProjectionBuilder>>,
        config: &ProjectionConfig,
    ) -> Self {
        Self::start(
            store,
            builders,
            config.channel_capacity,
            config.delivery_retry.clone(),
        )
    }

    fn start(
        store: Arc<dyn EventStore>,
        builders: Vec<Arc<dyn ProjectionBuilder>>,
        capacity: usize,
        retry: RetryConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (shutdown, shutdown_rx) = oneshot::channel();
        info!(
            builders = builders.len(),
            capacity,
            store = store.name(),
            "Projection dispatcher started"
        );
        let worker = Worker {
            store,
            builders,
            retry,
            behind: BTreeSet::new(),
            stats: DispatchStats::default(),
        };
        let worker = tokio::spawn(worker.run(receiver, shutdown_rx));
        Self {
            handle: DispatchHandle { sender },
            shutdown,
            worker,
        }
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Stop the worker after it has drained every batch queued so far.
    pub async fn shutdown(self) -> Result<DispatchStats> {
        let _ = self.shutdown.send(());
        let stats = self
            .worker
            .await
            .map_err(|e| KernelError::internal(format!("projection worker panicked: {e}")))?;
        info!(?stats, "Projection dispatcher stopped");
        Ok(stats)
    }
}

struct Worker {
    store: Arc<dyn EventStore>,
    builders: Vec<Arc<dyn ProjectionBuilder>>,
    retry: RetryConfig,
    /// `(builder index, stream)` pairs whose delivery failed and that must be
    /// caught up from the store.
    behind: BTreeSet<(usize, StreamKey)>,
    stats: DispatchStats,
}

impl Worker {
    async fn run(
        mut self,
        mut receiver: mpsc::Receiver<Vec<StoredEvent>>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> DispatchStats {
        loop {
            tokio::select! {
                biased;
                batch = receiver.recv() => match batch {
                    Some(batch) => self.deliver(&batch).await,
                    None => break,
                },
                _ = &mut shutdown => {
                    receiver.close();
                    while let Some(batch) = receiver.recv().await {
                        self.deliver(&batch).await;
                    }
                    break;
                }
            }
        }

        self.retry_behind().await;
        self.stats.abandoned = self.behind.len() as u64;
        for (index, stream) in &self.behind {
            warn!(
                builder = self.builders[*index].name(),
                stream = %stream,
                "Projection still behind at shutdown; rebuild required"
            );
        }
        self.stats
    }

    #[instrument(skip_all, fields(count = batch.len()))]
    async fn deliver(&mut self, batch: &[StoredEvent]) {
        self.stats.batches += 1;
        self.retry_behind().await;

        for event in batch {
            for index in 0..self.builders.len() {
                self.deliver_one(index, event).await;
            }
        }
        debug!(batches = self.stats.batches, "Batch delivered");
    }

    async fn deliver_one(&mut self, index: usize, event: &StoredEvent) {
        let stream = event.stream_key();
        // The pending catch-up will read this event from the store.
        if self.behind.contains(&(index, stream.clone())) {
            return;
        }

        match self.handle(index, event).await {
            Ok(ProjectionOutcome::OutOfOrder) => {
                self.stats.out_of_order += 1;
                self.catch_up(index, stream).await;
            }
            Ok(outcome) => self.stats.record(outcome),
            Err(err) => {
                self.stats.failed += 1;
                err.log();
                warn!(
                    builder = self.builders[index].name(),
                    event_id = %event.id,
                    stream = %stream,
                    "Projection delivery failed; stream queued for catch-up"
                );
                self.behind.insert((index, stream));
            }
        }
    }

    /// Run one builder on one event, retrying retryable failures.
    async fn handle(&mut self, index: usize, event: &StoredEvent) -> Result<ProjectionOutcome> {
        let builder = Arc::clone(&self.builders[index]);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match builder.handle_event(event).await {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    self.stats.retried += 1;
                    let delay = self.retry.backoff_for(attempt);
                    debug!(
                        builder = builder.name(),
                        event_id = %event.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying projection"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Re-read `stream` and feed it to one builder from the start.
    async fn catch_up(&mut self, index: usize, stream: StreamKey) {
        self.stats.catch_ups += 1;
        let events = match self.store.load(&stream).await {
            Ok(events) => events,
            Err(err) => {
                err.log();
                self.behind.insert((index, stream));
                return;
            }
        };

        for event in &events {
            match self.handle(index, event).await {
                Ok(ProjectionOutcome::OutOfOrder) => {
                    // A rejected event upstream leaves a hole the store cannot fill.
                    self.stats.out_of_order += 1;
                    warn!(
                        builder = self.builders[index].name(),
                        stream = %stream,
                        version = event.version,
                        "Catch-up stopped at an unprojectable event; rebuild required"
                    );
                    return;
                }
                Ok(outcome) => self.stats.record(outcome),
                Err(err) => {
                    self.stats.failed += 1;
                    err.log();
                    self.behind.insert((index, stream));
                    return;
                }
            }
        }

        self.behind.remove(&(index, stream));
    }

    async fn retry_behind(&mut self) {
        let pending = std::mem::take(&mut self.behind);
        for (index, stream) in pending {
            debug!(builder = self.builders[index].name(), stream = %stream, "Catching up");
            self.catch_up(index, stream).await;
        }
    }
}
