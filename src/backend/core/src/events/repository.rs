//! Repository: bridges aggregates to the event store.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::aggregate::{AggregateRoot, AggregateState};
use super::event::{StoredEvent, StreamKey};
use super::store::EventStore;
use crate::config::RetryConfig;
use crate::error::{KernelError, Result};
use crate::projections::DispatchHandle;
use crate::telemetry::metrics::KernelMetrics;

/// Loads and saves one aggregate type.
///
/// Two concurrent `save` calls on the same aggregate are arbitrated only by
/// the store's expected-version check. [`execute`](Self::execute) wraps the
/// reload, reapply, retry loop for callers that want it.
pub struct Repository<S: AggregateState> {
    store: Arc<dyn EventStore>,
    dispatcher: Option<DispatchHandle>,
    retry: RetryConfig,
    _state: PhantomData<fn() -> S>,
}

impl<S: AggregateState> Clone for Repository<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            dispatcher: self.dispatcher.clone(),
            retry: self.retry.clone(),
            _state: PhantomData,
        }
    }
}

impl<S: AggregateState> std::fmt::Debug for Repository<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("aggregate_type", &S::AGGREGATE_TYPE)
            .field("store", &self.store.name())
            .field("dispatcher", &self.dispatcher.is_some())
            .field("retry", &self.retry)
            .finish()
    }
}

impl<S: AggregateState> Repository<S> {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            dispatcher: None,
            retry: RetryConfig::default(),
            _state: PhantomData,
        }
    }

    /// Forward committed events to projections.
    pub fn with_dispatcher(mut self, dispatcher: DispatchHandle) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    fn stream(id: &str) -> StreamKey {
        StreamKey::new(S::AGGREGATE_TYPE, id)
    }

    /// Persist pending events and clear the queue.
    ///
    /// With nothing pending the store is not called. The append expects the
    /// version the aggregate had when it was loaded; on any error the queue is
    /// left intact. Returns the committed events.
    #[instrument(skip(self, aggregate), fields(aggregate_type = S::AGGREGATE_TYPE, id = aggregate.id()))]
    pub async fn save(&self, aggregate: &mut AggregateRoot<S>) -> Result<Vec<StoredEvent>> {
        if !aggregate.has_uncommitted_events() {
            return Ok(Vec::new());
        }

        let events = aggregate.uncommitted_stored()?;
        let expected_version = aggregate.persisted_version();
        self.store
            .append(&aggregate.stream_key(), events.clone(), expected_version)
            .await?;
        aggregate.clear_uncommitted_events();

        debug!(
            count = events.len(),
            version = aggregate.version(),
            "Aggregate saved"
        );

        if let Some(dispatcher) = &self.dispatcher {
            if let Err(err) = dispatcher.dispatch(events.clone()).await {
                err.log();
                warn!(
                    count = events.len(),
                    "Committed events were not handed to projections; rebuild required"
                );
            }
        }
        Ok(events)
    }

    /// Load an aggregate; an empty stream is `None`, never a blank aggregate.
    #[instrument(skip(self), fields(aggregate_type = S::AGGREGATE_TYPE))]
    pub async fn load(&self, id: &str) -> Result<Option<AggregateRoot<S>>> {
        let events = self.store.load(&Self::stream(id)).await?;
        if events.is_empty() {
            return Ok(None);
        }
        AggregateRoot::from_stored(id, &events).map(Some)
    }

    /// Load an aggregate or fail with `RecordNotFound`.
    pub async fn get(&self, id: &str) -> Result<AggregateRoot<S>> {
        self.load(id)
            .await?
            .ok_or_else(|| KernelError::not_found(S::AGGREGATE_TYPE, id))
    }

    pub async fn exists(&self, id: &str) -> Result<bool> {
        self.store.has_events(&Self::stream(id)).await
    }

    /// Load, apply `operation`, save; retry on retryable failures.
    ///
    /// Conflicts and transient storage errors trigger a fresh load and a new
    /// attempt after exponential backoff, up to `max_attempts` in total.
    /// Anything else, including business rejections from `operation`, is
    /// returned at once.
    #[instrument(skip(self, operation), fields(aggregate_type = S::AGGREGATE_TYPE))]
    pub async fn execute<F>(&self, id: &str, mut operation: F) -> Result<AggregateRoot<S>>
    where
        F: FnMut(&mut AggregateRoot<S>) -> Result<()> + Send,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(id, &mut operation).await {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.backoff_for(attempt);
                    KernelMetrics::command_retry(S::AGGREGATE_TYPE);
                    warn!(
                        id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying command"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn attempt<F>(&self, id: &str, operation: &mut F) -> Result<AggregateRoot<S>>
    where
        F: FnMut(&mut AggregateRoot<S>) -> Result<()> + Send,
    {
        let mut aggregate = self.get(id).await?;
        operation(&mut aggregate)?;
        self.save(&mut aggregate).await?;
        Ok(aggregate)
    }
}
