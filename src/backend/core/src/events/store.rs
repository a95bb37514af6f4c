//! Append-only event store with optimistic concurrency.
//!
//! Streams are keyed by `(aggregateType, aggregateId)`. Ordering within a
//! stream is the store's append sequence, exposed as each event's `version`;
//! timestamps never reorder a stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, instrument, warn};

use super::event::{StoredEvent, StreamKey};
use crate::error::{KernelError, Result};
use crate::telemetry::metrics::KernelMetrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Event Store Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Storage engine contract consumed by the kernel.
///
/// Failure taxonomy:
/// - an empty stream is not an error; callers decide what "not found" means
/// - `ConcurrencyConflict` is retryable (reload, reapply, retry)
/// - `StorageUnavailable` is transient (back off and retry)
/// - `Corruption` and `StreamMismatch` are fatal for the stream
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a batch to one stream, all or nothing.
    ///
    /// Fails with `ConcurrencyConflict` when the stream's current version is
    /// not `expected_version`. Event versions must continue the stream
    /// contiguously from `expected_version + 1`.
    async fn append(
        &self,
        stream: &StreamKey,
        events: Vec<StoredEvent>,
        expected_version: u64,
    ) -> Result<()>;

    /// Every event of a stream, in append order.
    async fn load(&self, stream: &StreamKey) -> Result<Vec<StoredEvent>>;

    /// Events with a version strictly greater than `from_version`.
    async fn load_from_version(
        &self,
        stream: &StreamKey,
        from_version: u64,
    ) -> Result<Vec<StoredEvent>>;

    /// Whether the stream has at least one event.
    async fn has_events(&self, stream: &StreamKey) -> Result<bool>;

    /// Version of the last event in the stream, 0 when empty.
    async fn current_version(&self, stream: &StreamKey) -> Result<u64>;

    /// Every event stamped with `blueprint_id`, across streams, in append order.
    async fn load_by_blueprint(&self, blueprint_id: &str) -> Result<Vec<StoredEvent>>;

    /// Engine name for logs.
    fn name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Event Store
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct StoreInner {
    streams: HashMap<StreamKey, Vec<StoredEvent>>,
    /// Global append order as `(stream, index within stream)`.
    log: Vec<(StreamKey, usize)>,
}

/// Process-local event store.
///
/// A batch is validated in full under the write lock and then committed
/// before the lock is released, so readers never observe a partial batch.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: RwLock<StoreInner>,
    injected_failures: AtomicU32,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` appends fail with `StorageUnavailable`.
    pub fn fail_next_appends(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    pub fn stream_count(&self) -> usize {
        self.inner.read().streams.len()
    }

    pub fn event_count(&self) -> usize {
        self.inner.read().log.len()
    }

    fn take_injected_failure(&self) -> bool {
        self.injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Check a batch against the stream it extends.
fn validate_batch(
    stream: &StreamKey,
    existing: &[StoredEvent],
    events: &[StoredEvent],
    expected_version: u64,
) -> Result<()> {
    let stream_name = stream.to_string();
    let mut established = existing.iter().find_map(|e| e.blueprint_id().map(str::to_string));

    for (offset, event) in events.iter().enumerate() {
        if event.aggregate_type != stream.aggregate_type || event.aggregate_id != stream.aggregate_id {
            return Err(KernelError::stream_mismatch(
                &stream_name,
                format!("event {} belongs to {}", event.id, event.stream_key()),
            ));
        }

        let want = expected_version + 1 + offset as u64;
        if event.version != want {
            return Err(KernelError::stream_mismatch(
                &stream_name,
                format!("event {} has version {}, expected {}", event.id, event.version, want),
            ));
        }

        match (established.as_deref(), event.blueprint_id()) {
            (Some(tenant), attempted) if attempted != Some(tenant) => {
                return Err(KernelError::tenant_mismatch(&stream_name, tenant, attempted));
            }
            (None, Some(tenant)) => established = Some(tenant.to_string()),
            _ => {}
        }
    }
    Ok(())
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[instrument(skip(self, events), fields(stream = %stream, count = events.len()))]
    async fn append(
        &self,
        stream: &StreamKey,
        events: Vec<StoredEvent>,
        expected_version: u64,
    ) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        if self.take_injected_failure() {
            warn!(stream = %stream, "Injected storage failure");
            return Err(KernelError::storage_unavailable("in-memory store is unavailable"));
        }

        let timer = KernelMetrics::start_append(&stream.aggregate_type);
        let count = events.len();
        {
            let mut inner = self.inner.write();
            let existing = inner.streams.get(stream).map(Vec::as_slice).unwrap_or(&[]);
            let actual = existing.len() as u64;

            if actual != expected_version {
                KernelMetrics::concurrency_conflict(&stream.aggregate_type);
                debug!(stream = %stream, expected_version, actual, "Concurrency conflict");
                return Err(KernelError::concurrency_conflict(
                    &stream.to_string(),
                    expected_version,
                    actual,
                ));
            }
            validate_batch(stream, existing, &events, expected_version)?;

            let start = existing.len();
            inner
                .log
                .extend((start..start + count).map(|index| (stream.clone(), index)));
            inner.streams.entry(stream.clone()).or_default().extend(events);
        }
        timer.finish();

        KernelMetrics::events_appended(&stream.aggregate_type, count as u64);
        debug!(
            stream = %stream,
            count,
            version = expected_version + count as u64,
            "Events appended"
        );
        Ok(())
    }

    async fn load(&self, stream: &StreamKey) -> Result<Vec<StoredEvent>> {
        Ok(self
            .inner
            .read()
            .streams
            .get(stream)
            .cloned()
            .unwrap_or_default())
    }

    async fn load_from_version(
        &self,
        stream: &StreamKey,
        from_version: u64,
    ) -> Result<Vec<StoredEvent>> {
        let inner = self.inner.read();
        let events = inner.streams.get(stream).map(Vec::as_slice).unwrap_or(&[]);
        let skip = usize::try_from(from_version).unwrap_or(usize::MAX);
        Ok(events.iter().skip(skip).cloned().collect())
    }

    async fn has_events(&self, stream: &StreamKey) -> Result<bool> {
        Ok(self
            .inner
            .read()
            .streams
            .get(stream)
            .is_some_and(|events| !events.is_empty()))
    }

    async fn current_version(&self, stream: &StreamKey) -> Result<u64> {
        Ok(self
            .inner
            .read()
            .streams
            .get(stream)
            .map_or(0, |events| events.len() as u64))
    }

    #[instrument(skip(self))]
    async fn load_by_blueprint(&self, blueprint_id: &str) -> Result<Vec<StoredEvent>> {
        let inner = self.inner.read();
        Ok(inner
            .log
            .iter()
            .filter_map(|(stream, index)| inner.streams.get(stream)?.get(*index))
            .filter(|event| event.blueprint_id() == Some(blueprint_id))
            .cloned()
            .collect())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}
