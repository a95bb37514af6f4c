//! Projection builder contract.
//!
//! A builder is an intentionally partial consumer of the event universe: an
//! event type it does not know is logged and ignored, never an error. This is
//! the opposite of the aggregate layer, where an unknown type is fatal.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::sink::DocumentSink;
use crate::error::{KernelError, Result};
use crate::events::StoredEvent;
use crate::telemetry::metrics::ProjectionOutcome;

/// Maintains one derived document per aggregate.
///
/// Handlers must be idempotent: delivering the same event twice leaves the
/// document exactly as delivering it once. Errors are reserved for sink
/// failures; invalid payloads return [`ProjectionOutcome::Rejected`] without
/// writing anything.
#[async_trait]
pub trait ProjectionBuilder: Send + Sync {
    /// Builder name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Collection the documents live in.
    fn collection(&self) -> &str;

    fn sink(&self) -> &dyn DocumentSink;

    /// Fold one event into the read model.
    async fn handle_event(&self, event: &StoredEvent) -> Result<ProjectionOutcome>;

    /// Discard and reconstruct the document for `aggregate_id`.
    ///
    /// Rejects a blank id, or any event belonging to another aggregate, before
    /// touching the sink. Events are replayed in timestamp order; ties keep
    /// stream order. When timestamps contradict stream order (clock skew) the
    /// stream version wins. An event the builder cannot place because an
    /// earlier version is missing fails the rebuild.
    #[instrument(skip(self, events), fields(builder = self.name(), count = events.len()))]
    async fn rebuild(&self, aggregate_id: &str, events: &[StoredEvent]) -> Result<()> {
        if aggregate_id.trim().is_empty() {
            return Err(KernelError::missing_field("aggregateId"));
        }
        if let Some(foreign) = events.iter().find(|e| e.aggregate_id != aggregate_id) {
            return Err(KernelError::validation(format!(
                "Cannot rebuild {}: event {} belongs to aggregate {}",
                aggregate_id, foreign.id, foreign.aggregate_id
            )));
        }

        let mut ordered: Vec<&StoredEvent> = events.iter().collect();
        ordered.sort_by(|a, b| {
            a.metadata
                .timestamp
                .cmp(&b.metadata.timestamp)
                .then(a.version.cmp(&b.version))
        });
        if !follows_stream_order(&ordered) {
            warn!(
                builder = self.name(),
                aggregate_id,
                "Event timestamps contradict stream order; replaying by version"
            );
            ordered.sort_by_key(|e| e.version);
        }

        self.sink().delete(self.collection(), aggregate_id).await?;
        for event in ordered {
            if self.handle_event(event).await? == ProjectionOutcome::OutOfOrder {
                return Err(KernelError::stream_mismatch(
                    &event.stream_key().to_string(),
                    format!(
                        "cannot rebuild {}: event {} (version {}) follows a missing version",
                        aggregate_id, event.id, event.version
                    ),
                ));
            }
        }

        debug!(builder = self.name(), aggregate_id, "Projection rebuilt");
        Ok(())
    }
}

/// True when, per stream, versions only increase along `events`.
fn follows_stream_order(events: &[&StoredEvent]) -> bool {
    let mut last: HashMap<&str, u64> = HashMap::new();
    events.iter().all(|event| {
        let previous = last.insert(event.aggregate_type.as_str(), event.version);
        previous.map_or(true, |previous| previous < event.version)
    })
}
