//! Event-sourced aggregate root.
//!
//! An aggregate is split in two:
//!
//! - an [`AggregateState`]: plain domain state plus a pure, exhaustive `apply`
//!   over its declared event union. This is the only code that mutates state.
//! - the generic [`AggregateRoot`]: identity, version, tenant boundary,
//!   causation chain and the uncommitted-events queue.
//!
//! Domain transition methods validate their guard clauses first and only then
//! call `raise_event`, so a rejected command never touches state, version or
//! the queue. Construction and raising are crate-private: outside the crate an
//! aggregate is obtained from a domain factory (`Workspace::create`) or from
//! history ([`AggregateRoot::from_events`], [`AggregateRoot::from_stored`]),
//! and only changes through its domain methods.
//!
//! ```compile_fail
//! use blueprint_core::domain::Workspace;
//!
//! let workspace = Workspace::new("W1");
//! ```
//!
//! ```compile_fail
//! use blueprint_core::domain::{Workspace, WorkspaceEvent};
//! use blueprint_core::events::{CausalityContext, EventServices};
//!
//! let services = EventServices::system();
//! let ctx = CausalityContext::new("A1", "Archive");
//! let mut ws = Workspace::create(&services, &ctx, "W1", "A1", "A1", "Acme").unwrap();
//! ws.archive(&services, &ctx, None).unwrap();
//! ws.raise_event(&services, &ctx, WorkspaceEvent::WorkspaceArchived { reason: None })
//!     .unwrap();
//! ```

use std::fmt;
use std::ops::Deref;

use tracing::{debug, instrument};

use super::causality::{CausalityContext, CausalityMetadata, SYSTEM_CAUSE};
use super::clock::EventServices;
use super::event::{DomainEvent, EventId, EventPayload, StoredEvent, StreamKey};
use crate::error::{KernelError, Result};
use crate::telemetry::metrics::KernelMetrics;

// =============================================================================
// Aggregate State Trait
// =============================================================================

/// Domain state that can be folded from an event stream.
///
/// Given the same stream, `apply` must produce the same state: no I/O, no
/// clock reads, no failure. The match over `Self::Event` is exhaustive, so a
/// new variant without a handler does not compile; events from outside the
/// union are rejected while decoding, before they ever reach `apply`.
pub trait AggregateState: Default + Clone + fmt::Debug + Send + Sync + 'static {
    /// `aggregateType` discriminator written on every event.
    const AGGREGATE_TYPE: &'static str;

    /// The declared event union.
    type Event: EventPayload;

    /// Fold one event into state.
    fn apply(&mut self, event: &DomainEvent<Self::Event>);
}

// =============================================================================
// Aggregate Root
// =============================================================================

/// Identity, version and pending events wrapped around an [`AggregateState`].
#[derive(Debug, Clone)]
pub struct AggregateRoot<S: AggregateState> {
    id: String,
    version: u64,
    blueprint_id: Option<String>,
    last_event_id: Option<EventId>,
    state: S,
    uncommitted: Vec<DomainEvent<S::Event>>,
}

impl<S: AggregateState> AggregateRoot<S> {
    /// An aggregate with no history.
    ///
    /// Domain factories start from this and immediately raise their creation
    /// event; loading goes through [`from_events`](Self::from_events) or
    /// [`from_stored`](Self::from_stored).
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            blueprint_id: None,
            last_event_id: None,
            state: S::default(),
            uncommitted: Vec::new(),
        }
    }

    /// Rebuild from typed events. Nothing is queued as uncommitted.
    pub fn from_events(
        id: impl Into<String>,
        events: impl IntoIterator<Item = DomainEvent<S::Event>>,
    ) -> Result<Self> {
        let mut root = Self::new(id);
        root.replay(events)?;
        Ok(root)
    }

    /// Rebuild from stored events, decoding each against the event union.
    ///
    /// Any event that cannot be decoded fails the whole load; nothing is
    /// skipped.
    #[instrument(skip(events), fields(aggregate_type = S::AGGREGATE_TYPE, count = events.len()))]
    pub fn from_stored(id: &str, events: &[StoredEvent]) -> Result<Self> {
        let decoded = events
            .iter()
            .map(StoredEvent::decode::<S::Event>)
            .collect::<Result<Vec<_>>>()?;
        Self::from_events(id, decoded)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Event flow
    // ─────────────────────────────────────────────────────────────────────────

    /// Raise an event inside the aggregate's established blueprint.
    pub(crate) fn raise_event(
        &mut self,
        services: &EventServices,
        context: &CausalityContext,
        payload: S::Event,
    ) -> Result<&DomainEvent<S::Event>> {
        let blueprint = self.blueprint_id.clone();
        self.raise_event_in(services, context, blueprint.as_deref(), payload)
    }

    /// Raise an event, naming its blueprint explicitly.
    ///
    /// Used by creation events, which establish the tenant boundary. Once a
    /// blueprint is established every later event must carry the same one. A
    /// context scoped to a blueprint may only raise events in that blueprint;
    /// a root event without a blueprint is exempt.
    pub(crate) fn raise_event_in(
        &mut self,
        services: &EventServices,
        context: &CausalityContext,
        blueprint_id: Option<&str>,
        payload: S::Event,
    ) -> Result<&DomainEvent<S::Event>> {
        let stream = self.stream_key();
        self.check_tenant(&stream, blueprint_id)?;
        if let Some(scope) = context.blueprint_id.as_deref() {
            let exempt = blueprint_id.is_none() && payload.is_root_event();
            if !exempt && blueprint_id != Some(scope) {
                return Err(KernelError::tenant_mismatch(&stream.to_string(), scope, blueprint_id)
                    .with_context("source", "command"));
            }
        }

        let default_cause = self
            .last_event_id
            .as_ref()
            .map(EventId::as_str)
            .unwrap_or(SYSTEM_CAUSE);
        let metadata = CausalityMetadata::stamp(
            context,
            default_cause,
            blueprint_id,
            payload.is_root_event(),
            services.now(),
        )?;

        let event = DomainEvent::new(
            EventId(services.next_id()),
            &stream,
            self.version + 1,
            payload,
            metadata,
        );
        self.apply_event(&event);
        debug!(
            stream = %stream,
            event_type = event.event_type(),
            version = self.version,
            "Event raised"
        );
        self.uncommitted.push(event);

        let last = self.uncommitted.len() - 1;
        Ok(&self.uncommitted[last])
    }

    /// Apply historical events without queueing them.
    ///
    /// Each event must belong to this stream and carry the next version. On
    /// error the aggregate is partially replayed and must be discarded.
    pub fn replay(&mut self, events: impl IntoIterator<Item = DomainEvent<S::Event>>) -> Result<()> {
        let stream = self.stream_key();
        let mut replayed = 0u64;

        for event in events {
            if event.aggregate_type() != S::AGGREGATE_TYPE || event.aggregate_id() != self.id {
                return Err(KernelError::stream_mismatch(
                    &stream.to_string(),
                    format!("event {} belongs to {}", event.id(), event.stream_key()),
                ));
            }
            if event.version() != self.version + 1 {
                return Err(KernelError::stream_mismatch(
                    &stream.to_string(),
                    format!(
                        "event {} has version {}, expected {}",
                        event.id(),
                        event.version(),
                        self.version + 1
                    ),
                ));
            }
            self.check_tenant(&stream, event.metadata().blueprint_id.as_deref())?;
            self.apply_event(&event);
            replayed += 1;
        }

        if replayed > 0 {
            KernelMetrics::events_replayed(S::AGGREGATE_TYPE, replayed);
        }
        Ok(())
    }

    /// Snapshot of the pending events. Mutating the copy does not affect the
    /// aggregate.
    pub fn uncommitted_events(&self) -> Vec<DomainEvent<S::Event>> {
        self.uncommitted.clone()
    }

    /// Pending events in stored form.
    pub fn uncommitted_stored(&self) -> Result<Vec<StoredEvent>> {
        self.uncommitted.iter().map(StoredEvent::from_domain).collect()
    }

    pub fn has_uncommitted_events(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Drop the pending queue (after a successful append, or in tests).
    pub fn clear_uncommitted_events(&mut self) {
        self.uncommitted.clear();
    }

    fn apply_event(&mut self, event: &DomainEvent<S::Event>) {
        self.state.apply(event);
        self.version += 1;
        self.last_event_id = Some(event.id().clone());
        if self.blueprint_id.is_none() {
            self.blueprint_id = event.metadata().blueprint_id.clone();
        }
    }

    fn check_tenant(&self, stream: &StreamKey, blueprint_id: Option<&str>) -> Result<()> {
        match self.blueprint_id.as_deref() {
            Some(established) if Some(established) != blueprint_id => Err(
                KernelError::tenant_mismatch(&stream.to_string(), established, blueprint_id),
            ),
            _ => Ok(()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of events applied, replayed or raised.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version of the last persisted event, i.e. the expected version for the
    /// next append.
    pub fn persisted_version(&self) -> u64 {
        self.version - self.uncommitted.len() as u64
    }

    pub fn blueprint_id(&self) -> Option<&str> {
        self.blueprint_id.as_deref()
    }

    pub fn last_event_id(&self) -> Option<&EventId> {
        self.last_event_id.as_ref()
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(S::AGGREGATE_TYPE, &self.id)
    }
}

impl<S: AggregateState> Deref for AggregateRoot<S> {
    type Target = S;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

// =============================================================================
// Tests
// =============================================================================
