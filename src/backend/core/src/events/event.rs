//! Event records: the typed [`DomainEvent`] raised by aggregates and the
//! type-erased [`StoredEvent`] that crosses the store and projection boundary.
//!
//! Wire shape of a stored event:
//!
//! ```text
//! { id, aggregateId, aggregateType, eventType, version, data: <payload>,
//!   metadata: { causedBy, causedByUser, causedByAction, timestamp,
//!               blueprintId?, correlationId?, idempotencyKey? } }
//! ```

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::causality::CausalityMetadata;
use crate::error::{KernelError, Result};

// =============================================================================
// Identifiers
// =============================================================================

/// Globally unique event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifies one aggregate's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamKey {
    pub aggregate_type: String,
    pub aggregate_id: String,
}

impl StreamKey {
    pub fn new(aggregate_type: impl Into<String>, aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.aggregate_type, self.aggregate_id)
    }
}

// =============================================================================
// Payload Trait
// =============================================================================

/// The declared event-type union of one aggregate.
///
/// Implemented by an enum whose serde representation is adjacently tagged with
/// `#[serde(tag = "eventType", content = "data")]`, so that the variant name is
/// the `eventType` discriminator and the variant body is `data`.
pub trait EventPayload:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    /// Every `eventType` this union can decode.
    const EVENT_TYPES: &'static [&'static str];

    /// Discriminator of this value.
    fn event_type(&self) -> &'static str;

    /// Whether this is a system-root creation event, the only kind allowed to
    /// omit `blueprintId`.
    fn is_root_event(&self) -> bool {
        false
    }
}

// =============================================================================
// Domain Event
// =============================================================================

/// An immutable event raised by an aggregate.
///
/// Only the aggregate root constructs these; every field is read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent<P> {
    id: EventId,
    aggregate_id: String,
    aggregate_type: String,
    event_type: String,
    version: u64,
    data: P,
    metadata: CausalityMetadata,
}

impl<P: EventPayload> DomainEvent<P> {
    pub(crate) fn new(
        id: EventId,
        stream: &StreamKey,
        version: u64,
        data: P,
        metadata: CausalityMetadata,
    ) -> Self {
        Self {
            id,
            aggregate_id: stream.aggregate_id.clone(),
            aggregate_type: stream.aggregate_type.clone(),
            event_type: data.event_type().to_string(),
            version,
            data,
            metadata,
        }
    }
}

impl<P> DomainEvent<P> {
    pub fn id(&self) -> &EventId {
        &self.id
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Stream version this event produced (1-based).
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn data(&self) -> &P {
        &self.data
    }

    pub fn metadata(&self) -> &CausalityMetadata {
        &self.metadata
    }

    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(&self.aggregate_type, &self.aggregate_id)
    }
}

// =============================================================================
// Stored Event
// =============================================================================

/// Type-erased event as persisted and dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub id: EventId,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    /// Stream version this event produced (1-based).
    pub version: u64,
    pub data: serde_json::Value,
    pub metadata: CausalityMetadata,
}

impl StoredEvent {
    /// Erase a typed event.
    pub fn from_domain<P: EventPayload>(event: &DomainEvent<P>) -> Result<Self> {
        Ok(Self {
            id: event.id.clone(),
            aggregate_id: event.aggregate_id.clone(),
            aggregate_type: event.aggregate_type.clone(),
            event_type: event.event_type.clone(),
            version: event.version,
            data: encode_payload(&event.data)?,
            metadata: event.metadata.clone(),
        })
    }

    /// Decode into a typed event.
    ///
    /// An `eventType` outside the payload union is a fatal
    /// [`UnknownEventType`](crate::error::ErrorCode::UnknownEventType); a body
    /// that fails its schema is fatal
    /// [`Corruption`](crate::error::ErrorCode::Corruption).
    pub fn decode<P: EventPayload>(&self) -> Result<DomainEvent<P>> {
        if !P::EVENT_TYPES.contains(&self.event_type.as_str()) {
            return Err(KernelError::unknown_event_type(&self.aggregate_type, &self.event_type));
        }

        let tagged = serde_json::json!({
            "eventType": self.event_type,
            "data": self.data,
        });
        let data: P = serde_json::from_value(tagged).map_err(|e| {
            KernelError::corruption(&self.stream_key().to_string(), self.id.as_str(), e.to_string())
        })?;

        Ok(DomainEvent {
            id: self.id.clone(),
            aggregate_id: self.aggregate_id.clone(),
            aggregate_type: self.aggregate_type.clone(),
            event_type: self.event_type.clone(),
            version: self.version,
            data,
            metadata: self.metadata.clone(),
        })
    }

    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(&self.aggregate_type, &self.aggregate_id)
    }

    pub fn blueprint_id(&self) -> Option<&str> {
        self.metadata.blueprint_id.as_deref()
    }
}

/// Extract the `data` half of an adjacently tagged payload.
fn encode_payload<P: EventPayload>(payload: &P) -> Result<serde_json::Value> {
    let mut tagged = serde_json::to_value(payload)?;
    let data = tagged
        .get_mut("data")
        .map(serde_json::Value::take)
        .unwrap_or(serde_json::Value::Null);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::events::causality::{CausalityContext, SYSTEM_CAUSE};
    use chrono::Utc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "eventType", content = "data")]
    enum LampEvent {
        LampInstalled { room: String },
        LampSwitched { on: bool },
    }

    impl EventPayload for LampEvent {
        const EVENT_TYPES: &'static [&'static str] = &["LampInstalled", "LampSwitched"];

        fn event_type(&self) -> &'static str {
            match self {
                LampEvent::LampInstalled { .. } => "LampInstalled",
                LampEvent::LampSwitched { .. } => "LampSwitched",
            }
        }
    }

    fn lamp_event(data: LampEvent) -> DomainEvent<LampEvent> {
        let metadata = CausalityMetadata::stamp(
            &CausalityContext::new("user-1", "InstallLamp"),
            SYSTEM_CAUSE,
            Some("bp-1"),
            false,
            Utc::now(),
        )
        .unwrap();
        DomainEvent::new(
            EventId("evt-1".into()),
            &StreamKey::new("Lamp", "lamp-1"),
            1,
            data,
            metadata,
        )
    }

    #[test]
    fn test_stream_key_display() {
        assert_eq!(StreamKey::new("Workspace", "w1").to_string(), "Workspace:w1");
    }

    #[test]
    fn test_stored_shape_matches_wire_contract() {
        let event = lamp_event(LampEvent::LampInstalled { room: "hall".into() });
        let stored = StoredEvent::from_domain(&event).unwrap();
        let json = serde_json::to_value(&stored).unwrap();

        assert_eq!(json["eventType"], "LampInstalled");
        assert_eq!(json["aggregateType"], "Lamp");
        assert_eq!(json["data"]["room"], "hall");
        assert_eq!(json["metadata"]["blueprintId"], "bp-1");
    }

    #[test]
    fn test_decode_restores_typed_event() {
        let event = lamp_event(LampEvent::LampSwitched { on: true });
        let stored = StoredEvent::from_domain(&event).unwrap();
        let decoded: DomainEvent<LampEvent> = stored.decode().unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_decode_unknown_type_is_fatal() {
        let mut stored =
            StoredEvent::from_domain(&lamp_event(LampEvent::LampSwitched { on: true })).unwrap();
        stored.event_type = "LampStolen".into();
        let err = stored.decode::<LampEvent>().unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownEventType);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_decode_bad_body_is_corruption() {
        let mut stored =
            StoredEvent::from_domain(&lamp_event(LampEvent::LampSwitched { on: true })).unwrap();
        stored.data = serde_json::json!({ "on": "maybe" });
        let err = stored.decode::<LampEvent>().unwrap_err();
        assert_eq!(err.code(), ErrorCode::Corruption);
    }
}
