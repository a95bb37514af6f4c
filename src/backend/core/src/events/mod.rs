//! Event Sourcing Kernel
//!
//! - **`clock`**: injected time and id sources.
//! - **`causality`**: provenance stamped on every event.
//! - **`event`**: typed `DomainEvent`s and type-erased `StoredEvent`s.
//! - **`command`**: the inbound command envelope.
//! - **`aggregate`**: `AggregateState` plus the generic `AggregateRoot`.
//! - **`store`**: the `EventStore` contract and an in-memory engine.
//! - **`repository`**: load/save bridge with optimistic-concurrency retry.

pub mod aggregate;
pub mod causality;
pub mod clock;
pub mod command;
pub mod event;
pub mod repository;
pub mod store;

pub use aggregate::{AggregateRoot, AggregateState};
pub use causality::{CausalityContext, CausalityMetadata, SYSTEM_CAUSE};
pub use clock::{
    Clock, EventServices, FixedClock, IdGenerator, SequentialIdGenerator, SystemClock,
    UuidGenerator,
};
pub use command::{Command, CommandMetadata};
pub use event::{DomainEvent, EventId, EventPayload, StoredEvent, StreamKey};
pub use repository::Repository;
pub use store::{EventStore, InMemoryEventStore};
