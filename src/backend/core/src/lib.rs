#![allow(clippy::result_large_err)]
//! # Blueprint Core
//!
//! Event-sourcing kernel for multi-tenant workspaces.
//!
//! ## Architecture
//!
//! - **Events**: aggregate raise/apply/replay, causality metadata on every event,
//!   an optimistic-concurrency event store and the repository bridging the two
//! - **Projections**: idempotent, mergeable read models rebuilt from streams and
//!   fed asynchronously after commit
//! - **Modules**: manifest-driven feature modules with a dependency gate
//! - **Domain**: the Account and Workspace aggregates
//! - **Telemetry**: structured logging and Prometheus metrics

pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod modules;
pub mod projections;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, KernelError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, RetryConfig};
    pub use crate::domain::{
        Account, AccountEvent, AccountStatus, Workspace, WorkspaceEvent, WorkspaceStatus,
    };
    pub use crate::error::{ErrorCode, ErrorContext, KernelError, Result};
    pub use crate::events::{
        AggregateRoot, AggregateState, CausalityContext, CausalityMetadata, Command,
        DomainEvent, EventPayload, EventServices, EventStore, InMemoryEventStore, Repository,
        StoredEvent, StreamKey,
    };
    pub use crate::modules::{ModuleManifest, ModuleRegistry};
    pub use crate::projections::{
        DocumentSink, InMemoryDocumentSink, ProjectionBuilder, ProjectionDispatcher,
        WorkspaceProjectionBuilder, WriteMode,
    };
}
