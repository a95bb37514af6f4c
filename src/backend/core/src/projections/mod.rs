//! Read models derived from event streams.
//!
//! Projections are never a source of truth: any document can be deleted and
//! rebuilt from its aggregate's stream.

pub mod builder;
pub mod dispatcher;
pub mod sink;
pub mod workspace;

pub use builder::ProjectionBuilder;
pub use dispatcher::{DispatchHandle, DispatchStats, ProjectionDispatcher};
pub use sink::{merge_documents, Document, DocumentSink, InMemoryDocumentSink, WriteMode};
pub use workspace::{WorkspaceProjectionBuilder, WorkspaceView, DEFAULT_WORKSPACE_COLLECTION};
