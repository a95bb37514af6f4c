//! Domain aggregates built on the event-sourcing kernel.

pub mod account;
pub mod workspace;

pub use account::{Account, AccountEvent, AccountState, AccountStatus, ACCOUNT_AGGREGATE};
pub use workspace::{
    Workspace, WorkspaceEvent, WorkspaceState, WorkspaceStatus, WORKSPACE_AGGREGATE,
};
