//! Workspace aggregate.
//!
//! Lifecycle: `initializing → ready → restricted → archived`. A restricted
//! workspace may be reinstated to `ready`; `archived` is terminal. Module
//! enablement is gated by the [`ModuleRegistry`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};
use crate::events::{
    AggregateRoot, AggregateState, CausalityContext, DomainEvent, EventPayload, EventServices,
};
use crate::modules::ModuleRegistry;

pub const WORKSPACE_AGGREGATE: &str = "Workspace";

/// An event-sourced workspace.
pub type Workspace = AggregateRoot<WorkspaceState>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    Initializing,
    Ready,
    Restricted,
    Archived,
}

impl WorkspaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceStatus::Initializing => "initializing",
            WorkspaceStatus::Ready => "ready",
            WorkspaceStatus::Restricted => "restricted",
            WorkspaceStatus::Archived => "archived",
        }
    }
}

impl std::fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "data")]
pub enum WorkspaceEvent {
    #[serde(rename_all = "camelCase")]
    WorkspaceCreated { account_id: String, name: String },
    WorkspaceReady {},
    WorkspaceRestricted { reason: String },
    WorkspaceReinstated {},
    WorkspaceArchived {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    WorkspaceRenamed { name: String },
    #[serde(rename_all = "camelCase")]
    ModuleEnabled { module_key: String },
    #[serde(rename_all = "camelCase")]
    ModuleDisabled { module_key: String },
}

impl EventPayload for WorkspaceEvent {
    const EVENT_TYPES: &'static [&'static str] = &[
        "WorkspaceCreated",
        "WorkspaceReady",
        "WorkspaceRestricted",
        "WorkspaceReinstated",
        "WorkspaceArchived",
        "WorkspaceRenamed",
        "ModuleEnabled",
        "ModuleDisabled",
    ];

    fn event_type(&self) -> &'static str {
        match self {
            WorkspaceEvent::WorkspaceCreated { .. } => "WorkspaceCreated",
            WorkspaceEvent::WorkspaceReady {} => "WorkspaceReady",
            WorkspaceEvent::WorkspaceRestricted { .. } => "WorkspaceRestricted",
            WorkspaceEvent::WorkspaceReinstated {} => "WorkspaceReinstated",
            WorkspaceEvent::WorkspaceArchived { .. } => "WorkspaceArchived",
            WorkspaceEvent::WorkspaceRenamed { .. } => "WorkspaceRenamed",
            WorkspaceEvent::ModuleEnabled { .. } => "ModuleEnabled",
            WorkspaceEvent::ModuleDisabled { .. } => "ModuleDisabled",
        }
    }
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceState {
    /// `None` until `WorkspaceCreated` has been applied.
    pub status: Option<WorkspaceStatus>,
    pub account_id: String,
    pub name: String,
    /// Sorted, no duplicates.
    pub enabled_modules: Vec<String>,
    pub restriction_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl AggregateState for WorkspaceState {
    const AGGREGATE_TYPE: &'static str = WORKSPACE_AGGREGATE;
    type Event = WorkspaceEvent;

    fn apply(&mut self, event: &DomainEvent<WorkspaceEvent>) {
        match event.data() {
            WorkspaceEvent::WorkspaceCreated { account_id, name } => {
                self.status = Some(WorkspaceStatus::Initializing);
                self.account_id = account_id.clone();
                self.name = name.clone();
                self.created_at = Some(event.metadata().timestamp);
            }
            WorkspaceEvent::WorkspaceReady {} => {
                self.status = Some(WorkspaceStatus::Ready);
            }
            WorkspaceEvent::WorkspaceRestricted { reason } => {
                self.status = Some(WorkspaceStatus::Restricted);
                self.restriction_reason = Some(reason.clone());
            }
            WorkspaceEvent::WorkspaceReinstated {} => {
                self.status = Some(WorkspaceStatus::Ready);
                self.restriction_reason = None;
            }
            WorkspaceEvent::WorkspaceArchived { .. } => {
                self.status = Some(WorkspaceStatus::Archived);
                self.archived_at = Some(event.metadata().timestamp);
            }
            WorkspaceEvent::WorkspaceRenamed { name } => {
                self.name = name.clone();
            }
            WorkspaceEvent::ModuleEnabled { module_key } => {
                if let Err(pos) = self.enabled_modules.binary_search(module_key) {
                    self.enabled_modules.insert(pos, module_key.clone());
                }
            }
            WorkspaceEvent::ModuleDisabled { module_key } => {
                self.enabled_modules.retain(|k| k != module_key);
            }
        }
    }
}

impl WorkspaceState {
    pub fn is_archived(&self) -> bool {
        self.status == Some(WorkspaceStatus::Archived)
    }

    pub fn is_module_enabled(&self, module_key: &str) -> bool {
        self.enabled_modules.iter().any(|k| k == module_key)
    }
}

// =============================================================================
// Commands
// =============================================================================

impl Workspace {
    /// Create a workspace owned by `account_id` inside `blueprint_id`.
    pub fn create(
        services: &EventServices,
        context: &CausalityContext,
        id: &str,
        account_id: &str,
        blueprint_id: &str,
        name: &str,
    ) -> Result<Self> {
        if id.trim().is_empty() {
            return Err(KernelError::missing_field("workspaceId"));
        }
        if account_id.trim().is_empty() {
            return Err(KernelError::missing_field("accountId"));
        }
        if name.trim().is_empty() {
            return Err(KernelError::validation("Workspace name must not be empty"));
        }

        let mut workspace = Self::new(id);
        workspace.raise_event_in(
            services,
            context,
            Some(blueprint_id),
            WorkspaceEvent::WorkspaceCreated {
                account_id: account_id.to_string(),
                name: name.trim().to_string(),
            },
        )?;
        Ok(workspace)
    }

    /// `initializing → ready`.
    pub fn mark_ready(&mut self, services: &EventServices, context: &CausalityContext) -> Result<()> {
        match self.current_status()? {
            WorkspaceStatus::Initializing => {}
            WorkspaceStatus::Ready => return Err(self.rejected("Workspace is already ready")),
            other => {
                return Err(self.rejected(format!("Cannot mark a {} workspace as ready", other)))
            }
        }
        self.raise_event(services, context, WorkspaceEvent::WorkspaceReady {})?;
        Ok(())
    }

    /// `ready → restricted`.
    pub fn restrict(
        &mut self,
        services: &EventServices,
        context: &CausalityContext,
        reason: &str,
    ) -> Result<()> {
        match self.current_status()? {
            WorkspaceStatus::Ready => {}
            WorkspaceStatus::Restricted => {
                return Err(self.rejected("Workspace is already restricted"))
            }
            other => return Err(self.rejected(format!("Cannot restrict a {} workspace", other))),
        }
        if reason.trim().is_empty() {
            return Err(KernelError::missing_field("reason"));
        }
        self.raise_event(
            services,
            context,
            WorkspaceEvent::WorkspaceRestricted {
                reason: reason.trim().to_string(),
            },
        )?;
        Ok(())
    }

    /// `restricted → ready`.
    pub fn reinstate(&mut self, services: &EventServices, context: &CausalityContext) -> Result<()> {
        match self.current_status()? {
            WorkspaceStatus::Restricted => {}
            other => {
                return Err(self.rejected(format!("Cannot reinstate a {} workspace", other)))
            }
        }
        self.raise_event(services, context, WorkspaceEvent::WorkspaceReinstated {})?;
        Ok(())
    }

    /// Any initialized, non-archived status `→ archived`.
    pub fn archive(
        &mut self,
        services: &EventServices,
        context: &CausalityContext,
        reason: Option<&str>,
    ) -> Result<()> {
        if self.current_status()? == WorkspaceStatus::Archived {
            return Err(self.rejected("Workspace is already archived"));
        }
        self.raise_event(
            services,
            context,
            WorkspaceEvent::WorkspaceArchived {
                reason: reason.map(str::to_string),
            },
        )?;
        Ok(())
    }

    /// Rename. Renaming to the current name raises nothing.
    pub fn rename(
        &mut self,
        services: &EventServices,
        context: &CausalityContext,
        name: &str,
    ) -> Result<()> {
        self.ensure_active()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(KernelError::validation("Workspace name must not be empty"));
        }
        if name == self.name {
            return Ok(());
        }
        self.raise_event(
            services,
            context,
            WorkspaceEvent::WorkspaceRenamed {
                name: name.to_string(),
            },
        )?;
        Ok(())
    }

    /// Enable a module whose requirements are all enabled.
    pub fn enable_module(
        &mut self,
        services: &EventServices,
        context: &CausalityContext,
        registry: &ModuleRegistry,
        module_key: &str,
    ) -> Result<()> {
        self.ensure_active()?;
        if self.is_module_enabled(module_key) {
            return Err(self.rejected(format!("Module '{}' is already enabled", module_key)));
        }
        registry.ensure_can_enable(module_key, &self.enabled_modules)?;
        self.raise_event(
            services,
            context,
            WorkspaceEvent::ModuleEnabled {
                module_key: module_key.to_string(),
            },
        )?;
        Ok(())
    }

    /// Disable a module no other enabled module depends on.
    pub fn disable_module(
        &mut self,
        services: &EventServices,
        context: &CausalityContext,
        registry: &ModuleRegistry,
        module_key: &str,
    ) -> Result<()> {
        self.ensure_active()?;
        if !self.is_module_enabled(module_key) {
            return Err(self.rejected(format!("Module '{}' is not enabled", module_key)));
        }
        let dependents = registry.dependents_of(module_key, &self.enabled_modules);
        if !dependents.is_empty() {
            return Err(self.rejected(format!(
                "Module '{}' is required by: {}",
                module_key,
                dependents.join(", ")
            )));
        }
        self.raise_event(
            services,
            context,
            WorkspaceEvent::ModuleDisabled {
                module_key: module_key.to_string(),
            },
        )?;
        Ok(())
    }

    fn current_status(&self) -> Result<WorkspaceStatus> {
        self.status
            .ok_or_else(|| self.rejected("Workspace is not initialized"))
    }

    /// Module and name changes need an initialized, unrestricted, live workspace.
    fn ensure_active(&self) -> Result<()> {
        match self.current_status()? {
            WorkspaceStatus::Initializing | WorkspaceStatus::Ready => Ok(()),
            WorkspaceStatus::Restricted => Err(self.rejected("Workspace is restricted")),
            WorkspaceStatus::Archived => Err(self.rejected("Workspace is archived")),
        }
    }

    fn rejected(&self, message: impl Into<String>) -> KernelError {
        KernelError::invalid_state_transition(WORKSPACE_AGGREGATE, self.id(), message)
    }
}
