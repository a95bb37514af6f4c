//! Workspace read model.
//!
//! One document per workspace in the `workspaces` collection:
//!
//! ```text
//! { id, accountId, blueprintId, name, status, enabledModules, restrictionReason,
//!   createdAt, updatedAt, archivedAt, version, lastEventId }
//! ```
//!
//! `version` is the stream version of the last event folded into the
//! document. Only the next version is applied: events at or below it are
//! skipped, which makes redelivery a no-op, and events further ahead are
//! reported as [`ProjectionOutcome::OutOfOrder`] without writing anything.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use super::builder::ProjectionBuilder;
use super::sink::{Document, DocumentSink, WriteMode};
use crate::config::ProjectionConfig;
use crate::domain::{WorkspaceEvent, WorkspaceStatus, WORKSPACE_AGGREGATE};
use crate::error::Result;
use crate::events::{EventPayload, StoredEvent};
use crate::telemetry::metrics::{KernelMetrics, ProjectionOutcome};

pub const DEFAULT_WORKSPACE_COLLECTION: &str = "workspaces";

/// Typed view of a workspace document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceView {
    pub id: String,
    pub account_id: String,
    pub blueprint_id: String,
    pub name: String,
    pub status: WorkspaceStatus,
    #[serde(default)]
    pub enabled_modules: Vec<String>,
    #[serde(default)]
    pub restriction_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub last_event_id: String,
}

/// Maintains [`WorkspaceView`] documents.
pub struct WorkspaceProjectionBuilder {
    sink: Arc<dyn DocumentSink>,
    collection: String,
}

impl std::fmt::Debug for WorkspaceProjectionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceProjectionBuilder")
            .field("sink", &self.sink.name())
            .field("collection", &self.collection)
            .finish()
    }
}

impl WorkspaceProjectionBuilder {
    pub fn new(sink: Arc<dyn DocumentSink>) -> Self {
        Self::with_collection(sink, DEFAULT_WORKSPACE_COLLECTION)
    }

    pub fn with_collection(sink: Arc<dyn DocumentSink>, collection: impl Into<String>) -> Self {
        Self {
            sink,
            collection: collection.into(),
        }
    }

    pub fn from_config(sink: Arc<dyn DocumentSink>, config: &ProjectionConfig) -> Self {
        Self::with_collection(sink, config.workspace_collection.clone())
    }

    /// Read a workspace document.
    pub async fn get(&self, workspace_id: &str) -> Result<Option<WorkspaceView>> {
        match self.sink.get(&self.collection, workspace_id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(Value::Object(doc))?)),
            None => Ok(None),
        }
    }

    /// Every workspace document stamped with `blueprint_id`, ordered by id.
    pub async fn list_by_blueprint(&self, blueprint_id: &str) -> Result<Vec<WorkspaceView>> {
        let mut views = Vec::new();
        for (_, doc) in self.sink.list(&self.collection).await? {
            let view: WorkspaceView = serde_json::from_value(Value::Object(doc))?;
            if view.blueprint_id == blueprint_id {
                views.push(view);
            }
        }
        Ok(views)
    }

    async fn project(&self, event: &StoredEvent) -> Result<ProjectionOutcome> {
        if event.aggregate_type != WORKSPACE_AGGREGATE
            || !WorkspaceEvent::EVENT_TYPES.contains(&event.event_type.as_str())
        {
            debug!(
                builder = self.name(),
                aggregate_type = %event.aggregate_type,
                event_type = %event.event_type,
                "Ignoring event"
            );
            return Ok(ProjectionOutcome::Ignored);
        }

        let existing = self.sink.get(&self.collection, &event.aggregate_id).await?;
        let current = existing
            .as_ref()
            .and_then(|doc| doc.get("version"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if event.version <= current {
            debug!(event_id = %event.id, version = event.version, current, "Event already projected");
            return Ok(ProjectionOutcome::Skipped);
        }
        if event.version > current + 1 {
            debug!(
                event_id = %event.id,
                version = event.version,
                current,
                "Event ahead of document"
            );
            return Ok(ProjectionOutcome::OutOfOrder);
        }

        let patch = match (event.event_type.as_str(), existing.as_ref()) {
            ("WorkspaceCreated", _) => on_created(event),
            (_, None) => {
                warn!(
                    event_id = %event.id,
                    workspace_id = %event.aggregate_id,
                    "No workspace document to update"
                );
                None
            }
            ("WorkspaceReady", Some(_)) | ("WorkspaceReinstated", Some(_)) => Some(json!({
                "status": WorkspaceStatus::Ready,
                "restrictionReason": null,
            })),
            ("WorkspaceRestricted", Some(_)) => on_restricted(event),
            ("WorkspaceArchived", Some(_)) => Some(json!({
                "status": WorkspaceStatus::Archived,
                "archivedAt": event.metadata.timestamp,
            })),
            ("WorkspaceRenamed", Some(_)) => {
                required_str(event, "name").map(|name| json!({ "name": name }))
            }
            ("ModuleEnabled", Some(doc)) => on_module_toggled(event, doc, true),
            ("ModuleDisabled", Some(doc)) => on_module_toggled(event, doc, false),
            (_, Some(_)) => None,
        };

        let Some(Value::Object(mut patch)) = patch else {
            return Ok(ProjectionOutcome::Rejected);
        };
        patch.insert("version".into(), json!(event.version));
        patch.insert("lastEventId".into(), json!(event.id));
        patch.insert("updatedAt".into(), json!(event.metadata.timestamp));

        self.sink
            .set(&self.collection, &event.aggregate_id, patch, WriteMode::Merge)
            .await?;
        Ok(ProjectionOutcome::Applied)
    }
}

#[async_trait]
impl ProjectionBuilder for WorkspaceProjectionBuilder {
    fn name(&self) -> &'static str {
        "workspace"
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    fn sink(&self) -> &dyn DocumentSink {
        self.sink.as_ref()
    }

    #[instrument(skip(self, event), fields(event_type = %event.event_type, version = event.version))]
    async fn handle_event(&self, event: &StoredEvent) -> Result<ProjectionOutcome> {
        let outcome = self.project(event).await?;
        KernelMetrics::projection_event(self.name(), outcome);
        Ok(outcome)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers: return the merge patch, or None (after logging) when the payload
// is missing a required field.
// ─────────────────────────────────────────────────────────────────────────────

fn required_str<'a>(event: &'a StoredEvent, field: &str) -> Option<&'a str> {
    let value = event
        .data
        .get(field)
        .and_then(Value::as_str)
        .filter(|v| !v.trim().is_empty());
    if value.is_none() {
        warn!(
            event_id = %event.id,
            event_type = %event.event_type,
            field,
            "Projection payload missing required field"
        );
    }
    value
}

fn on_created(event: &StoredEvent) -> Option<Value> {
    let account_id = required_str(event, "accountId")?;
    let name = required_str(event, "name")?;
    let Some(blueprint_id) = event.blueprint_id() else {
        warn!(event_id = %event.id, "WorkspaceCreated without blueprintId");
        return None;
    };
    Some(json!({
        "id": event.aggregate_id,
        "accountId": account_id,
        "blueprintId": blueprint_id,
        "name": name,
        "status": WorkspaceStatus::Initializing,
        "enabledModules": [],
        "restrictionReason": null,
        "createdAt": event.metadata.timestamp,
        "archivedAt": null,
    }))
}

fn on_restricted(event: &StoredEvent) -> Option<Value> {
    let reason = required_str(event, "reason")?;
    Some(json!({
        "status": WorkspaceStatus::Restricted,
        "restrictionReason": reason,
    }))
}

fn on_module_toggled(event: &StoredEvent, doc: &Document, enabled: bool) -> Option<Value> {
    let key = required_str(event, "moduleKey")?;
    let mut modules: Vec<String> = doc
        .get("enabledModules")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    modules.retain(|m| m != key);
    if enabled {
        modules.push(key.to_string());
    }
    modules.sort();
    Some(json!({ "enabledModules": modules }))
}
