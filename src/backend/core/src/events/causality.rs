//! Causality metadata stamped on every event.
//!
//! Every event records who caused it, with which command, in response to what,
//! and inside which blueprint (tenant). The factory refuses to produce metadata
//! with missing provenance, so an incomplete event can never be constructed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

/// `causedBy` value for the first event of a lineage.
pub const SYSTEM_CAUSE: &str = "system";

/// Provenance of a single event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CausalityMetadata {
    /// Id of the triggering event or command, or [`SYSTEM_CAUSE`].
    pub caused_by: String,
    /// Actor (account) id.
    pub caused_by_user: String,
    /// Command name.
    pub caused_by_action: String,
    pub timestamp: DateTime<Utc>,
    /// Tenant boundary. Absent only on a system-root creation event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blueprint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// The per-command half of the provenance: who is acting and why.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CausalityContext {
    pub caused_by_user: String,
    pub caused_by_action: String,
    /// Explicit trigger (e.g. a saga forwarding an event id). When absent the
    /// aggregate chains to its own latest event.
    pub caused_by: Option<String>,
    /// Tenant the caller is acting in. When present, events raised under this
    /// context must belong to the same blueprint.
    pub blueprint_id: Option<String>,
    pub correlation_id: Option<String>,
    pub idempotency_key: Option<String>,
}

impl CausalityContext {
    pub fn new(user: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            caused_by_user: user.into(),
            caused_by_action: action.into(),
            ..Default::default()
        }
    }

    pub fn caused_by(mut self, cause: impl Into<String>) -> Self {
        self.caused_by = Some(cause.into());
        self
    }

    pub fn in_blueprint(mut self, blueprint_id: impl Into<String>) -> Self {
        self.blueprint_id = Some(blueprint_id.into());
        self
    }

    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

impl CausalityMetadata {
    /// Build metadata for a new event, failing fast on incomplete provenance.
    ///
    /// `default_cause` is used when the context carries no explicit cause; the
    /// aggregate passes its latest event id, or [`SYSTEM_CAUSE`] for the first
    /// event.
    pub fn stamp(
        context: &CausalityContext,
        default_cause: &str,
        blueprint_id: Option<&str>,
        is_root_event: bool,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let metadata = Self {
            caused_by: context
                .caused_by
                .clone()
                .unwrap_or_else(|| default_cause.to_string()),
            caused_by_user: context.caused_by_user.clone(),
            caused_by_action: context.caused_by_action.clone(),
            timestamp,
            blueprint_id: blueprint_id.map(str::to_string),
            correlation_id: context.correlation_id.clone(),
            idempotency_key: context.idempotency_key.clone(),
        };
        metadata.validate(is_root_event)?;
        Ok(metadata)
    }

    /// Check the provenance contract.
    pub fn validate(&self, is_root_event: bool) -> Result<()> {
        if self.caused_by.trim().is_empty() {
            return Err(KernelError::causality("causedBy must not be empty"));
        }
        if self.caused_by_user.trim().is_empty() {
            return Err(KernelError::causality("causedByUser must not be empty"));
        }
        if self.caused_by_action.trim().is_empty() {
            return Err(KernelError::causality("causedByAction must not be empty"));
        }
        match self.blueprint_id.as_deref() {
            Some(blueprint) if blueprint.trim().is_empty() => {
                Err(KernelError::causality("blueprintId must not be blank"))
            }
            None if !is_root_event => Err(KernelError::causality(format!(
                "blueprintId is required on '{}' events",
                self.caused_by_action
            ))),
            _ => Ok(()),
        }
    }

    /// True for the first event of a lineage.
    pub fn is_system_caused(&self) -> bool {
        self.caused_by == SYSTEM_CAUSE
    }
}
