//! Inbound command envelope.
//!
//! Commands are produced by callers (transport, sagas) and consumed by
//! aggregate methods, which turn them into zero or more events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::causality::CausalityContext;

/// Metadata every command carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMetadata {
    pub actor_account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blueprint_id: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub action: String,
}

/// A command with an untyped body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub command_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub metadata: CommandMetadata,
}

impl Command {
    pub fn new(
        command_type: impl Into<String>,
        data: serde_json::Value,
        metadata: CommandMetadata,
    ) -> Self {
        Self {
            command_type: command_type.into(),
            data,
            metadata,
        }
    }

    /// Provenance for the events this command will raise, scoped to the
    /// command's blueprint when it names one.
    pub fn causality(&self) -> CausalityContext {
        let context =
            CausalityContext::new(&self.metadata.actor_account_id, &self.metadata.action);
        match &self.metadata.blueprint_id {
            Some(blueprint_id) => context.in_blueprint(blueprint_id),
            None => context,
        }
    }
}

impl CommandMetadata {
    pub fn new(actor_account_id: impl Into<String>, action: impl Into<String>, issued_at: DateTime<Utc>) -> Self {
        Self {
            actor_account_id: actor_account_id.into(),
            blueprint_id: None,
            issued_at,
            action: action.into(),
        }
    }

    pub fn with_blueprint(mut self, blueprint_id: impl Into<String>) -> Self {
        self.blueprint_id = Some(blueprint_id.into());
        self
    }
}
