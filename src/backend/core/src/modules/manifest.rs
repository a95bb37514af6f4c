//! Module manifest parsing and validation.
//!
//! A module manifest declares a feature module's key, display name, version
//! and the keys of the modules it requires. Manifests are stored as
//! `module.toml` or `module.json`, or come from [`builtin_manifests`].

use serde::{Deserialize, Serialize};
use std::path::Path;

// ═══════════════════════════════════════════════════════════════════════════════
// ModuleManifest
// ═══════════════════════════════════════════════════════════════════════════════

/// Declaration of a feature module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Unique module key (e.g. "issue").
    pub key: String,

    /// Human-readable name.
    pub name: String,

    /// Semantic version string.
    pub version: String,

    #[serde(default)]
    pub description: String,

    /// Keys of modules that must be enabled first.
    #[serde(default)]
    pub requires: Vec<String>,
}

impl ModuleManifest {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            version: "1.0.0".to_string(),
            description: String::new(),
            requires: Vec::new(),
        }
    }

    pub fn requires(mut self, keys: &[&str]) -> Self {
        self.requires = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Parsing helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Parse a manifest from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ManifestError> {
        toml::from_str(toml_str).map_err(|e| ManifestError::ParseError {
            format: "TOML".into(),
            details: e.to_string(),
        })
    }

    /// Parse a manifest from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(json_str).map_err(|e| ManifestError::ParseError {
            format: "JSON".into(),
            details: e.to_string(),
        })
    }

    /// Load a manifest from a directory, looking for `module.toml` then `module.json`.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ManifestError> {
        let toml_path = dir.join("module.toml");
        if toml_path.exists() {
            let content = std::fs::read_to_string(&toml_path).map_err(|e| {
                ManifestError::IoError(format!("Failed to read {}: {}", toml_path.display(), e))
            })?;
            return Self::from_toml(&content);
        }

        let json_path = dir.join("module.json");
        if json_path.exists() {
            let content = std::fs::read_to_string(&json_path).map_err(|e| {
                ManifestError::IoError(format!("Failed to read {}: {}", json_path.display(), e))
            })?;
            return Self::from_json(&content);
        }

        Err(ManifestError::NotFound {
            dir: dir.display().to_string(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Validation
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate the manifest fields.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.key.is_empty() {
            return Err(ManifestError::ValidationError("key must not be empty".into()));
        }

        if !is_valid_key(&self.key) {
            return Err(ManifestError::ValidationError(
                "key must contain only lowercase alphanumeric characters and hyphens".into(),
            ));
        }

        if self.name.trim().is_empty() {
            return Err(ManifestError::ValidationError("name must not be empty".into()));
        }

        let parts: Vec<&str> = self.version.split('.').collect();
        if parts.len() != 3 || !parts.iter().all(|p| p.parse::<u32>().is_ok()) {
            return Err(ManifestError::ValidationError(
                "version must follow semver (e.g. 1.0.0)".into(),
            ));
        }

        if let Some(bad) = self.requires.iter().find(|r| !is_valid_key(r)) {
            return Err(ManifestError::ValidationError(format!(
                "requires entry '{}' is not a valid module key",
                bad
            )));
        }

        if self.requires.contains(&self.key) {
            return Err(ManifestError::ValidationError(format!(
                "module '{}' cannot require itself",
                self.key
            )));
        }

        Ok(())
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Manifests of the modules shipped with the kernel.
pub fn builtin_manifests() -> Vec<ModuleManifest> {
    vec![
        ModuleManifest::new("task", "Tasks").describe("Task tracking"),
        ModuleManifest::new("issue", "Issues")
            .describe("Issue tracking on top of tasks")
            .requires(&["task"]),
        ModuleManifest::new("membership", "Membership").describe("Workspace members and roles"),
        ModuleManifest::new("payment", "Payments")
            .describe("Billing for members")
            .requires(&["membership"]),
    ]
}

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors that can occur when working with module manifests.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Manifest not found in directory: {dir}")]
    NotFound { dir: String },

    #[error("Failed to parse {format} manifest: {details}")]
    ParseError { format: String, details: String },

    #[error("Manifest validation error: {0}")]
    ValidationError(String),

    #[error("Duplicate module key: {0}")]
    Duplicate(String),

    #[error("Module '{module}' requires unknown module '{dependency}'")]
    UnknownDependency { module: String, dependency: String },

    #[error("IO error: {0}")]
    IoError(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
