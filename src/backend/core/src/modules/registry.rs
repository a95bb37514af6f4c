//! Module dependency gate.
//!
//! [`can_enable`] and [`missing_dependencies`] are pure checks over a manifest
//! set. The [`ModuleRegistry`] owns the manifest set and is what aggregates
//! consult in their guard clauses; a failed check there is an ordinary
//! business rejection.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::manifest::{builtin_manifests, ManifestError, ModuleManifest};
use crate::error::{KernelError, Result};

/// Manifests keyed by module key.
pub type ManifestMap = BTreeMap<String, ModuleManifest>;

// ═══════════════════════════════════════════════════════════════════════════════
// Pure checks
// ═══════════════════════════════════════════════════════════════════════════════

/// True iff `module_key` is known and every module it requires is enabled.
pub fn can_enable(module_key: &str, enabled: &[String], manifests: &ManifestMap) -> bool {
    manifests.contains_key(module_key)
        && missing_dependencies(module_key, enabled, manifests).is_empty()
}

/// Required modules of `module_key` that are not enabled, in declaration order.
///
/// An unknown module has no declared requirements and yields an empty list;
/// [`can_enable`] still refuses it.
pub fn missing_dependencies(
    module_key: &str,
    enabled: &[String],
    manifests: &ManifestMap,
) -> Vec<String> {
    manifests
        .get(module_key)
        .map(|manifest| {
            manifest
                .requires
                .iter()
                .filter(|required| !enabled.contains(required))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// Enabled modules that require `module_key`, sorted.
pub fn dependents_of(module_key: &str, enabled: &[String], manifests: &ManifestMap) -> Vec<String> {
    let mut dependents: Vec<String> = enabled
        .iter()
        .filter(|key| {
            manifests
                .get(key.as_str())
                .is_some_and(|m| m.requires.iter().any(|r| r == module_key))
        })
        .cloned()
        .collect();
    dependents.sort();
    dependents
}

// ═══════════════════════════════════════════════════════════════════════════════
// Module Registry
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared, validated set of module manifests.
///
/// Thread-safe via interior `RwLock`; clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    manifests: Arc<RwLock<ManifestMap>>,
}

impl ModuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in modules.
    pub fn with_builtins() -> std::result::Result<Self, ManifestError> {
        Self::from_manifests(builtin_manifests())
    }

    /// Build a registry from a complete manifest set.
    ///
    /// Every manifest must validate, keys must be unique, every requirement
    /// must name a module in the set, and requirements must not form a cycle.
    pub fn from_manifests(
        manifests: impl IntoIterator<Item = ModuleManifest>,
    ) -> std::result::Result<Self, ManifestError> {
        let mut map = ManifestMap::new();
        for manifest in manifests {
            manifest.validate()?;
            if map.contains_key(&manifest.key) {
                return Err(ManifestError::Duplicate(manifest.key));
            }
            map.insert(manifest.key.clone(), manifest);
        }
        check_closed(&map)?;
        check_acyclic(&map)?;

        Ok(Self {
            manifests: Arc::new(RwLock::new(map)),
        })
    }

    /// Load every `<dir>/<module>/module.{toml,json}` below `root`.
    pub fn load_dir(root: &Path) -> std::result::Result<Self, ManifestError> {
        let entries = std::fs::read_dir(root).map_err(|e| {
            ManifestError::IoError(format!("Failed to read {}: {}", root.display(), e))
        })?;

        let mut manifests = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| ManifestError::IoError(e.to_string()))?
                .path();
            if !path.is_dir() {
                continue;
            }
            match ModuleManifest::load_from_dir(&path) {
                Ok(manifest) => manifests.push(manifest),
                Err(ManifestError::NotFound { dir }) => {
                    warn!(dir = %dir, "Skipping directory without module manifest");
                }
                Err(e) => return Err(e),
            }
        }

        let registry = Self::from_manifests(manifests)?;
        info!(root = %root.display(), count = registry.len(), "Loaded module manifests");
        Ok(registry)
    }

    /// Add one manifest. Its requirements must already be registered.
    pub fn register(&self, manifest: ModuleManifest) -> std::result::Result<(), ManifestError> {
        manifest.validate()?;
        let mut map = self.manifests.write();
        if map.contains_key(&manifest.key) {
            return Err(ManifestError::Duplicate(manifest.key));
        }
        if let Some(dependency) = manifest.requires.iter().find(|r| !map.contains_key(*r)) {
            return Err(ManifestError::UnknownDependency {
                module: manifest.key.clone(),
                dependency: dependency.clone(),
            });
        }
        debug!(module = %manifest.key, "Module registered");
        map.insert(manifest.key.clone(), manifest);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get(&self, module_key: &str) -> Option<ModuleManifest> {
        self.manifests.read().get(module_key).cloned()
    }

    pub fn contains(&self, module_key: &str) -> bool {
        self.manifests.read().contains_key(module_key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.manifests.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.manifests.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.read().is_empty()
    }

    pub fn can_enable(&self, module_key: &str, enabled: &[String]) -> bool {
        can_enable(module_key, enabled, &self.manifests.read())
    }

    pub fn missing_dependencies(&self, module_key: &str, enabled: &[String]) -> Vec<String> {
        missing_dependencies(module_key, enabled, &self.manifests.read())
    }

    pub fn dependents_of(&self, module_key: &str, enabled: &[String]) -> Vec<String> {
        dependents_of(module_key, enabled, &self.manifests.read())
    }

    /// Guard clause for enabling: unknown module or missing requirements fail.
    pub fn ensure_can_enable(&self, module_key: &str, enabled: &[String]) -> Result<()> {
        let manifests = self.manifests.read();
        if !manifests.contains_key(module_key) {
            return Err(KernelError::not_found("module", module_key));
        }
        let missing = missing_dependencies(module_key, enabled, &manifests);
        if !missing.is_empty() {
            return Err(KernelError::dependency_not_met(module_key, &missing));
        }
        Ok(())
    }
}

fn check_closed(map: &ManifestMap) -> std::result::Result<(), ManifestError> {
    for manifest in map.values() {
        if let Some(dependency) = manifest.requires.iter().find(|r| !map.contains_key(*r)) {
            return Err(ManifestError::UnknownDependency {
                module: manifest.key.clone(),
                dependency: dependency.clone(),
            });
        }
    }
    Ok(())
}

fn check_acyclic(map: &ManifestMap) -> std::result::Result<(), ManifestError> {
    fn visit<'a>(
        key: &'a str,
        map: &'a ManifestMap,
        path: &mut Vec<&'a str>,
        done: &mut BTreeSet<&'a str>,
    ) -> std::result::Result<(), ManifestError> {
        if done.contains(key) {
            return Ok(());
        }
        if path.contains(&key) {
            path.push(key);
            return Err(ManifestError::ValidationError(format!(
                "dependency cycle: {}",
                path.join(" -> ")
            )));
        }
        path.push(key);
        if let Some(manifest) = map.get(key) {
            for required in &manifest.requires {
                visit(required, map, path, done)?;
            }
        }
        path.pop();
        done.insert(key);
        Ok(())
    }

    let mut done = BTreeSet::new();
    for key in map.keys() {
        visit(key, map, &mut Vec::new(), &mut done)?;
    }
    Ok(())
}
