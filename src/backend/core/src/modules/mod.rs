//! Feature modules and their dependency gate.

pub mod manifest;
pub mod registry;

pub use manifest::{builtin_manifests, ManifestError, ModuleManifest};
pub use registry::{can_enable, dependents_of, missing_dependencies, ManifestMap, ModuleRegistry};
