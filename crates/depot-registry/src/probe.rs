use std::fs;
use std::path::Path;

use depot_core::PackageManifest;

use crate::error::RegistryError;

/// Reads the metadata a source tree declares about itself. Every installable
/// tree carries a `depot.toml` at its root; a tree without one cannot be
/// installed.
pub fn read_tree_manifest(tree: &Path) -> Result<PackageManifest, RegistryError> {
    let manifest_path = tree.join("depot.toml");
    let raw = fs::read_to_string(&manifest_path).map_err(|err| RegistryError::Build {
        path: manifest_path.clone(),
        reason: err.to_string(),
    })?;
    PackageManifest::from_toml_str(&raw).map_err(|err| RegistryError::Build {
        path: manifest_path,
        reason: format!("{err:#}"),
    })
}
