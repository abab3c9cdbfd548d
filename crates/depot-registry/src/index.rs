use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use depot_core::{AliasTable, PackageManifest, PackageName};

/// Directory-backed registry index: one manifest per release at
/// `<root>/index/<name>/<version>.toml`, plus an optional `aliases.toml`
/// legacy-name table at the root.
#[derive(Debug, Clone)]
pub struct RegistryIndex {
    root: PathBuf,
}

impl RegistryIndex {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn search_names(&self, needle: &str) -> Result<Vec<String>> {
        let index_root = self.root.join("index");
        if !index_root.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(index_root).context("failed to read registry index")? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.contains(needle) {
                    let manifests = self.package_versions_raw(&name)?;
                    if !manifests.is_empty() {
                        names.push(name);
                    }
                }
            }
        }

        names.sort();
        Ok(names)
    }

    pub fn package_versions(&self, package: &PackageName) -> Result<Vec<PackageManifest>> {
        self.package_versions_raw(package.as_str())
    }

    fn package_versions_raw(&self, package: &str) -> Result<Vec<PackageManifest>> {
        let package_dir = self.root.join("index").join(package);
        if !package_dir.exists() {
            return Ok(Vec::new());
        }

        let mut manifests = Vec::new();
        for entry in fs::read_dir(&package_dir)
            .with_context(|| format!("failed to read package directory: {package}"))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let path = entry.path();
            if path.extension().and_then(|v| v.to_str()) != Some("toml") {
                continue;
            }

            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed reading manifest: {}", path.display()))?;
            let manifest = PackageManifest::from_toml_str(&raw)
                .with_context(|| format!("failed parsing manifest: {}", path.display()))?;
            manifests.push(manifest);
        }

        manifests.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(manifests)
    }

    /// The registry's legacy-name table; empty when the registry ships none.
    pub fn load_aliases(&self) -> Result<AliasTable> {
        let path = self.root.join("aliases.toml");
        if !path.exists() {
            return Ok(AliasTable::new());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading alias table: {}", path.display()))?;
        AliasTable::from_toml_str(&raw)
            .with_context(|| format!("failed parsing alias table: {}", path.display()))
    }
}
