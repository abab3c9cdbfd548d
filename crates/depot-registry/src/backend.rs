use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use depot_core::{AliasTable, PackageManifest, PackageName};
use semver::Version;

use crate::index::RegistryIndex;
use crate::probe::read_tree_manifest;

/// Candidate metadata composed from the registry index and any `--find-links`
/// directories; `--no-index` drops the registry and leaves find-links as the
/// only source.
#[derive(Debug, Clone)]
pub struct MetadataBackend {
    index: Option<RegistryIndex>,
    find_links: Vec<PathBuf>,
}

impl MetadataBackend {
    pub fn new(index: Option<RegistryIndex>, find_links: Vec<PathBuf>) -> Self {
        Self { index, find_links }
    }

    pub fn load_aliases(&self) -> Result<AliasTable> {
        match &self.index {
            Some(index) => index.load_aliases(),
            None => Ok(AliasTable::new()),
        }
    }

    /// Every known release of one package, newest first. Find-links releases
    /// shadow index releases of the same version.
    pub fn candidates(&self, name: &PackageName) -> Result<Vec<PackageManifest>> {
        let mut manifests: Vec<PackageManifest> = Vec::new();
        let mut seen: BTreeSet<Version> = BTreeSet::new();

        for tree in self.find_links_trees()? {
            let Ok(manifest) = read_tree_manifest(&tree) else {
                continue;
            };
            if manifest.name == *name && seen.insert(manifest.version.clone()) {
                manifests.push(manifest);
            }
        }

        if let Some(index) = &self.index {
            for manifest in index.package_versions(name)? {
                if seen.insert(manifest.version.clone()) {
                    manifests.push(manifest);
                }
            }
        }

        manifests.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(manifests)
    }

    /// The find-links source tree for one exact release, if any.
    pub fn find_links_tree(&self, name: &PackageName, version: &Version) -> Result<Option<PathBuf>> {
        for tree in self.find_links_trees()? {
            let Ok(manifest) = read_tree_manifest(&tree) else {
                continue;
            };
            if manifest.name == *name && manifest.version == *version {
                return Ok(Some(tree));
            }
        }
        Ok(None)
    }

    pub fn search_names(&self, needle: &str) -> Result<Vec<String>> {
        let mut names: BTreeSet<String> = BTreeSet::new();
        if let Some(index) = &self.index {
            names.extend(index.search_names(needle)?);
        }
        for tree in self.find_links_trees()? {
            let Ok(manifest) = read_tree_manifest(&tree) else {
                continue;
            };
            let name = manifest.name.to_string();
            if name.contains(needle) {
                names.insert(name);
            }
        }
        Ok(names.into_iter().collect())
    }

    fn find_links_trees(&self) -> Result<Vec<PathBuf>> {
        let mut trees = Vec::new();
        for dir in &self.find_links {
            if !dir.exists() {
                continue;
            }
            for entry in fs::read_dir(dir)
                .with_context(|| format!("failed to read find-links dir: {}", dir.display()))?
            {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    trees.push(entry.path());
                }
            }
        }
        trees.sort();
        Ok(trees)
    }
}
