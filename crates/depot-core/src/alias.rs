use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::name::PackageName;

/// Redirect for a legacy package name.
///
/// `canonical` is the name the graph is built under; `replacement`, when set,
/// names the package that superseded the legacy one entirely, so requirements
/// for the legacy name resolve against the replacement's releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub canonical: PackageName,
    pub replacement: Option<PackageName>,
}

/// Explicit legacy-name table consulted before graph construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasTable {
    #[serde(default)]
    entries: BTreeMap<PackageName, AliasEntry>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("failed to parse alias table")
    }

    pub fn insert(&mut self, legacy: PackageName, entry: AliasEntry) {
        self.entries.insert(legacy, entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves a requested name to the name the graph should be built under.
    pub fn rewrite(&self, name: &PackageName) -> PackageName {
        match self.entries.get(name) {
            Some(entry) => entry
                .replacement
                .clone()
                .unwrap_or_else(|| entry.canonical.clone()),
            None => name.clone(),
        }
    }

    pub fn entry(&self, name: &PackageName) -> Option<&AliasEntry> {
        self.entries.get(name)
    }
}
