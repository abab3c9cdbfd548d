use std::collections::BTreeMap;

use semver::{Version, VersionReq};

use crate::name::PackageName;
use crate::requirement::SourceLocator;

/// One installed package as recorded on disk. Mutated only by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub name: PackageName,
    pub version: Version,
    pub source: SourceLocator,
    pub requested: bool,
    pub dependencies: Vec<PackageName>,
    pub owned_files: Vec<String>,
}

/// Snapshot of everything currently installed, keyed by normalized name.
///
/// This is an explicit value passed into the resolver and executor, never
/// ambient global state, so callers and tests can construct exactly the world
/// they want.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledIndex {
    packages: BTreeMap<PackageName, InstalledPackage>,
}

impl InstalledIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, package: InstalledPackage) {
        self.packages.insert(package.name.clone(), package);
    }

    pub fn remove(&mut self, name: &PackageName) -> Option<InstalledPackage> {
        self.packages.remove(name)
    }

    pub fn get(&self, name: &PackageName) -> Option<&InstalledPackage> {
        self.packages.get(name)
    }

    pub fn contains(&self, name: &PackageName) -> bool {
        self.packages.contains_key(name)
    }

    pub fn satisfies(&self, name: &PackageName, requirement: &VersionReq) -> bool {
        self.packages
            .get(name)
            .map(|package| requirement.matches(&package.version))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstalledPackage> {
        self.packages.values()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl FromIterator<InstalledPackage> for InstalledIndex {
    fn from_iter<I: IntoIterator<Item = InstalledPackage>>(iter: I) -> Self {
        let mut index = Self::new();
        for package in iter {
            index.insert(package);
        }
        index
    }
}
