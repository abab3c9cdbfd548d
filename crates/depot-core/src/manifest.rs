use std::collections::BTreeMap;

use anyhow::{anyhow, Context};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::archive::ArchiveType;
use crate::name::PackageName;

/// A downloadable distribution of one package release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    pub url: String,
    pub sha256: String,
    pub size: Option<u64>,
    pub archive: Option<String>,
}

impl Artifact {
    pub fn archive_type(&self) -> anyhow::Result<ArchiveType> {
        if let Some(archive) = &self.archive {
            return ArchiveType::parse(archive).ok_or_else(|| {
                anyhow!("unsupported archive type '{archive}'; supported: zip, tar.gz")
            });
        }

        ArchiveType::infer_from_url(&self.url).ok_or_else(|| {
            anyhow!(
                "could not infer archive type from URL '{}'; set artifact.archive explicitly",
                self.url
            )
        })
    }
}

/// Metadata for one release of one package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageManifest {
    pub name: PackageName,
    pub version: Version,
    pub summary: Option<String>,
    pub homepage: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<PackageName, VersionReq>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl PackageManifest {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let manifest: Self = toml::from_str(input).context("failed to parse depot manifest")?;
        if manifest.dependencies.contains_key(&manifest.name) {
            return Err(anyhow!("manifest '{}' depends on itself", manifest.name));
        }
        Ok(manifest)
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifacts.first()
    }
}
