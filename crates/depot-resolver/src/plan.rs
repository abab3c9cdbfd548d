use std::fmt;

use depot_core::{PackageManifest, PackageName};
use semver::Version;

/// Why a plan entry exists. Skips are always planned decisions with a reason,
/// never silent error suppression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanReason {
    Requested,
    DependencyOf(PackageName),
    UpgradeFrom(Version),
    SupersededBy(Version),
    ForcedReinstall,
    AlreadySatisfied,
    AlreadyUpToDate,
    Removed,
    NoLongerNeeded,
    NotInstalled,
}

impl fmt::Display for PlanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("requested"),
            Self::DependencyOf(name) => write!(f, "dependency of {name}"),
            Self::UpgradeFrom(version) => write!(f, "upgrade from {version}"),
            Self::SupersededBy(version) => write!(f, "superseded by {version}"),
            Self::ForcedReinstall => f.write_str("forced reinstall"),
            Self::AlreadySatisfied => f.write_str("requirement already satisfied"),
            Self::AlreadyUpToDate => f.write_str("already up-to-date"),
            Self::Removed => f.write_str("requested removal"),
            Self::NoLongerNeeded => f.write_str("no longer needed"),
            Self::NotInstalled => f.write_str("not installed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanEntry {
    Install {
        manifest: PackageManifest,
        reason: PlanReason,
    },
    Uninstall {
        name: PackageName,
        version: Version,
        reason: PlanReason,
    },
    Skip {
        name: PackageName,
        version: Option<Version>,
        reason: PlanReason,
    },
}

impl PlanEntry {
    pub fn name(&self) -> &PackageName {
        match self {
            Self::Install { manifest, .. } => &manifest.name,
            Self::Uninstall { name, .. } | Self::Skip { name, .. } => name,
        }
    }

    pub fn version(&self) -> Option<&Version> {
        match self {
            Self::Install { manifest, .. } => Some(&manifest.version),
            Self::Uninstall { version, .. } => Some(version),
            Self::Skip { version, .. } => version.as_ref(),
        }
    }

    pub fn reason(&self) -> &PlanReason {
        match self {
            Self::Install { reason, .. }
            | Self::Uninstall { reason, .. }
            | Self::Skip { reason, .. } => reason,
        }
    }

    pub fn action_str(&self) -> &'static str {
        match self {
            Self::Install { .. } => "install",
            Self::Uninstall { .. } => "uninstall",
            Self::Skip { .. } => "skip",
        }
    }
}

/// Ordered sequence of actions produced by one resolve call. An uninstall of a
/// superseded version is placed directly before the install that replaces it,
/// so the executor treats the pair as one reversible unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallPlan {
    entries: Vec<PlanEntry>,
}

impl InstallPlan {
    pub fn new(entries: Vec<PlanEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn installs(&self) -> impl Iterator<Item = &PackageManifest> {
        self.entries.iter().filter_map(|entry| match entry {
            PlanEntry::Install { manifest, .. } => Some(manifest),
            _ => None,
        })
    }

    pub fn uninstalls(&self) -> impl Iterator<Item = (&PackageName, &Version)> {
        self.entries.iter().filter_map(|entry| match entry {
            PlanEntry::Uninstall { name, version, .. } => Some((name, version)),
            _ => None,
        })
    }

    pub fn skips(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, PlanEntry::Skip { .. }))
    }

    /// True when applying the plan would not touch the filesystem.
    pub fn is_noop(&self) -> bool {
        self.entries
            .iter()
            .all(|entry| matches!(entry, PlanEntry::Skip { .. }))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for InstallPlan {
    type Item = PlanEntry;
    type IntoIter = std::vec::IntoIter<PlanEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
