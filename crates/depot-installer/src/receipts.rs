use anyhow::{anyhow, Context, Result};
use depot_core::{InstalledIndex, InstalledPackage, PackageName, SourceLocator};
use semver::Version;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::layout::PrefixLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallReason {
    Root,
    Dependency,
}

impl InstallReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Dependency => "dependency",
        }
    }

    pub(crate) fn parse(value: &str) -> Result<Self> {
        match value {
            "root" => Ok(Self::Root),
            "dependency" => Ok(Self::Dependency),
            _ => Err(anyhow!("invalid install_reason: {value}")),
        }
    }
}

/// On-disk record of one installed package tree, one `.receipt` file per
/// name+version. Two records for the same name may coexist after an
/// `--ignore-installed` run; that is deliberate, not corruption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReceipt {
    pub name: PackageName,
    pub version: Version,
    pub source: SourceLocator,
    pub dependencies: Vec<String>,
    pub files: Vec<String>,
    pub install_reason: InstallReason,
    pub install_status: String,
    pub installed_at_unix: u64,
}

impl InstallReceipt {
    pub fn file_name(&self) -> String {
        receipt_file_name(&self.name, &self.version)
    }
}

pub(crate) fn receipt_file_name(name: &PackageName, version: &Version) -> String {
    format!("{name}-{version}.receipt")
}

pub fn write_install_receipt(layout: &PrefixLayout, receipt: &InstallReceipt) -> Result<PathBuf> {
    let mut payload = String::new();
    payload.push_str(&format!("name={}\n", receipt.name));
    payload.push_str(&format!("version={}\n", receipt.version));
    payload.push_str(&format!("source={}\n", receipt.source.describe()));
    for dependency in &receipt.dependencies {
        payload.push_str(&format!("dependency={dependency}\n"));
    }
    for file in &receipt.files {
        payload.push_str(&format!("file={file}\n"));
    }
    payload.push_str(&format!(
        "install_reason={}\n",
        receipt.install_reason.as_str()
    ));
    payload.push_str(&format!("install_status={}\n", receipt.install_status));
    payload.push_str(&format!(
        "installed_at_unix={}\n",
        receipt.installed_at_unix
    ));

    let path = layout.receipt_path(&receipt.name, &receipt.version);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&path, payload.as_bytes())
        .with_context(|| format!("failed to write install receipt: {}", path.display()))?;
    Ok(path)
}

pub fn read_install_receipts(layout: &PrefixLayout) -> Result<Vec<InstallReceipt>> {
    let dir = layout.installed_state_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut receipts = Vec::new();
    for entry in fs::read_dir(&dir)
        .with_context(|| format!("failed to read install state directory: {}", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let path = entry.path();
        if path.extension().and_then(|v| v.to_str()) != Some("receipt") {
            continue;
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read install receipt: {}", path.display()))?;
        let receipt = parse_receipt(&raw)
            .with_context(|| format!("failed to parse install receipt: {}", path.display()))?;
        receipts.push(receipt);
    }

    receipts.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
    Ok(receipts)
}

/// All receipts recorded for one name, oldest version first.
pub fn receipts_for(layout: &PrefixLayout, name: &PackageName) -> Result<Vec<InstallReceipt>> {
    Ok(read_install_receipts(layout)?
        .into_iter()
        .filter(|receipt| receipt.name == *name)
        .collect())
}

/// Builds the installed index the resolver consumes from the receipts on
/// disk. When several records exist for one name the highest version wins;
/// the index keeps the single-version-per-name invariant even when the disk
/// state does not.
pub fn read_installed_index(layout: &PrefixLayout) -> Result<InstalledIndex> {
    let receipts = read_install_receipts(layout)?;
    let mut newest: BTreeMap<PackageName, InstallReceipt> = BTreeMap::new();
    for receipt in receipts {
        match newest.get(&receipt.name) {
            Some(existing) if existing.version >= receipt.version => {}
            _ => {
                newest.insert(receipt.name.clone(), receipt);
            }
        }
    }

    let mut index = InstalledIndex::new();
    for receipt in newest.into_values() {
        let dependencies = receipt
            .dependencies
            .iter()
            .map(|entry| {
                entry
                    .split_once('@')
                    .map(|(dep, _)| dep)
                    .unwrap_or(entry.as_str())
            })
            .filter_map(|dep| PackageName::new(dep).ok())
            .collect();
        index.insert(InstalledPackage {
            name: receipt.name,
            version: receipt.version,
            source: receipt.source,
            requested: receipt.install_reason == InstallReason::Root,
            dependencies,
            owned_files: receipt.files,
        });
    }
    Ok(index)
}

pub(crate) fn parse_receipt(raw: &str) -> Result<InstallReceipt> {
    let mut name = None;
    let mut version = None;
    let mut source = None;
    let mut dependencies = Vec::new();
    let mut files = Vec::new();
    let mut install_reason = None;
    let mut install_status = None;
    let mut installed_at_unix = None;

    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        match k {
            "name" => name = Some(PackageName::new(v)?),
            "version" => {
                version = Some(Version::parse(v).context("receipt version must be semver")?)
            }
            "source" => source = Some(SourceLocator::parse_token(v)?),
            "dependency" => dependencies.push(v.to_string()),
            "file" => files.push(v.to_string()),
            "install_reason" => install_reason = Some(InstallReason::parse(v)?),
            "install_status" => install_status = Some(v.to_string()),
            "installed_at_unix" => {
                installed_at_unix = Some(v.parse().context("installed_at_unix must be u64")?)
            }
            _ => {}
        }
    }

    Ok(InstallReceipt {
        name: name.context("missing name")?,
        version: version.context("missing version")?,
        source: source.unwrap_or(SourceLocator::Index),
        dependencies,
        files,
        install_reason: install_reason.unwrap_or(InstallReason::Root),
        install_status: install_status.unwrap_or_else(|| "installed".to_string()),
        installed_at_unix: installed_at_unix.context("missing installed_at_unix")?,
    })
}
