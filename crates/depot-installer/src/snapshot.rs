use anyhow::{Context, Result};
use depot_core::PackageName;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::fs_utils::{copy_tree, remove_file_if_exists};
use crate::layout::PrefixLayout;
use crate::receipts::receipts_for;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PackageSnapshotManifest {
    package_exists: bool,
    receipt_files: Vec<String>,
}

fn snapshot_manifest_path(snapshot_root: &Path) -> PathBuf {
    snapshot_root.join("manifest.json")
}

fn snapshot_package_root(snapshot_root: &Path) -> PathBuf {
    snapshot_root.join("pkg")
}

fn snapshot_receipts_dir(snapshot_root: &Path) -> PathBuf {
    snapshot_root.join("receipts")
}

/// Copies everything the executor may touch for one package (its trees under
/// `pkgs/<name>` and every receipt recorded for the name) into the
/// transaction staging area, and records what existed. The snapshot is the
/// reversible action the rollback manager replays.
pub(crate) fn capture_package_state_snapshot(
    layout: &PrefixLayout,
    txid: &str,
    name: &PackageName,
) -> Result<PathBuf> {
    let snapshot_root = layout
        .transaction_staging_path(txid)
        .join("rollback")
        .join(name.as_str());
    if snapshot_root.exists() {
        fs::remove_dir_all(&snapshot_root).with_context(|| {
            format!(
                "failed clearing existing rollback snapshot dir: {}",
                snapshot_root.display()
            )
        })?;
    }
    fs::create_dir_all(snapshot_receipts_dir(&snapshot_root)).with_context(|| {
        format!(
            "failed creating rollback snapshot dir: {}",
            snapshot_receipts_dir(&snapshot_root).display()
        )
    })?;

    let mut manifest = PackageSnapshotManifest::default();

    let package_root = layout.package_root(name);
    if package_root.exists() {
        manifest.package_exists = true;
        copy_tree(&package_root, &snapshot_package_root(&snapshot_root))?;
    }

    for receipt in receipts_for(layout, name)? {
        let file_name = receipt.file_name();
        let src = layout.receipt_path(&receipt.name, &receipt.version);
        let dst = snapshot_receipts_dir(&snapshot_root).join(&file_name);
        fs::copy(&src, &dst)
            .with_context(|| format!("failed copying receipt snapshot {}", dst.display()))?;
        manifest.receipt_files.push(file_name);
    }

    let payload = serde_json::to_string_pretty(&manifest)
        .context("failed to serialize snapshot manifest")?;
    fs::write(snapshot_manifest_path(&snapshot_root), payload).with_context(|| {
        format!(
            "failed writing snapshot manifest: {}",
            snapshot_manifest_path(&snapshot_root).display()
        )
    })?;
    Ok(snapshot_root)
}

/// Puts one package back exactly as its snapshot recorded it: current trees
/// and receipts for the name are removed first, then the snapshotted state
/// (if any) is copied back.
pub(crate) fn restore_package_state_snapshot(
    layout: &PrefixLayout,
    name: &PackageName,
    snapshot_root: Option<&Path>,
) -> Result<()> {
    let package_root = layout.package_root(name);
    if package_root.exists() {
        fs::remove_dir_all(&package_root).with_context(|| {
            format!("failed to remove package path: {}", package_root.display())
        })?;
    }
    for receipt in receipts_for(layout, name)? {
        let path = layout.receipt_path(&receipt.name, &receipt.version);
        remove_file_if_exists(&path)
            .with_context(|| format!("failed to remove install receipt: {}", path.display()))?;
    }

    let Some(snapshot_root) = snapshot_root else {
        return Ok(());
    };

    let manifest_raw =
        fs::read_to_string(snapshot_manifest_path(snapshot_root)).with_context(|| {
            format!(
                "failed reading snapshot manifest: {}",
                snapshot_manifest_path(snapshot_root).display()
            )
        })?;
    let manifest: PackageSnapshotManifest =
        serde_json::from_str(&manifest_raw).with_context(|| {
            format!(
                "failed parsing snapshot manifest: {}",
                snapshot_manifest_path(snapshot_root).display()
            )
        })?;

    if manifest.package_exists && snapshot_package_root(snapshot_root).exists() {
        copy_tree(&snapshot_package_root(snapshot_root), &package_root)?;
    }

    for file_name in &manifest.receipt_files {
        let src = snapshot_receipts_dir(snapshot_root).join(file_name);
        if !src.exists() {
            continue;
        }
        let dst = layout.installed_state_dir().join(file_name);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::copy(&src, &dst)
            .with_context(|| format!("failed restoring receipt from {}", src.display()))?;
    }

    Ok(())
}
