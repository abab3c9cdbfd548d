use anyhow::{anyhow, Result};
use depot_core::{PackageManifest, PackageName, SourceLocator};
use depot_resolver::{InstallPlan, PlanEntry, PlanReason};
use semver::Version;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

use crate::fs_utils::{copy_tree, list_files_recursive};
use crate::layout::PrefixLayout;
use crate::receipts::{
    read_install_receipts, write_install_receipt, InstallReason, InstallReceipt,
};
use crate::rollback::{
    apply_step_name, backup_step_name, possibly_inconsistent_paths, replay_rollback_journal,
    RollbackOutcome,
};
use crate::snapshot::capture_package_state_snapshot;
use crate::transactions::{
    append_transaction_journal_entry, clear_active_transaction, current_unix_timestamp,
    next_transaction_id, set_active_transaction, update_transaction_status,
    write_transaction_metadata, TransactionJournalEntry, TransactionMetadata, TransactionStatus,
    TRANSACTION_FORMAT_VERSION,
};

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("cannot {operation}: {reason}")]
    TransactionActive { operation: String, reason: String },

    #[error(
        "{step} failed: {source:#}; all changes from transaction {txid} were rolled back"
    )]
    StepFailed {
        txid: String,
        step: String,
        source: anyhow::Error,
        rollback: RollbackOutcome,
    },

    #[error(
        "{step} failed ({original}) and rollback of transaction {txid} also failed: {source:#}; \
         these paths may be inconsistent: {}",
        format_paths(.paths)
    )]
    RollbackFailed {
        txid: String,
        step: String,
        original: String,
        source: anyhow::Error,
        paths: Vec<PathBuf>,
    },

    #[error(transparent)]
    Setup(#[from] anyhow::Error),
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Filesystem side effects of one executor run. Paths are absolute; a path
/// that was deleted and re-created within the run counts as updated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub txid: Option<String>,
    pub installed: Vec<(PackageName, Version)>,
    pub uninstalled: Vec<(PackageName, Version)>,
    pub files_created: BTreeSet<PathBuf>,
    pub files_deleted: BTreeSet<PathBuf>,
    pub files_updated: BTreeSet<PathBuf>,
}

impl ExecutionResult {
    fn finalize(&mut self) {
        let updated: BTreeSet<PathBuf> = self
            .files_created
            .intersection(&self.files_deleted)
            .cloned()
            .collect();
        for path in &updated {
            self.files_created.remove(path);
            self.files_deleted.remove(path);
        }
        self.files_updated.extend(updated);
    }
}

struct StepError {
    step: String,
    source: anyhow::Error,
}

fn step<T>(label: &str, result: Result<T>) -> std::result::Result<T, StepError> {
    result.map_err(|source| StepError {
        step: label.to_string(),
        source,
    })
}

/// Applies a resolved plan strictly in order inside one exclusive
/// transaction. Fetch failures, unpack failures and anything else mid-plan
/// stop execution immediately and roll every prior mutation back; the
/// original error and the rollback outcome are surfaced together.
///
/// `fetch` turns a manifest into an unpacked source tree and reports where it
/// came from. A plan with nothing to apply returns without opening a
/// transaction.
pub fn execute_plan<F>(
    layout: &PrefixLayout,
    plan: &InstallPlan,
    operation: &str,
    mut fetch: F,
) -> std::result::Result<ExecutionResult, ExecuteError>
where
    F: FnMut(&PackageManifest) -> Result<(PathBuf, SourceLocator)>,
{
    layout.ensure_base_dirs()?;
    let mut result = ExecutionResult::default();
    if plan.is_noop() {
        return Ok(result);
    }

    let started_at = current_unix_timestamp()?;
    let txid = next_transaction_id(started_at);
    set_active_transaction(layout, &txid).map_err(|err| ExecuteError::TransactionActive {
        operation: operation.to_string(),
        reason: format!("{err:#}"),
    })?;
    result.txid = Some(txid.clone());

    let run = run_plan(
        layout, plan, operation, &txid, started_at, &mut result, &mut fetch,
    );
    match run {
        Ok(()) => {
            update_transaction_status(layout, &txid, TransactionStatus::Committed)?;
            clear_active_transaction(layout)?;
            result.finalize();
            Ok(result)
        }
        Err(step_error) => {
            let _ = update_transaction_status(layout, &txid, TransactionStatus::RollingBack);
            match replay_rollback_journal(layout, &txid) {
                Ok(rollback) => {
                    let _ =
                        update_transaction_status(layout, &txid, TransactionStatus::RolledBack);
                    let _ = clear_active_transaction(layout);
                    Err(ExecuteError::StepFailed {
                        txid,
                        step: step_error.step,
                        source: step_error.source,
                        rollback,
                    })
                }
                Err(rollback_error) => {
                    // The active marker stays: the prefix is not safe to
                    // mutate until a repair succeeds.
                    let _ = update_transaction_status(
                        layout,
                        &txid,
                        TransactionStatus::RollbackFailed,
                    );
                    let paths = possibly_inconsistent_paths(layout, &txid);
                    Err(ExecuteError::RollbackFailed {
                        txid,
                        step: step_error.step,
                        original: format!("{:#}", step_error.source),
                        source: rollback_error,
                        paths,
                    })
                }
            }
        }
    }
}

fn run_plan<F>(
    layout: &PrefixLayout,
    plan: &InstallPlan,
    operation: &str,
    txid: &str,
    started_at: u64,
    result: &mut ExecutionResult,
    fetch: &mut F,
) -> std::result::Result<(), StepError>
where
    F: FnMut(&PackageManifest) -> Result<(PathBuf, SourceLocator)>,
{
    step(
        "prepare transaction",
        write_transaction_metadata(
            layout,
            &TransactionMetadata {
                version: TRANSACTION_FORMAT_VERSION,
                txid: txid.to_string(),
                operation: operation.to_string(),
                status: TransactionStatus::Pending,
                started_at_unix: started_at,
            },
        ),
    )?;
    step(
        "prepare transaction",
        update_transaction_status(layout, txid, TransactionStatus::Applying),
    )?;

    let mut journal_seq = 1_u64;
    append_journal(layout, txid, &mut journal_seq, "resolve_plan", None)
        .map_err(|source| StepError {
            step: "prepare transaction".to_string(),
            source,
        })?;

    // State read once up front: receipt rootness and version pins must
    // describe the pre-transaction world even after entries start mutating
    // it.
    let prior_receipts = step("read installed state", read_install_receipts(layout))?;
    let mut prior_roots: BTreeSet<PackageName> = BTreeSet::new();
    let mut pinned_versions: BTreeMap<PackageName, Version> = BTreeMap::new();
    for receipt in &prior_receipts {
        if receipt.install_reason == InstallReason::Root {
            prior_roots.insert(receipt.name.clone());
        }
        match pinned_versions.get(&receipt.name) {
            Some(existing) if *existing >= receipt.version => {}
            _ => {
                pinned_versions.insert(receipt.name.clone(), receipt.version.clone());
            }
        }
    }
    for manifest in plan.installs() {
        pinned_versions.insert(manifest.name.clone(), manifest.version.clone());
    }

    let mut snapshotted: BTreeSet<PackageName> = BTreeSet::new();
    for entry in plan.entries() {
        match entry {
            PlanEntry::Skip { .. } => {}
            PlanEntry::Uninstall { name, version, .. } => {
                let label = format!("uninstall {name}@{version}");
                step(
                    &label,
                    ensure_snapshot(layout, txid, &mut journal_seq, name, &mut snapshotted),
                )?;
                step(
                    &label,
                    append_journal(
                        layout,
                        txid,
                        &mut journal_seq,
                        &apply_step_name("uninstall", name),
                        Some(name.as_str().to_string()),
                    ),
                )?;
                step(&label, uninstall_tree(layout, name, version, result))?;
            }
            PlanEntry::Install { manifest, reason } => {
                let label = format!("install {}@{}", manifest.name, manifest.version);
                step(
                    &label,
                    ensure_snapshot(
                        layout,
                        txid,
                        &mut journal_seq,
                        &manifest.name,
                        &mut snapshotted,
                    ),
                )?;
                step(
                    &label,
                    append_journal(
                        layout,
                        txid,
                        &mut journal_seq,
                        &apply_step_name("install", &manifest.name),
                        Some(manifest.name.as_str().to_string()),
                    ),
                )?;
                step(
                    &label,
                    install_tree(
                        layout,
                        manifest,
                        reason,
                        &prior_roots,
                        &pinned_versions,
                        result,
                        fetch,
                    ),
                )?;
            }
        }
    }

    append_journal(layout, txid, &mut journal_seq, "apply_complete", None).map_err(|source| {
        StepError {
            step: "finish transaction".to_string(),
            source,
        }
    })?;
    Ok(())
}

fn append_journal(
    layout: &PrefixLayout,
    txid: &str,
    seq: &mut u64,
    step_name: &str,
    path: Option<String>,
) -> Result<()> {
    append_transaction_journal_entry(
        layout,
        txid,
        &TransactionJournalEntry {
            seq: *seq,
            step: step_name.to_string(),
            state: "done".to_string(),
            path,
        },
    )?;
    *seq += 1;
    Ok(())
}

fn ensure_snapshot(
    layout: &PrefixLayout,
    txid: &str,
    seq: &mut u64,
    name: &PackageName,
    snapshotted: &mut BTreeSet<PackageName>,
) -> Result<()> {
    if !snapshotted.insert(name.clone()) {
        return Ok(());
    }
    let snapshot_path = capture_package_state_snapshot(layout, txid, name)?;
    append_journal(
        layout,
        txid,
        seq,
        &backup_step_name(name),
        Some(snapshot_path.display().to_string()),
    )
}

fn uninstall_tree(
    layout: &PrefixLayout,
    name: &PackageName,
    version: &Version,
    result: &mut ExecutionResult,
) -> Result<()> {
    let package_dir = layout.package_dir(name, version);
    for rel in list_files_recursive(&package_dir)? {
        result.files_deleted.insert(package_dir.join(rel));
    }
    if package_dir.exists() {
        fs::remove_dir_all(&package_dir).map_err(|err| {
            anyhow!(
                "failed to remove package dir {}: {err}",
                package_dir.display()
            )
        })?;
    }

    let package_root = layout.package_root(name);
    if package_root.exists()
        && fs::read_dir(&package_root)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false)
    {
        let _ = fs::remove_dir(&package_root);
    }

    let receipt_path = layout.receipt_path(name, version);
    if receipt_path.exists() {
        result.files_deleted.insert(receipt_path.clone());
        fs::remove_file(&receipt_path).map_err(|err| {
            anyhow!(
                "failed to remove install receipt {}: {err}",
                receipt_path.display()
            )
        })?;
    }

    result.uninstalled.push((name.clone(), version.clone()));
    Ok(())
}

fn install_tree<F>(
    layout: &PrefixLayout,
    manifest: &PackageManifest,
    reason: &PlanReason,
    prior_roots: &BTreeSet<PackageName>,
    pinned_versions: &BTreeMap<PackageName, Version>,
    result: &mut ExecutionResult,
    fetch: &mut F,
) -> Result<()>
where
    F: FnMut(&PackageManifest) -> Result<(PathBuf, SourceLocator)>,
{
    let (source_tree, source) = fetch(manifest)?;
    if !source_tree.is_dir() {
        return Err(anyhow!(
            "fetched source tree for '{}' is not a directory: {}",
            manifest.name,
            source_tree.display()
        ));
    }

    let package_dir = layout.package_dir(&manifest.name, &manifest.version);
    if package_dir.exists() {
        for rel in list_files_recursive(&package_dir)? {
            result.files_deleted.insert(package_dir.join(rel));
        }
        fs::remove_dir_all(&package_dir).map_err(|err| {
            anyhow!(
                "failed to replace package dir {}: {err}",
                package_dir.display()
            )
        })?;
    }
    copy_tree(&source_tree, &package_dir)?;

    let files = list_files_recursive(&package_dir)?;
    for rel in &files {
        result.files_created.insert(package_dir.join(rel));
    }

    let requested =
        matches!(reason, PlanReason::Requested) || prior_roots.contains(&manifest.name);
    let dependencies = manifest
        .dependencies
        .keys()
        .map(|dep| match pinned_versions.get(dep) {
            Some(version) => format!("{dep}@{version}"),
            None => dep.to_string(),
        })
        .collect();

    let receipt = InstallReceipt {
        name: manifest.name.clone(),
        version: manifest.version.clone(),
        source,
        dependencies,
        files: files
            .iter()
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            .collect(),
        install_reason: if requested {
            InstallReason::Root
        } else {
            InstallReason::Dependency
        },
        install_status: "installed".to_string(),
        installed_at_unix: current_unix_timestamp()?,
    };
    let receipt_path = write_install_receipt(layout, &receipt)?;
    result.files_created.insert(receipt_path);

    result
        .installed
        .push((manifest.name.clone(), manifest.version.clone()));
    Ok(())
}
