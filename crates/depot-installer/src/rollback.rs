use anyhow::{anyhow, Context, Result};
use depot_core::PackageName;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::layout::PrefixLayout;
use crate::snapshot::restore_package_state_snapshot;
use crate::transactions::{
    clear_active_transaction, read_active_transaction, read_transaction_journal_records,
    read_transaction_metadata, update_transaction_status, TransactionStatus,
};

/// What a completed rollback put back, newest mutation first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub restored: Vec<PackageName>,
}

pub(crate) fn backup_step_name(name: &PackageName) -> String {
    format!("backup_package_state:{name}")
}

pub(crate) fn apply_step_name(action: &str, name: &PackageName) -> String {
    format!("apply:{action}:{name}")
}

fn package_from_backup_step(step: &str) -> Option<&str> {
    step.strip_prefix("backup_package_state:")
}

fn package_from_apply_step(step: &str) -> Option<&str> {
    step.strip_prefix("apply:")
        .and_then(|rest| rest.split_once(':'))
        .map(|(_, name)| name)
}

/// Replays a transaction journal backwards: every package with a completed
/// apply step is restored from the snapshot captured before its first
/// mutation. A mutation without a snapshot payload is a fatal inconsistency.
pub(crate) fn replay_rollback_journal(
    layout: &PrefixLayout,
    txid: &str,
) -> Result<RollbackOutcome> {
    let records = read_transaction_journal_records(layout, txid)?;

    let mut backups: HashMap<String, PathBuf> = HashMap::new();
    for record in &records {
        if record.state != "done" {
            continue;
        }
        if let Some(package_name) = package_from_backup_step(&record.step) {
            if let Some(path) = &record.path {
                backups.insert(package_name.to_string(), PathBuf::from(path));
            }
        }
    }

    let mut compensating_steps = records
        .iter()
        .filter(|record| record.state == "done")
        .filter_map(|record| {
            package_from_apply_step(&record.step)
                .map(|package_name| (record.seq, package_name.to_string()))
        })
        .collect::<Vec<_>>();
    compensating_steps.sort_by(|left, right| right.0.cmp(&left.0));

    for (_, package_name) in &compensating_steps {
        if !backups.contains_key(package_name) {
            return Err(anyhow!(
                "transaction journal missing rollback payload for package '{package_name}'"
            ));
        }
    }

    let mut outcome = RollbackOutcome::default();
    let mut restored_names: HashSet<String> = HashSet::new();
    for (_, package_name) in compensating_steps {
        if !restored_names.insert(package_name.clone()) {
            continue;
        }
        let name = PackageName::new(&package_name)
            .with_context(|| format!("journal names invalid package '{package_name}'"))?;
        let snapshot_root = backups.get(&package_name).map(PathBuf::as_path);
        restore_package_state_snapshot(layout, &name, snapshot_root)?;
        outcome.restored.push(name);
    }

    Ok(outcome)
}

/// Paths that may be left inconsistent when a rollback itself fails.
pub(crate) fn possibly_inconsistent_paths(layout: &PrefixLayout, txid: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(records) = read_transaction_journal_records(layout, txid) {
        for record in records {
            if let Some(package_name) = package_from_apply_step(&record.step) {
                if let Ok(name) = PackageName::new(package_name) {
                    paths.push(layout.package_root(&name));
                }
            }
        }
    }
    paths.push(layout.installed_state_dir());
    paths.sort();
    paths.dedup();
    paths
}

/// Rolls back one transaction by id, for the standalone `rollback` command.
/// Refuses while the transaction is still applying under the active marker;
/// rolling back an already rolled-back transaction is a no-op.
pub fn rollback_transaction(layout: &PrefixLayout, txid: &str) -> Result<RollbackOutcome> {
    let metadata = read_transaction_metadata(layout, txid)?
        .ok_or_else(|| anyhow!("transaction metadata missing for txid={txid}"))?;

    match metadata.status {
        TransactionStatus::Committed => {
            return Err(anyhow!(
                "transaction {txid} is committed and can no longer be rolled back"
            ));
        }
        TransactionStatus::RolledBack => return Ok(RollbackOutcome::default()),
        TransactionStatus::Applying => {
            if read_active_transaction(layout)?.as_deref() == Some(txid) {
                return Err(anyhow!(
                    "transaction {txid} is still applying; wait for it or repair the prefix first"
                ));
            }
        }
        _ => {}
    }

    update_transaction_status(layout, txid, TransactionStatus::RollingBack)?;
    let outcome = match replay_rollback_journal(layout, txid) {
        Ok(outcome) => outcome,
        Err(err) => {
            let _ = update_transaction_status(layout, txid, TransactionStatus::RollbackFailed);
            let paths = possibly_inconsistent_paths(layout, txid);
            return Err(err.context(format!(
                "rollback of {txid} failed; these paths may be inconsistent: {}",
                paths
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
    };
    update_transaction_status(layout, txid, TransactionStatus::RolledBack)?;
    if read_active_transaction(layout)?.as_deref() == Some(txid) {
        clear_active_transaction(layout)?;
    }

    Ok(outcome)
}

/// The newest transaction that is in a non-final state, if any.
pub fn latest_rollback_candidate_txid(layout: &PrefixLayout) -> Result<Option<String>> {
    let entries = match std::fs::read_dir(layout.transactions_dir()) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| {
                format!(
                    "failed to read transactions directory: {}",
                    layout.transactions_dir().display()
                )
            });
        }
    };

    let mut latest: Option<(u64, String)> = None;
    for entry in entries {
        let entry = entry.with_context(|| {
            format!(
                "failed to iterate transactions directory: {}",
                layout.transactions_dir().display()
            )
        })?;
        let path = entry.path();

        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Some(txid) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let Some(metadata) = read_transaction_metadata(layout, txid)? else {
            continue;
        };
        if metadata.status.is_final() {
            continue;
        }

        match &latest {
            None => latest = Some((metadata.started_at_unix, metadata.txid)),
            Some((best_started_at, best_txid)) => {
                if metadata.started_at_unix > *best_started_at
                    || (metadata.started_at_unix == *best_started_at && metadata.txid > *best_txid)
                {
                    latest = Some((metadata.started_at_unix, metadata.txid));
                }
            }
        }
    }

    Ok(latest.map(|(_, txid)| txid))
}
