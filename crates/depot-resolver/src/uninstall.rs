use std::collections::{BTreeMap, BTreeSet};

use depot_core::{InstalledIndex, PackageName};

use crate::error::ResolveError;
use crate::plan::{InstallPlan, PlanEntry, PlanReason};

/// Plans the removal of the named packages.
///
/// Removal is refused while another installed, explicitly requested package
/// still reaches a target through the dependency graph. With `prune`, formerly
/// needed dependencies that no remaining root reaches are removed too.
/// Dependents are always uninstalled before their dependencies.
pub fn plan_uninstall(
    installed: &InstalledIndex,
    names: &[PackageName],
    prune: bool,
) -> Result<InstallPlan, ResolveError> {
    let mut entries = Vec::new();
    let mut targets: BTreeSet<PackageName> = BTreeSet::new();
    for name in names {
        if installed.contains(name) {
            targets.insert(name.clone());
        } else {
            entries.push(PlanEntry::Skip {
                name: name.clone(),
                version: None,
                reason: PlanReason::NotInstalled,
            });
        }
    }

    let dependencies = dependency_map(installed);
    let remaining_roots: Vec<PackageName> = installed
        .iter()
        .filter(|package| package.requested && !targets.contains(&package.name))
        .map(|package| package.name.clone())
        .collect();
    let reachable = reachable_from(&remaining_roots, &dependencies);

    for target in &targets {
        if reachable.contains(target) {
            let mut dependents = remaining_roots
                .iter()
                .filter(|root| reaches(root, target, &dependencies))
                .map(|root| root.to_string())
                .collect::<Vec<_>>();
            dependents.sort();
            dependents.dedup();
            return Err(ResolveError::BlockedByDependents {
                name: target.clone(),
                dependents,
            });
        }
    }

    let mut removal: BTreeMap<PackageName, PlanReason> = targets
        .iter()
        .map(|name| (name.clone(), PlanReason::Removed))
        .collect();
    if prune {
        let target_roots: Vec<PackageName> = targets.iter().cloned().collect();
        for name in reachable_from(&target_roots, &dependencies) {
            if targets.contains(&name) || reachable.contains(&name) {
                continue;
            }
            if installed
                .get(&name)
                .map(|package| package.requested)
                .unwrap_or(false)
            {
                continue;
            }
            removal.entry(name).or_insert(PlanReason::NoLongerNeeded);
        }
    }

    // Dependents first: reverse of the dependency-first install order.
    for name in removal_order(&removal, &dependencies) {
        let package = installed
            .get(&name)
            .expect("removal set only contains installed packages");
        let reason = removal
            .get(&name)
            .cloned()
            .unwrap_or(PlanReason::NoLongerNeeded);
        entries.push(PlanEntry::Uninstall {
            name: name.clone(),
            version: package.version.clone(),
            reason,
        });
    }

    Ok(InstallPlan::new(entries))
}

fn dependency_map(installed: &InstalledIndex) -> BTreeMap<PackageName, BTreeSet<PackageName>> {
    installed
        .iter()
        .map(|package| {
            let deps = package
                .dependencies
                .iter()
                .filter(|dep| installed.contains(dep))
                .cloned()
                .collect::<BTreeSet<_>>();
            (package.name.clone(), deps)
        })
        .collect()
}

fn removal_order(
    removal: &BTreeMap<PackageName, PlanReason>,
    dependencies: &BTreeMap<PackageName, BTreeSet<PackageName>>,
) -> Vec<PackageName> {
    // Repeatedly peel a member no other remaining member depends on.
    let mut remaining: BTreeSet<PackageName> = removal.keys().cloned().collect();
    let mut ordered = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .find(|candidate| {
                !remaining.iter().any(|other| {
                    other != *candidate
                        && dependencies
                            .get(other)
                            .map(|deps| deps.contains(*candidate))
                            .unwrap_or(false)
                })
            })
            .cloned()
            .unwrap_or_else(|| {
                remaining
                    .first()
                    .cloned()
                    .expect("remaining set is non-empty")
            });
        remaining.remove(&next);
        ordered.push(next);
    }
    ordered
}

fn reachable_from(
    roots: &[PackageName],
    dependencies: &BTreeMap<PackageName, BTreeSet<PackageName>>,
) -> BTreeSet<PackageName> {
    let mut visited = BTreeSet::new();
    let mut stack: Vec<PackageName> = roots.to_vec();
    while let Some(next) = stack.pop() {
        if !visited.insert(next.clone()) {
            continue;
        }
        if let Some(deps) = dependencies.get(&next) {
            stack.extend(deps.iter().cloned());
        }
    }
    visited
}

fn reaches(
    root: &PackageName,
    target: &PackageName,
    dependencies: &BTreeMap<PackageName, BTreeSet<PackageName>>,
) -> bool {
    let mut visited = BTreeSet::new();
    let mut stack = vec![root.clone()];
    while let Some(next) = stack.pop() {
        if next == *target {
            return true;
        }
        if !visited.insert(next.clone()) {
            continue;
        }
        if let Some(deps) = dependencies.get(&next) {
            stack.extend(deps.iter().cloned());
        }
    }
    false
}
