use std::collections::{BTreeMap, BTreeSet, HashSet};

use depot_core::PackageName;

use crate::error::ResolveError;

/// Orders selected packages so every dependency precedes its dependents.
/// `dependencies` must already be restricted to selected names.
pub(crate) fn topo_order(
    dependencies: &BTreeMap<PackageName, BTreeSet<PackageName>>,
) -> Result<Vec<PackageName>, ResolveError> {
    let mut reverse: BTreeMap<PackageName, BTreeSet<PackageName>> = BTreeMap::new();
    let mut in_degree: BTreeMap<PackageName, usize> = BTreeMap::new();

    for name in dependencies.keys() {
        reverse.insert(name.clone(), BTreeSet::new());
        in_degree.insert(name.clone(), 0);
    }

    for (name, dependency_set) in dependencies {
        in_degree.insert(name.clone(), dependency_set.len());
        for dep_name in dependency_set {
            reverse
                .entry(dep_name.clone())
                .or_default()
                .insert(name.clone());
        }
    }

    let mut ready: BTreeSet<PackageName> = in_degree
        .iter()
        .filter_map(|(name, degree)| (*degree == 0).then(|| name.clone()))
        .collect();
    let mut ordered = Vec::new();

    while let Some(next) = ready.pop_first() {
        ordered.push(next.clone());
        if let Some(children) = reverse.get(&next) {
            for child in children {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.insert(child.clone());
                    }
                }
            }
        }
    }

    if ordered.len() != dependencies.len() {
        let ordered_set: HashSet<&PackageName> = ordered.iter().collect();
        let mut cycle_nodes = dependencies
            .keys()
            .filter(|name| !ordered_set.contains(name))
            .map(|name| name.to_string())
            .collect::<Vec<_>>();
        cycle_nodes.sort();
        return Err(ResolveError::Cycle { names: cycle_nodes });
    }

    Ok(ordered)
}
