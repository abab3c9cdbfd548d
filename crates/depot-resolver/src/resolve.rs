use std::collections::{BTreeMap, BTreeSet, HashMap};

use depot_core::{AliasTable, InstalledIndex, PackageManifest, PackageName, Requirement};
use semver::{Version, VersionReq};

use crate::error::ResolveError;
use crate::order::topo_order;
use crate::plan::{InstallPlan, PlanEntry, PlanReason};
use crate::strategy::UpgradeStrategy;

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    pub upgrade: bool,
    pub strategy: UpgradeStrategy,
    pub force_reinstall: bool,
    pub ignore_installed: bool,
}

#[derive(Debug, Clone)]
struct Constraint {
    requirement: VersionReq,
    required_by: Option<PackageName>,
}

#[derive(Debug, Clone)]
enum Selection {
    /// The installed version stays; its dependencies are not re-walked.
    KeptInstalled { version: Version },
    Candidate { manifest: PackageManifest },
}

impl Selection {
    fn version(&self) -> &Version {
        match self {
            Self::KeptInstalled { version } => version,
            Self::Candidate { manifest } => &manifest.version,
        }
    }
}

type Constraints = BTreeMap<PackageName, Vec<Constraint>>;
type Selected = BTreeMap<PackageName, Selection>;

/// Resolves the requested requirements against the installed index into an
/// ordered install plan.
///
/// `load_versions` supplies every known release of a package, newest or oldest
/// first as it likes; the resolver orders candidates itself. The alias table is
/// consulted before graph construction, so legacy names resolve against their
/// replacement package's releases.
pub fn resolve<F>(
    requested: &[Requirement],
    installed: &InstalledIndex,
    aliases: &AliasTable,
    options: &ResolveOptions,
    load_versions: F,
) -> Result<InstallPlan, ResolveError>
where
    F: FnMut(&PackageName) -> anyhow::Result<Vec<PackageManifest>>,
{
    let mut constraints: Constraints = BTreeMap::new();
    let mut roots: BTreeSet<PackageName> = BTreeSet::new();
    for requirement in requested {
        let name = aliases.rewrite(&requirement.name);
        roots.insert(name.clone());
        constraints.entry(name).or_default().push(Constraint {
            requirement: requirement.requirement.clone(),
            required_by: None,
        });
    }

    let mut search = Search {
        installed,
        options,
        roots: &roots,
        versions_cache: HashMap::new(),
        load_versions,
        conflict: None,
    };

    let mut selected: Selected = BTreeMap::new();
    if !search.run(&mut constraints, &mut selected)? {
        let (name, constraints) = search.conflict.take().unwrap_or_else(|| {
            let name = roots.first().cloned().unwrap_or_else(|| {
                PackageName::new("unknown").expect("static name must be valid")
            });
            (name, "the requested requirement set".to_string())
        });
        return Err(ResolveError::VersionConflict { name, constraints });
    }

    build_plan(&selected, installed, &roots, options)
}

struct Search<'a, F> {
    installed: &'a InstalledIndex,
    options: &'a ResolveOptions,
    roots: &'a BTreeSet<PackageName>,
    versions_cache: HashMap<PackageName, Vec<PackageManifest>>,
    load_versions: F,
    conflict: Option<(PackageName, String)>,
}

impl<F> Search<'_, F>
where
    F: FnMut(&PackageName) -> anyhow::Result<Vec<PackageManifest>>,
{
    fn run(
        &mut self,
        constraints: &mut Constraints,
        selected: &mut Selected,
    ) -> Result<bool, ResolveError> {
        let Some(next) = constraints
            .keys()
            .find(|name| !selected.contains_key(*name))
            .cloned()
        else {
            return Ok(self.consistent(selected, constraints));
        };

        let candidates = self.candidates_for(&next, constraints)?;
        for candidate in candidates {
            let dependencies = match &candidate {
                Selection::KeptInstalled { .. } => BTreeMap::new(),
                Selection::Candidate { manifest } => manifest.dependencies.clone(),
            };
            selected.insert(next.clone(), candidate);

            let mut added_constraints: Vec<PackageName> = Vec::new();
            for (dep_name, dep_req) in &dependencies {
                constraints
                    .entry(dep_name.clone())
                    .or_default()
                    .push(Constraint {
                        requirement: dep_req.clone(),
                        required_by: Some(next.clone()),
                    });
                added_constraints.push(dep_name.clone());
            }

            if self.consistent(selected, constraints) && self.run(constraints, selected)? {
                return Ok(true);
            }

            for dep_name in added_constraints {
                if let Some(list) = constraints.get_mut(&dep_name) {
                    list.pop();
                }
            }
            constraints.retain(|_, reqs| !reqs.is_empty());
            selected.remove(&next);
        }

        Ok(false)
    }

    /// Candidate order encodes the upgrade policy: the installed version is
    /// tried first when it may be kept, then registry releases. Those come
    /// newest first for fresh installs and explicit upgrades, oldest first
    /// when a constraint forces an upgrade under only-if-needed (minimal
    /// satisfying version wins).
    fn candidates_for(
        &mut self,
        name: &PackageName,
        constraints: &Constraints,
    ) -> Result<Vec<Selection>, ResolveError> {
        let current: Vec<VersionReq> = constraints
            .get(name)
            .map(|list| {
                list.iter()
                    .map(|constraint| constraint.requirement.clone())
                    .collect()
            })
            .unwrap_or_default();

        let mut candidates = Vec::new();
        if self.may_keep_installed(name) {
            if let Some(package) = self.installed.get(name) {
                if current.iter().all(|req| req.matches(&package.version)) {
                    candidates.push(Selection::KeptInstalled {
                        version: package.version.clone(),
                    });
                }
            }
        }

        if !self.versions_cache.contains_key(name) {
            let versions = (self.load_versions)(name)?;
            self.versions_cache.insert(name.clone(), versions);
        }
        let known = self
            .versions_cache
            .get(name)
            .expect("versions cache was just populated");

        let mut matched: Vec<&PackageManifest> = known
            .iter()
            .filter(|manifest| current.iter().all(|req| req.matches(&manifest.version)))
            .collect();
        if self.prefers_minimal_upgrade(name) {
            matched.sort_by(|a, b| a.version.cmp(&b.version));
        } else {
            matched.sort_by(|a, b| b.version.cmp(&a.version));
        }
        candidates.extend(matched.into_iter().map(|manifest| Selection::Candidate {
            manifest: manifest.clone(),
        }));

        if candidates.is_empty() {
            if known.is_empty() {
                return Err(ResolveError::NotFound { name: name.clone() });
            }
            self.conflict = Some((
                name.clone(),
                describe_constraints(constraints.get(name).map(Vec::as_slice).unwrap_or(&[])),
            ));
        }

        Ok(candidates)
    }

    fn may_keep_installed(&self, name: &PackageName) -> bool {
        if self.options.ignore_installed || self.options.force_reinstall {
            return false;
        }
        if self.options.upgrade && self.roots.contains(name) {
            return false;
        }
        if self.options.upgrade && self.options.strategy == UpgradeStrategy::Eager {
            return false;
        }
        true
    }

    fn prefers_minimal_upgrade(&self, name: &PackageName) -> bool {
        self.installed.contains(name)
            && !self.options.ignore_installed
            && !self.options.force_reinstall
            && self.options.strategy == UpgradeStrategy::OnlyIfNeeded
            && !(self.options.upgrade && self.roots.contains(name))
    }

    fn consistent(&mut self, selected: &Selected, constraints: &Constraints) -> bool {
        for (name, selection) in selected {
            if let Some(list) = constraints.get(name) {
                for constraint in list {
                    if !constraint.requirement.matches(selection.version()) {
                        if self.conflict.is_none() {
                            self.conflict = Some((name.clone(), describe_constraints(list)));
                        }
                        return false;
                    }
                }
            }
        }
        true
    }
}

fn describe_constraints(constraints: &[Constraint]) -> String {
    if constraints.is_empty() {
        return "*".to_string();
    }
    constraints
        .iter()
        .map(|constraint| match &constraint.required_by {
            Some(parent) => format!("{} (required by {parent})", constraint.requirement),
            None => format!("{} (requested)", constraint.requirement),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn build_plan(
    selected: &Selected,
    installed: &InstalledIndex,
    roots: &BTreeSet<PackageName>,
    options: &ResolveOptions,
) -> Result<InstallPlan, ResolveError> {
    let mut dependencies: BTreeMap<PackageName, BTreeSet<PackageName>> = BTreeMap::new();
    let mut dependents: BTreeMap<PackageName, BTreeSet<PackageName>> = BTreeMap::new();
    for (name, selection) in selected {
        let mut deps = BTreeSet::new();
        if let Selection::Candidate { manifest } = selection {
            for dep_name in manifest.dependencies.keys() {
                if selected.contains_key(dep_name) {
                    deps.insert(dep_name.clone());
                    dependents
                        .entry(dep_name.clone())
                        .or_default()
                        .insert(name.clone());
                }
            }
        }
        dependencies.insert(name.clone(), deps);
    }

    let order = topo_order(&dependencies)?;
    let mut entries = Vec::new();
    for name in order {
        let selection = &selected[&name];
        match selection {
            Selection::KeptInstalled { version } => {
                entries.push(PlanEntry::Skip {
                    name,
                    version: Some(version.clone()),
                    reason: PlanReason::AlreadySatisfied,
                });
            }
            Selection::Candidate { manifest } => {
                let install_reason = if roots.contains(&name) {
                    PlanReason::Requested
                } else {
                    dependents
                        .get(&name)
                        .and_then(|set| set.first())
                        .map(|parent| PlanReason::DependencyOf(parent.clone()))
                        .unwrap_or(PlanReason::Requested)
                };

                match installed.get(&name) {
                    Some(_) if options.ignore_installed => {
                        // Old metadata stays on disk next to the new install.
                        entries.push(PlanEntry::Install {
                            manifest: manifest.clone(),
                            reason: install_reason,
                        });
                    }
                    Some(current) if current.version == manifest.version => {
                        if options.force_reinstall {
                            entries.push(PlanEntry::Uninstall {
                                name: name.clone(),
                                version: current.version.clone(),
                                reason: PlanReason::ForcedReinstall,
                            });
                            entries.push(PlanEntry::Install {
                                manifest: manifest.clone(),
                                reason: PlanReason::ForcedReinstall,
                            });
                        } else {
                            entries.push(PlanEntry::Skip {
                                name,
                                version: Some(current.version.clone()),
                                reason: PlanReason::AlreadyUpToDate,
                            });
                        }
                    }
                    Some(current) => {
                        entries.push(PlanEntry::Uninstall {
                            name: name.clone(),
                            version: current.version.clone(),
                            reason: PlanReason::SupersededBy(manifest.version.clone()),
                        });
                        entries.push(PlanEntry::Install {
                            manifest: manifest.clone(),
                            reason: PlanReason::UpgradeFrom(current.version.clone()),
                        });
                    }
                    None => {
                        entries.push(PlanEntry::Install {
                            manifest: manifest.clone(),
                            reason: install_reason,
                        });
                    }
                }
            }
        }
    }

    Ok(InstallPlan::new(entries))
}
