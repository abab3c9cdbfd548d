use std::collections::BTreeMap;

use depot_core::{
    AliasEntry, AliasTable, InstalledIndex, InstalledPackage, PackageManifest, PackageName,
    Requirement, SourceLocator,
};
use semver::Version;

use crate::{
    plan_uninstall, resolve, PlanEntry, PlanReason, ResolveError, ResolveOptions, UpgradeStrategy,
};

fn name(raw: &str) -> PackageName {
    PackageName::new(raw).expect("name must parse")
}

fn manifest(input: &str) -> PackageManifest {
    PackageManifest::from_toml_str(input).expect("manifest must parse")
}

fn installed_package(pkg: &str, version: &str, requested: bool, deps: &[&str]) -> InstalledPackage {
    InstalledPackage {
        name: name(pkg),
        version: Version::parse(version).expect("version must parse"),
        source: SourceLocator::Index,
        requested,
        dependencies: deps.iter().map(|dep| name(dep)).collect(),
        owned_files: Vec::new(),
    }
}

fn available(
    packages: &[(&str, &str, &[(&str, &str)])],
) -> BTreeMap<PackageName, Vec<PackageManifest>> {
    let mut map: BTreeMap<PackageName, Vec<PackageManifest>> = BTreeMap::new();
    for (pkg, version, deps) in packages {
        let mut toml = format!("name = \"{pkg}\"\nversion = \"{version}\"\n");
        if !deps.is_empty() {
            toml.push_str("\n[dependencies]\n");
            for (dep, req) in *deps {
                toml.push_str(&format!("{dep} = \"{req}\"\n"));
            }
        }
        map.entry(name(pkg)).or_default().push(manifest(&toml));
    }
    map
}

fn loader(
    map: &BTreeMap<PackageName, Vec<PackageManifest>>,
) -> impl FnMut(&PackageName) -> anyhow::Result<Vec<PackageManifest>> + '_ {
    |pkg| Ok(map.get(pkg).cloned().unwrap_or_default())
}

fn installs(plan: &crate::InstallPlan) -> Vec<(String, String)> {
    plan.installs()
        .map(|manifest| (manifest.name.to_string(), manifest.version.to_string()))
        .collect()
}

fn uninstalls(plan: &crate::InstallPlan) -> Vec<(String, String)> {
    plan.uninstalls()
        .map(|(pkg, version)| (pkg.to_string(), version.to_string()))
        .collect()
}

#[test]
fn resolves_transitive_dependencies_in_dependency_first_order() {
    let map = available(&[
        ("app", "1.0.0", &[("lib", "^1")]),
        ("lib", "1.2.0", &[("zlib", "^2")]),
        ("zlib", "2.1.0", &[]),
    ]);

    let plan = resolve(
        &[Requirement::parse("app").expect("spec")],
        &InstalledIndex::new(),
        &AliasTable::new(),
        &ResolveOptions::default(),
        loader(&map),
    )
    .expect("must resolve");

    assert_eq!(
        installs(&plan),
        vec![
            ("zlib".to_string(), "2.1.0".to_string()),
            ("lib".to_string(), "1.2.0".to_string()),
            ("app".to_string(), "1.0.0".to_string()),
        ]
    );
    assert!(uninstalls(&plan).is_empty());
}

#[test]
fn no_upgrade_unless_requested() {
    let map = available(&[("initools", "0.1.0", &[]), ("initools", "0.3.0", &[])]);
    let installed: InstalledIndex = [installed_package("initools", "0.1.0", true, &[])]
        .into_iter()
        .collect();

    let plan = resolve(
        &[Requirement::parse("INITools").expect("spec")],
        &installed,
        &AliasTable::new(),
        &ResolveOptions::default(),
        loader(&map),
    )
    .expect("must resolve");

    assert!(plan.is_noop(), "{plan:?}");
    assert!(matches!(
        plan.entries(),
        [PlanEntry::Skip {
            reason: PlanReason::AlreadySatisfied,
            ..
        }]
    ));
}

#[test]
fn upgrade_when_requested_replaces_old_version() {
    let map = available(&[("initools", "0.1.0", &[]), ("initools", "0.3.0", &[])]);
    let installed: InstalledIndex = [installed_package("initools", "0.1.0", true, &[])]
        .into_iter()
        .collect();

    let plan = resolve(
        &[Requirement::parse("initools").expect("spec")],
        &installed,
        &AliasTable::new(),
        &ResolveOptions {
            upgrade: true,
            ..ResolveOptions::default()
        },
        loader(&map),
    )
    .expect("must resolve");

    assert_eq!(
        uninstalls(&plan),
        vec![("initools".to_string(), "0.1.0".to_string())]
    );
    assert_eq!(
        installs(&plan),
        vec![("initools".to_string(), "0.3.0".to_string())]
    );
}

#[test]
fn upgrade_to_specific_version_without_upgrade_flag() {
    let map = available(&[("initools", "0.2.0", &[]), ("initools", "0.3.0", &[])]);
    let installed: InstalledIndex = [installed_package("initools", "0.2.0", true, &[])]
        .into_iter()
        .collect();

    let plan = resolve(
        &[Requirement::parse("initools@=0.3.0").expect("spec")],
        &installed,
        &AliasTable::new(),
        &ResolveOptions::default(),
        loader(&map),
    )
    .expect("must resolve");

    assert_eq!(
        uninstalls(&plan),
        vec![("initools".to_string(), "0.2.0".to_string())]
    );
    assert_eq!(
        installs(&plan),
        vec![("initools".to_string(), "0.3.0".to_string())]
    );
}

#[test]
fn uninstall_of_superseded_version_directly_precedes_its_install() {
    let map = available(&[("initools", "0.2.0", &[]), ("initools", "0.3.0", &[])]);
    let installed: InstalledIndex = [installed_package("initools", "0.2.0", true, &[])]
        .into_iter()
        .collect();

    let plan = resolve(
        &[Requirement::parse("initools@=0.3.0").expect("spec")],
        &installed,
        &AliasTable::new(),
        &ResolveOptions::default(),
        loader(&map),
    )
    .expect("must resolve");

    let entries = plan.entries();
    assert_eq!(entries.len(), 2);
    assert!(matches!(entries[0], PlanEntry::Uninstall { .. }));
    assert!(matches!(entries[1], PlanEntry::Install { .. }));
    assert_eq!(entries[0].name(), entries[1].name());
}

#[test]
fn upgrade_with_newest_already_installed_is_noop() {
    let map = available(&[("simple", "1.0.0", &[]), ("simple", "3.0.0", &[])]);
    let installed: InstalledIndex = [installed_package("simple", "3.0.0", true, &[])]
        .into_iter()
        .collect();

    let plan = resolve(
        &[Requirement::parse("simple").expect("spec")],
        &installed,
        &AliasTable::new(),
        &ResolveOptions {
            upgrade: true,
            ..ResolveOptions::default()
        },
        loader(&map),
    )
    .expect("must resolve");

    assert!(plan.is_noop());
    assert!(matches!(
        plan.entries(),
        [PlanEntry::Skip {
            reason: PlanReason::AlreadyUpToDate,
            ..
        }]
    ));
}

#[test]
fn unrecognized_strategy_token_is_rejected() {
    let err = UpgradeStrategy::parse("bazinga").expect_err("must reject");
    assert!(matches!(
        err,
        ResolveError::InvalidStrategy { ref token } if token == "bazinga"
    ));
    assert!(UpgradeStrategy::parse("eager").is_ok());
    assert!(UpgradeStrategy::parse("only-if-needed").is_ok());
}

#[test]
fn only_if_needed_keeps_satisfied_dependency() {
    let map = available(&[
        ("require-simple", "1.0.0", &[("simple", ">=1")]),
        ("simple", "1.0.0", &[]),
        ("simple", "2.0.0", &[]),
        ("simple", "3.0.0", &[]),
    ]);
    let installed: InstalledIndex = [installed_package("simple", "2.0.0", true, &[])]
        .into_iter()
        .collect();

    let plan = resolve(
        &[Requirement::parse("require-simple").expect("spec")],
        &installed,
        &AliasTable::new(),
        &ResolveOptions {
            upgrade: true,
            strategy: UpgradeStrategy::OnlyIfNeeded,
            ..ResolveOptions::default()
        },
        loader(&map),
    )
    .expect("must resolve");

    assert_eq!(
        installs(&plan),
        vec![("require-simple".to_string(), "1.0.0".to_string())]
    );
    assert!(uninstalls(&plan).is_empty());
    let skipped: Vec<_> = plan.skips().map(|entry| entry.name().to_string()).collect();
    assert_eq!(skipped, vec!["simple".to_string()]);
}

#[test]
fn only_if_needed_upgrades_unsatisfied_dependency_to_minimal_version() {
    let map = available(&[
        ("b", "1.0.0", &[("a", ">=2")]),
        ("a", "1.0.0", &[]),
        ("a", "2.0.0", &[]),
        ("a", "3.0.0", &[]),
    ]);
    let installed: InstalledIndex = [installed_package("a", "1.0.0", true, &[])]
        .into_iter()
        .collect();

    let plan = resolve(
        &[
            Requirement::parse("a").expect("spec"),
            Requirement::parse("b").expect("spec"),
        ],
        &installed,
        &AliasTable::new(),
        &ResolveOptions::default(),
        loader(&map),
    )
    .expect("must resolve");

    assert_eq!(uninstalls(&plan), vec![("a".to_string(), "1.0.0".to_string())]);
    assert_eq!(
        installs(&plan),
        vec![
            ("a".to_string(), "2.0.0".to_string()),
            ("b".to_string(), "1.0.0".to_string()),
        ]
    );
}

#[test]
fn eager_upgrades_satisfied_dependency() {
    let map = available(&[
        ("require-simple", "1.0.0", &[("simple", ">=1")]),
        ("simple", "2.0.0", &[]),
        ("simple", "3.0.0", &[]),
    ]);
    let installed: InstalledIndex = [installed_package("simple", "2.0.0", true, &[])]
        .into_iter()
        .collect();

    let plan = resolve(
        &[Requirement::parse("require-simple").expect("spec")],
        &installed,
        &AliasTable::new(),
        &ResolveOptions {
            upgrade: true,
            strategy: UpgradeStrategy::Eager,
            ..ResolveOptions::default()
        },
        loader(&map),
    )
    .expect("must resolve");

    assert_eq!(
        uninstalls(&plan),
        vec![("simple".to_string(), "2.0.0".to_string())]
    );
    assert_eq!(
        installs(&plan),
        vec![
            ("simple".to_string(), "3.0.0".to_string()),
            ("require-simple".to_string(), "1.0.0".to_string()),
        ]
    );
}

#[test]
fn eager_skips_dependency_already_at_newest() {
    let map = available(&[
        ("require-simple", "1.0.0", &[("simple", ">=1")]),
        ("simple", "3.0.0", &[]),
    ]);
    let installed: InstalledIndex = [installed_package("simple", "3.0.0", true, &[])]
        .into_iter()
        .collect();

    let plan = resolve(
        &[Requirement::parse("require-simple").expect("spec")],
        &installed,
        &AliasTable::new(),
        &ResolveOptions {
            upgrade: true,
            strategy: UpgradeStrategy::Eager,
            ..ResolveOptions::default()
        },
        loader(&map),
    )
    .expect("must resolve");

    assert!(uninstalls(&plan).is_empty());
    assert_eq!(
        installs(&plan),
        vec![("require-simple".to_string(), "1.0.0".to_string())]
    );
}

#[test]
fn force_reinstall_reinstalls_equal_version() {
    let map = available(&[("initools", "0.3.0", &[])]);
    let installed: InstalledIndex = [installed_package("initools", "0.3.0", true, &[])]
        .into_iter()
        .collect();

    let plan = resolve(
        &[Requirement::parse("initools").expect("spec")],
        &installed,
        &AliasTable::new(),
        &ResolveOptions {
            upgrade: true,
            force_reinstall: true,
            ..ResolveOptions::default()
        },
        loader(&map),
    )
    .expect("must resolve");

    assert_eq!(
        uninstalls(&plan),
        vec![("initools".to_string(), "0.3.0".to_string())]
    );
    assert_eq!(
        installs(&plan),
        vec![("initools".to_string(), "0.3.0".to_string())]
    );
}

#[test]
fn ignore_installed_plans_install_without_uninstall() {
    let map = available(&[("initools", "0.1.0", &[]), ("initools", "0.3.0", &[])]);
    let installed: InstalledIndex = [installed_package("initools", "0.1.0", true, &[])]
        .into_iter()
        .collect();

    let plan = resolve(
        &[Requirement::parse("initools@=0.3.0").expect("spec")],
        &installed,
        &AliasTable::new(),
        &ResolveOptions {
            ignore_installed: true,
            ..ResolveOptions::default()
        },
        loader(&map),
    )
    .expect("must resolve");

    assert!(uninstalls(&plan).is_empty());
    assert_eq!(
        installs(&plan),
        vec![("initools".to_string(), "0.3.0".to_string())]
    );
}

#[test]
fn ignore_installed_reinstalls_equal_version_without_uninstall() {
    let map = available(&[("initools", "0.1.0", &[])]);
    let installed: InstalledIndex = [installed_package("initools", "0.1.0", true, &[])]
        .into_iter()
        .collect();

    let plan = resolve(
        &[Requirement::parse("initools").expect("spec")],
        &installed,
        &AliasTable::new(),
        &ResolveOptions {
            ignore_installed: true,
            ..ResolveOptions::default()
        },
        loader(&map),
    )
    .expect("must resolve");

    assert!(uninstalls(&plan).is_empty());
    assert_eq!(
        installs(&plan),
        vec![("initools".to_string(), "0.1.0".to_string())]
    );
}

#[test]
fn same_version_from_different_locator_is_already_satisfied() {
    let map = available(&[("tool", "1.0.0", &[])]);
    let mut from_index = installed_package("tool", "1.0.0", true, &[]);
    from_index.source = SourceLocator::Index;
    let installed: InstalledIndex = [from_index].into_iter().collect();

    let plan = resolve(
        &[Requirement::parse("git+https://example.test/tool.git#tool@v1.0.0").expect("spec")],
        &installed,
        &AliasTable::new(),
        &ResolveOptions::default(),
        loader(&map),
    )
    .expect("must resolve");

    assert!(plan.is_noop(), "{plan:?}");
}

#[test]
fn conflicting_root_requirements_fail_with_version_conflict() {
    let map = available(&[("tool", "1.0.0", &[]), ("tool", "2.0.0", &[])]);

    let err = resolve(
        &[
            Requirement::parse("tool@=1.0.0").expect("spec"),
            Requirement::parse("tool@=2.0.0").expect("spec"),
        ],
        &InstalledIndex::new(),
        &AliasTable::new(),
        &ResolveOptions::default(),
        loader(&map),
    )
    .expect_err("must conflict");

    assert!(matches!(
        err,
        ResolveError::VersionConflict { name: ref conflicted, .. } if *conflicted == name("tool")
    ));
}

#[test]
fn conflicting_transitive_requirements_fail_with_version_conflict() {
    let map = available(&[
        ("left", "1.0.0", &[("shared", "^1")]),
        ("right", "1.0.0", &[("shared", "^2")]),
        ("shared", "1.0.0", &[]),
        ("shared", "2.0.0", &[]),
    ]);

    let err = resolve(
        &[
            Requirement::parse("left").expect("spec"),
            Requirement::parse("right").expect("spec"),
        ],
        &InstalledIndex::new(),
        &AliasTable::new(),
        &ResolveOptions::default(),
        loader(&map),
    )
    .expect_err("must conflict");

    assert!(matches!(err, ResolveError::VersionConflict { .. }), "{err}");
}

#[test]
fn unknown_package_fails_with_not_found() {
    let map = available(&[]);
    let err = resolve(
        &[Requirement::parse("ghost").expect("spec")],
        &InstalledIndex::new(),
        &AliasTable::new(),
        &ResolveOptions::default(),
        loader(&map),
    )
    .expect_err("must fail");

    assert!(matches!(
        err,
        ResolveError::NotFound { name: ref missing } if *missing == name("ghost")
    ));
}

#[test]
fn dependency_cycle_is_reported() {
    let map = available(&[
        ("ping", "1.0.0", &[("pong", "^1")]),
        ("pong", "1.0.0", &[("ping", "^1")]),
    ]);

    let err = resolve(
        &[Requirement::parse("ping").expect("spec")],
        &InstalledIndex::new(),
        &AliasTable::new(),
        &ResolveOptions::default(),
        loader(&map),
    )
    .expect_err("must fail");

    assert!(matches!(err, ResolveError::Cycle { .. }), "{err}");
}

#[test]
fn each_package_appears_at_most_once_per_action() {
    let map = available(&[
        ("app", "1.0.0", &[("shared", "^1"), ("lib", "^1")]),
        ("lib", "1.0.0", &[("shared", "^1")]),
        ("shared", "1.1.0", &[]),
        ("shared", "1.0.0", &[]),
    ]);

    let plan = resolve(
        &[Requirement::parse("app").expect("spec")],
        &InstalledIndex::new(),
        &AliasTable::new(),
        &ResolveOptions::default(),
        loader(&map),
    )
    .expect("must resolve");

    let mut seen = std::collections::BTreeSet::new();
    for manifest in plan.installs() {
        assert!(seen.insert(manifest.name.clone()), "duplicate install");
    }
}

#[test]
fn resolving_twice_is_idempotent() {
    let map = available(&[
        ("app", "1.0.0", &[("lib", "^1")]),
        ("lib", "1.2.0", &[]),
    ]);

    let roots = [Requirement::parse("app").expect("spec")];
    let first = resolve(
        &roots,
        &InstalledIndex::new(),
        &AliasTable::new(),
        &ResolveOptions::default(),
        loader(&map),
    )
    .expect("must resolve");
    assert_eq!(installs(&first).len(), 2);

    // Pretend the first plan was applied.
    let installed: InstalledIndex = [
        installed_package("app", "1.0.0", true, &["lib"]),
        installed_package("lib", "1.2.0", false, &[]),
    ]
    .into_iter()
    .collect();

    let second = resolve(
        &roots,
        &installed,
        &AliasTable::new(),
        &ResolveOptions::default(),
        loader(&map),
    )
    .expect("must resolve");
    assert!(second.is_noop(), "{second:?}");
}

#[test]
fn legacy_alias_resolves_replacement_package() {
    let map = available(&[
        ("modern-tool", "1.0.0", &[]),
        ("legacy-tool", "0.7.0", &[]),
    ]);
    let mut aliases = AliasTable::new();
    aliases.insert(
        name("legacy-tool"),
        AliasEntry {
            canonical: name("legacy-tool"),
            replacement: Some(name("modern-tool")),
        },
    );

    let plan = resolve(
        &[Requirement::parse("legacy-tool").expect("spec")],
        &InstalledIndex::new(),
        &aliases,
        &ResolveOptions {
            upgrade: true,
            ..ResolveOptions::default()
        },
        loader(&map),
    )
    .expect("must resolve");

    assert_eq!(
        installs(&plan),
        vec![("modern-tool".to_string(), "1.0.0".to_string())]
    );
}

#[test]
fn uninstall_plans_requested_removal() {
    let installed: InstalledIndex = [installed_package("tool", "1.0.0", true, &[])]
        .into_iter()
        .collect();

    let plan = plan_uninstall(&installed, &[name("tool")], true).expect("must plan");
    assert_eq!(uninstalls(&plan), vec![("tool".to_string(), "1.0.0".to_string())]);
}

#[test]
fn uninstall_of_missing_package_is_a_skip() {
    let plan = plan_uninstall(&InstalledIndex::new(), &[name("ghost")], false).expect("must plan");
    assert!(matches!(
        plan.entries(),
        [PlanEntry::Skip {
            reason: PlanReason::NotInstalled,
            ..
        }]
    ));
}

#[test]
fn uninstall_is_blocked_by_requested_dependents() {
    let installed: InstalledIndex = [
        installed_package("app", "1.0.0", true, &["lib"]),
        installed_package("lib", "1.0.0", false, &[]),
    ]
    .into_iter()
    .collect();

    let err = plan_uninstall(&installed, &[name("lib")], false).expect_err("must block");
    assert!(matches!(
        err,
        ResolveError::BlockedByDependents { ref dependents, .. } if dependents == &["app".to_string()]
    ));
}

#[test]
fn uninstall_prunes_unreferenced_dependencies_dependents_first() {
    let installed: InstalledIndex = [
        installed_package("app", "1.0.0", true, &["lib"]),
        installed_package("lib", "1.0.0", false, &["zlib"]),
        installed_package("zlib", "2.0.0", false, &[]),
        installed_package("other", "1.0.0", true, &[]),
    ]
    .into_iter()
    .collect();

    let plan = plan_uninstall(&installed, &[name("app")], true).expect("must plan");
    assert_eq!(
        uninstalls(&plan),
        vec![
            ("app".to_string(), "1.0.0".to_string()),
            ("lib".to_string(), "1.0.0".to_string()),
            ("zlib".to_string(), "2.0.0".to_string()),
        ]
    );
}

#[test]
fn uninstall_keeps_dependencies_still_reachable_from_other_roots() {
    let installed: InstalledIndex = [
        installed_package("app", "1.0.0", true, &["shared"]),
        installed_package("other", "1.0.0", true, &["shared"]),
        installed_package("shared", "1.0.0", false, &[]),
    ]
    .into_iter()
    .collect();

    let plan = plan_uninstall(&installed, &[name("app")], true).expect("must plan");
    assert_eq!(uninstalls(&plan), vec![("app".to_string(), "1.0.0".to_string())]);
}
