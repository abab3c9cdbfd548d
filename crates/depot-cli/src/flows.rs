use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use depot_core::{
    parse_requirements_file, PackageManifest, PackageName, Requirement, SourceLocator,
};
use depot_installer::{
    execute_plan, latest_rollback_candidate_txid, read_active_transaction, read_install_receipts,
    read_installed_index, read_transaction_metadata, rollback_transaction, ExecutionResult,
    PrefixLayout,
};
use depot_registry::{
    checkout_vcs_source, fetch_url_tree, read_tree_manifest, ArtifactFetcher, FetchOutcome,
    MetadataBackend, RegistryIndex,
};
use depot_resolver::{
    plan_uninstall, resolve, InstallPlan, PlanEntry, PlanReason, ResolveOptions, UpgradeStrategy,
};

use crate::render::{current_output_style, download_progress, render_status_line, OutputStyle};

#[derive(Debug, Clone)]
pub struct InstallArgs {
    pub specs: Vec<String>,
    pub requirement_files: Vec<PathBuf>,
    pub upgrade: bool,
    pub upgrade_strategy: String,
    pub force_reinstall: bool,
    pub ignore_installed: bool,
    pub no_index: bool,
    pub find_links: Vec<PathBuf>,
    pub dry_run: bool,
    pub force_redownload: bool,
}

pub fn run_install_command(
    layout: &PrefixLayout,
    registry_root: Option<&Path>,
    args: &InstallArgs,
) -> Result<Vec<String>> {
    // Strategy validation happens before any other work: a bad token must
    // never reach resolution, let alone the filesystem.
    let strategy = UpgradeStrategy::parse(&args.upgrade_strategy)?;

    let mut requirements = Vec::new();
    for spec in &args.specs {
        requirements.push(Requirement::parse(spec)?);
    }
    for file in &args.requirement_files {
        let content = fs::read_to_string(file)
            .with_context(|| format!("failed to read requirements file: {}", file.display()))?;
        requirements.extend(
            parse_requirements_file(&content)
                .with_context(|| format!("in requirements file: {}", file.display()))?,
        );
    }
    if requirements.is_empty() {
        bail!("nothing to install: pass a requirement spec or --requirement file");
    }

    layout.ensure_base_dirs()?;
    let backend = select_metadata_backend(registry_root, args.no_index, &args.find_links);
    let aliases = backend.load_aliases()?;
    let installed = read_installed_index(layout)?;

    let options = ResolveOptions {
        upgrade: args.upgrade,
        strategy,
        force_reinstall: args.force_reinstall,
        ignore_installed: args.ignore_installed,
    };

    // Roots pinned to a URL or VCS locator resolve against their own probed
    // metadata instead of the registry.
    let mut pinned: BTreeMap<PackageName, SourceLocator> = BTreeMap::new();
    for requirement in &requirements {
        if !matches!(requirement.locator, SourceLocator::Index) {
            pinned.insert(aliases.rewrite(&requirement.name), requirement.locator.clone());
        }
    }

    let plan = resolve(&requirements, &installed, &aliases, &options, |name| {
        load_candidates(layout, &backend, &pinned, name)
    })?;

    let mut lines = Vec::new();
    for entry in plan.skips() {
        lines.push(skip_line(entry, args.upgrade));
    }

    if args.dry_run {
        lines.extend(render_plan_preview(&plan));
        return Ok(lines);
    }

    let fetcher = ArtifactFetcher::new(layout.artifacts_cache_dir())
        .with_force_redownload(args.force_redownload);
    let output_style = current_output_style();
    let result = execute_plan(layout, &plan, "install", |manifest| {
        obtain_source_tree(layout, &backend, &pinned, &fetcher, output_style, manifest)
    })?;

    lines.extend(summarize_execution(&result));
    Ok(lines)
}

pub fn run_uninstall_command(
    layout: &PrefixLayout,
    names: &[String],
    prune: bool,
) -> Result<Vec<String>> {
    if names.is_empty() {
        bail!("nothing to uninstall: pass at least one package name");
    }
    let parsed: Vec<PackageName> = names
        .iter()
        .map(|raw| PackageName::new(raw))
        .collect::<Result<_>>()?;

    layout.ensure_base_dirs()?;
    let installed = read_installed_index(layout)?;
    let plan = plan_uninstall(&installed, &parsed, prune)?;

    let mut lines = Vec::new();
    for entry in plan.skips() {
        lines.push(skip_line(entry, false));
    }

    let result = execute_plan(layout, &plan, "uninstall", |manifest| {
        Err(anyhow!(
            "uninstall plans never install packages, cannot fetch '{}'",
            manifest.name
        ))
    })?;

    lines.extend(summarize_execution(&result));
    Ok(lines)
}

pub fn run_list_command(layout: &PrefixLayout) -> Result<Vec<String>> {
    let receipts = read_install_receipts(layout)?;
    if receipts.is_empty() {
        return Ok(vec!["No installed packages".to_string()]);
    }
    Ok(receipts
        .iter()
        .map(|receipt| format!("{} {}", receipt.name, receipt.version))
        .collect())
}

pub fn run_search_command(registry_root: Option<&Path>, query: &str) -> Result<Vec<String>> {
    let backend = select_metadata_backend(registry_root, false, &[]);
    let names = backend.search_names(query)?;
    if names.is_empty() {
        return Ok(vec![format!("No packages matching: {query}")]);
    }
    Ok(names)
}

pub fn run_info_command(registry_root: Option<&Path>, raw_name: &str) -> Result<Vec<String>> {
    let name = PackageName::new(raw_name)?;
    let backend = select_metadata_backend(registry_root, false, &[]);
    let versions = backend.candidates(&name)?;
    if versions.is_empty() {
        return Ok(vec![format!("No package found: {name}")]);
    }

    let mut lines = vec![format!("Package: {name}")];
    for manifest in &versions {
        let mut line = format!("- {}", manifest.version);
        if !manifest.dependencies.is_empty() {
            let deps = manifest
                .dependencies
                .iter()
                .map(|(dep, req)| format!("{dep}({req})"))
                .collect::<Vec<_>>();
            line.push_str(&format!("  requires {}", deps.join(", ")));
        }
        lines.push(line);
    }
    Ok(lines)
}

pub fn run_rollback_command(layout: &PrefixLayout, txid: Option<String>) -> Result<Vec<String>> {
    layout.ensure_base_dirs()?;
    let target = match txid {
        Some(txid) => {
            if !is_valid_txid(&txid) {
                bail!("invalid rollback txid: {txid}");
            }
            txid
        }
        None => match latest_rollback_candidate_txid(layout)? {
            Some(txid) => txid,
            None => return Ok(vec!["no rollback needed".to_string()]),
        },
    };

    let outcome = rollback_transaction(layout, &target)?;
    let mut lines = vec![format!("rolled back {target}")];
    for name in &outcome.restored {
        lines.push(format!("restored {name}"));
    }
    Ok(lines)
}

pub fn run_doctor_command(layout: &PrefixLayout) -> Result<Vec<String>> {
    let mut lines = vec![
        format!("prefix: {}", layout.prefix().display()),
        format!("packages: {}", layout.pkgs_dir().display()),
        format!("cache: {}", layout.cache_dir().display()),
        format!("state: {}", layout.state_dir().display()),
    ];
    lines.push(transaction_health_line(layout)?);
    Ok(lines)
}

fn transaction_health_line(layout: &PrefixLayout) -> Result<String> {
    let Some(txid) = read_active_transaction(layout).unwrap_or(None) else {
        return Ok("transactions: clean".to_string());
    };
    match read_transaction_metadata(layout, &txid)? {
        Some(metadata) => Ok(format!(
            "transactions: {txid} is {} (run `depot rollback {txid}` to recover)",
            metadata.status
        )),
        None => Ok(format!(
            "transactions: active marker names {txid} but its metadata is missing"
        )),
    }
}

fn is_valid_txid(txid: &str) -> bool {
    !txid.is_empty()
        && txid
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
}

fn select_metadata_backend(
    registry_root: Option<&Path>,
    no_index: bool,
    find_links: &[PathBuf],
) -> MetadataBackend {
    let index = if no_index {
        None
    } else {
        registry_root.map(RegistryIndex::open)
    };
    MetadataBackend::new(index, find_links.to_vec())
}

fn load_candidates(
    layout: &PrefixLayout,
    backend: &MetadataBackend,
    pinned: &BTreeMap<PackageName, SourceLocator>,
    name: &PackageName,
) -> Result<Vec<PackageManifest>> {
    if let Some(locator) = pinned.get(name) {
        let tree = locator_tree(layout, locator)?;
        let manifest = read_tree_manifest(&tree)?;
        if manifest.name != *name {
            bail!(
                "source {} declares package '{}', expected '{}'",
                locator.describe(),
                manifest.name,
                name
            );
        }
        return Ok(vec![manifest]);
    }
    backend.candidates(name)
}

fn locator_tree(layout: &PrefixLayout, locator: &SourceLocator) -> Result<PathBuf> {
    match locator {
        SourceLocator::Vcs { url, rev } => {
            Ok(checkout_vcs_source(&layout.vcs_cache_dir(), url, rev)?)
        }
        SourceLocator::Url(url) => Ok(fetch_url_tree(
            &layout.artifacts_cache_dir().join("url"),
            url,
        )?),
        SourceLocator::Index | SourceLocator::FindLinks => {
            bail!("locator {} does not pin a source tree", locator.describe())
        }
    }
}

fn obtain_source_tree(
    layout: &PrefixLayout,
    backend: &MetadataBackend,
    pinned: &BTreeMap<PackageName, SourceLocator>,
    fetcher: &ArtifactFetcher,
    output_style: OutputStyle,
    manifest: &PackageManifest,
) -> Result<(PathBuf, SourceLocator)> {
    if let Some(locator) = pinned.get(&manifest.name) {
        return Ok((locator_tree(layout, locator)?, locator.clone()));
    }
    if let Some(tree) = backend.find_links_tree(&manifest.name, &manifest.version)? {
        return Ok((tree, SourceLocator::FindLinks));
    }

    let label = format!("{}-{}", manifest.name, manifest.version);
    let progress_bar = download_progress(output_style, &label);
    let (tree, outcome) = fetcher.obtain_with_progress(manifest, &mut |done, total| {
        if let Some(bar) = &progress_bar {
            if let Some(total) = total {
                bar.set_length(total);
            }
            bar.set_position(done);
        }
    })?;
    if let Some(bar) = &progress_bar {
        bar.finish_and_clear();
    }
    if outcome == FetchOutcome::Downloaded {
        println!(
            "{}",
            render_status_line(output_style, "fetch", &format!("downloaded {label}"))
        );
    }
    Ok((tree, SourceLocator::Index))
}

fn skip_line(entry: &PlanEntry, upgrade: bool) -> String {
    match entry.reason() {
        PlanReason::AlreadyUpToDate => {
            format!("Requirement already up-to-date: {}", entry.name())
        }
        PlanReason::AlreadySatisfied if upgrade => {
            format!(
                "Requirement already satisfied, skipping upgrade: {}",
                entry.name()
            )
        }
        PlanReason::AlreadySatisfied => {
            format!("Requirement already satisfied: {}", entry.name())
        }
        PlanReason::NotInstalled => format!("Skipping {}: not installed", entry.name()),
        other => format!("Skipping {}: {other}", entry.name()),
    }
}

fn render_plan_preview(plan: &InstallPlan) -> Vec<String> {
    let mut lines = vec!["Would apply:".to_string()];
    for entry in plan.entries() {
        match entry {
            PlanEntry::Install { manifest, reason } => lines.push(format!(
                "  install {}-{} ({reason})",
                manifest.name, manifest.version
            )),
            PlanEntry::Uninstall {
                name,
                version,
                reason,
            } => lines.push(format!("  uninstall {name}-{version} ({reason})")),
            PlanEntry::Skip { .. } => {}
        }
    }
    if plan.is_noop() {
        lines.push("  nothing to do".to_string());
    }
    lines
}

fn summarize_execution(result: &ExecutionResult) -> Vec<String> {
    let mut lines = Vec::new();
    for (name, version) in &result.uninstalled {
        lines.push(format!("Uninstalled {name}-{version}"));
    }
    for (name, version) in &result.installed {
        lines.push(format!("Installed {name}-{version}"));
    }
    if result.txid.is_some() {
        lines.push(format!(
            "{} files created, {} deleted, {} updated",
            result.files_created.len(),
            result.files_deleted.len(),
            result.files_updated.len()
        ));
    }
    lines
}
