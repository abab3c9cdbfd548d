use std::fs;
use std::path::PathBuf;

use depot_core::{PackageManifest, PackageName};
use semver::Version;

use crate::{
    read_tree_manifest, ArtifactFetcher, FetchOutcome, MetadataBackend, RegistryError,
    RegistryIndex,
};
use crate::checksum::{sha256_hex_file, verify_sha256_file};

fn test_root(tag: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    path.push(format!(
        "depot-registry-tests-{tag}-{}-{}",
        std::process::id(),
        nanos
    ));
    fs::create_dir_all(&path).expect("must create test root");
    path
}

fn name(raw: &str) -> PackageName {
    PackageName::new(raw).expect("name must parse")
}

fn write_index_manifest(root: &PathBuf, pkg: &str, version: &str) {
    let dir = root.join("index").join(pkg);
    fs::create_dir_all(&dir).expect("must create index dir");
    fs::write(
        dir.join(format!("{version}.toml")),
        format!(
            "name = \"{pkg}\"\nversion = \"{version}\"\n\n[[artifacts]]\nurl = \"https://example.test/{pkg}-{version}.tar.gz\"\nsha256 = \"abc\"\n"
        ),
    )
    .expect("must write manifest");
}

fn write_find_links_tree(dir: &PathBuf, pkg: &str, version: &str) -> PathBuf {
    let tree = dir.join(format!("{pkg}-{version}"));
    fs::create_dir_all(&tree).expect("must create tree");
    fs::write(
        tree.join("depot.toml"),
        format!("name = \"{pkg}\"\nversion = \"{version}\"\n"),
    )
    .expect("must write tree manifest");
    tree
}

#[test]
fn index_lists_versions_newest_first() {
    let root = test_root("index");
    write_index_manifest(&root, "tool", "1.0.0");
    write_index_manifest(&root, "tool", "1.2.0");

    let index = RegistryIndex::open(&root);
    let versions = index
        .package_versions(&name("tool"))
        .expect("must read versions");
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].version, Version::new(1, 2, 0));
    assert_eq!(versions[1].version, Version::new(1, 0, 0));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn index_returns_empty_for_unknown_package() {
    let root = test_root("unknown");
    let index = RegistryIndex::open(&root);
    assert!(index
        .package_versions(&name("ghost"))
        .expect("must read")
        .is_empty());
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn index_search_matches_substring() {
    let root = test_root("search");
    write_index_manifest(&root, "ripgrep", "14.0.0");
    write_index_manifest(&root, "grep-lite", "1.0.0");
    write_index_manifest(&root, "unrelated", "1.0.0");

    let index = RegistryIndex::open(&root);
    let names = index.search_names("grep").expect("must search");
    assert_eq!(names, vec!["grep-lite".to_string(), "ripgrep".to_string()]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn index_loads_alias_table_when_present() {
    let root = test_root("aliases");
    fs::write(
        root.join("aliases.toml"),
        "[entries.legacy-tool]\ncanonical = \"legacy-tool\"\nreplacement = \"modern-tool\"\n",
    )
    .expect("must write aliases");

    let index = RegistryIndex::open(&root);
    let aliases = index.load_aliases().expect("must load aliases");
    assert_eq!(aliases.rewrite(&name("legacy-tool")), name("modern-tool"));

    let missing = RegistryIndex::open(root.join("nope"));
    assert!(missing.load_aliases().expect("must default").is_empty());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn probe_reads_tree_manifest() {
    let links = test_root("probe");
    let tree = write_find_links_tree(&links, "local-tool", "0.3.0");
    let manifest = read_tree_manifest(&tree).expect("must probe");
    assert_eq!(manifest.name, name("local-tool"));
    assert_eq!(manifest.version, Version::new(0, 3, 0));

    let _ = fs::remove_dir_all(&links);
}

#[test]
fn probe_without_manifest_is_a_build_error() {
    let links = test_root("probe-missing");
    let tree = links.join("empty");
    fs::create_dir_all(&tree).expect("must create tree");
    let err = read_tree_manifest(&tree).expect_err("must fail");
    assert!(matches!(err, RegistryError::Build { .. }), "{err}");

    let _ = fs::remove_dir_all(&links);
}

#[test]
fn backend_merges_find_links_over_index() {
    let root = test_root("backend-index");
    let links = test_root("backend-links");
    write_index_manifest(&root, "tool", "1.0.0");
    write_index_manifest(&root, "tool", "1.1.0");
    write_find_links_tree(&links, "tool", "1.1.0");
    write_find_links_tree(&links, "tool", "2.0.0");

    let backend = MetadataBackend::new(Some(RegistryIndex::open(&root)), vec![links.clone()]);
    let candidates = backend.candidates(&name("tool")).expect("must load");
    let versions: Vec<String> = candidates
        .iter()
        .map(|manifest| manifest.version.to_string())
        .collect();
    assert_eq!(versions, vec!["2.0.0", "1.1.0", "1.0.0"]);
    // the 1.1.0 release comes from find-links, not the index
    let shadowed = candidates
        .iter()
        .find(|manifest| manifest.version == Version::new(1, 1, 0))
        .expect("must contain 1.1.0");
    assert!(shadowed.artifacts.is_empty());

    let _ = fs::remove_dir_all(&root);
    let _ = fs::remove_dir_all(&links);
}

#[test]
fn backend_without_index_uses_only_find_links() {
    let links = test_root("no-index");
    write_find_links_tree(&links, "tool", "1.0.0");

    let backend = MetadataBackend::new(None, vec![links.clone()]);
    let candidates = backend.candidates(&name("tool")).expect("must load");
    assert_eq!(candidates.len(), 1);

    let tree = backend
        .find_links_tree(&name("tool"), &Version::new(1, 0, 0))
        .expect("must scan");
    assert!(tree.is_some());
    assert!(backend
        .find_links_tree(&name("tool"), &Version::new(9, 0, 0))
        .expect("must scan")
        .is_none());

    let _ = fs::remove_dir_all(&links);
}

#[test]
fn checksum_detects_content_changes() {
    let root = test_root("checksum");
    let path = root.join("data.bin");
    fs::write(&path, b"hello world").expect("must write");

    let digest = sha256_hex_file(&path).expect("must hash");
    assert_eq!(
        digest,
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
    assert!(verify_sha256_file(&path, &digest.to_uppercase()).expect("must verify"));
    assert!(!verify_sha256_file(&path, "deadbeef").expect("must verify"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn fetcher_rejects_checksum_mismatch() {
    let root = test_root("fetch-bad");
    let artifact_path = root.join("tool-1.0.0.tar.gz");
    fs::write(&artifact_path, b"not a real archive").expect("must write");

    let manifest = PackageManifest::from_toml_str(&format!(
        "name = \"tool\"\nversion = \"1.0.0\"\n\n[[artifacts]]\nurl = \"file://{}\"\nsha256 = \"0000000000000000000000000000000000000000000000000000000000000000\"\n",
        artifact_path.display()
    ))
    .expect("manifest must parse");

    let fetcher = ArtifactFetcher::new(root.join("cache"));
    let err = fetcher.obtain(&manifest).expect_err("must reject");
    assert!(matches!(err, RegistryError::ChecksumMismatch { .. }), "{err}");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn fetcher_reuses_cached_tree_per_exact_version() {
    let root = test_root("fetch-cache");
    let cache = root.join("cache");

    // a previously unpacked 0.2.0 tree sits in the cache
    let cached_tree = cache.join("initools").join("0.2.0").join("tree");
    fs::create_dir_all(&cached_tree).expect("must create cached tree");
    fs::write(cached_tree.join("m.txt"), "0.2").expect("must write");

    let cached = PackageManifest::from_toml_str(
        "name = \"initools\"\nversion = \"0.2.0\"\n\n[[artifacts]]\nurl = \"https://example.invalid/initools-0.2.0.tar.gz\"\nsha256 = \"abc\"\n",
    )
    .expect("manifest must parse");
    let fetcher = ArtifactFetcher::new(&cache);
    let (tree, outcome) = fetcher.obtain(&cached).expect("cache hit must not download");
    assert_eq!(outcome, FetchOutcome::CacheHit);
    assert_eq!(tree, cached_tree);

    // a different requested version must never reuse that tree
    let other = PackageManifest::from_toml_str(
        "name = \"initools\"\nversion = \"0.1.0\"\n\n[[artifacts]]\nurl = \"file:///nonexistent/initools-0.1.0.tar.gz\"\nsha256 = \"abc\"\n",
    )
    .expect("manifest must parse");
    let err = fetcher
        .obtain(&other)
        .expect_err("different version must miss the cache");
    assert!(matches!(err, RegistryError::Fetch { .. }), "{err}");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn fetcher_requires_an_artifact() {
    let manifest =
        PackageManifest::from_toml_str("name = \"tool\"\nversion = \"1.0.0\"\n").expect("manifest");
    let root = test_root("fetch-none");
    let fetcher = ArtifactFetcher::new(root.join("cache"));
    let err = fetcher.obtain(&manifest).expect_err("must fail");
    assert!(matches!(err, RegistryError::NoArtifact { .. }), "{err}");
    let _ = fs::remove_dir_all(&root);
}
