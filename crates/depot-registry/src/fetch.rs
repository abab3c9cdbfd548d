use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use depot_core::{ArchiveType, PackageManifest};

use crate::checksum::sha256_hex_file;
use crate::error::RegistryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    CacheHit,
    Downloaded,
}

impl FetchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CacheHit => "cache-hit",
            Self::Downloaded => "downloaded",
        }
    }
}

/// Downloads, verifies and unpacks registry artifacts into a cache keyed by
/// package name and version, so a cached tree can never satisfy a request for
/// a different version of the same package.
#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    cache_root: PathBuf,
    force_redownload: bool,
}

impl ArtifactFetcher {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            force_redownload: false,
        }
    }

    pub fn with_force_redownload(mut self, force_redownload: bool) -> Self {
        self.force_redownload = force_redownload;
        self
    }

    fn package_cache_dir(&self, manifest: &PackageManifest) -> PathBuf {
        self.cache_root
            .join(manifest.name.as_str())
            .join(manifest.version.to_string())
    }

    pub fn obtain(&self, manifest: &PackageManifest) -> Result<(PathBuf, FetchOutcome), RegistryError> {
        self.obtain_with_progress(manifest, &mut |_done, _total| {})
    }

    /// Returns the unpacked source tree for one release. `progress` receives
    /// `(bytes_done, total_bytes)` while a download is running.
    pub fn obtain_with_progress(
        &self,
        manifest: &PackageManifest,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<(PathBuf, FetchOutcome), RegistryError> {
        let artifact = manifest.artifact().ok_or_else(|| RegistryError::NoArtifact {
            name: manifest.name.to_string(),
        })?;
        let archive_type = artifact.archive_type()?;

        let cache_dir = self.package_cache_dir(manifest);
        let tree_dir = cache_dir.join("tree");
        if tree_dir.is_dir() && !self.force_redownload {
            return Ok((tree_dir, FetchOutcome::CacheHit));
        }

        fs::create_dir_all(&cache_dir).map_err(|err| RegistryError::Fetch {
            url: artifact.url.clone(),
            reason: format!("failed creating cache dir {}: {err}", cache_dir.display()),
        })?;

        let archive_path = cache_dir.join(format!("artifact.{}", archive_type.cache_extension()));
        if !archive_path.exists() || self.force_redownload {
            download(&artifact.url, &archive_path, progress)?;
        }

        let actual = sha256_hex_file(&archive_path)?;
        if !actual.eq_ignore_ascii_case(artifact.sha256.trim()) {
            let _ = fs::remove_file(&archive_path);
            return Err(RegistryError::ChecksumMismatch {
                url: artifact.url.clone(),
                expected: artifact.sha256.clone(),
                actual,
            });
        }

        if tree_dir.exists() {
            fs::remove_dir_all(&tree_dir).map_err(|err| RegistryError::Fetch {
                url: artifact.url.clone(),
                reason: format!("failed clearing cache tree {}: {err}", tree_dir.display()),
            })?;
        }
        fs::create_dir_all(&tree_dir).map_err(|err| RegistryError::Fetch {
            url: artifact.url.clone(),
            reason: format!("failed creating cache tree {}: {err}", tree_dir.display()),
        })?;
        if let Err(err) = extract_archive(&archive_path, &tree_dir, archive_type) {
            let _ = fs::remove_dir_all(&tree_dir);
            return Err(RegistryError::Fetch {
                url: artifact.url.clone(),
                reason: format!("{err:#}"),
            });
        }

        Ok((tree_dir, FetchOutcome::Downloaded))
    }
}

/// Fetches and unpacks a direct-URL requirement. The cache key is the URL
/// itself, so a re-run reuses the unpacked tree. No declared checksum exists
/// for ad-hoc URLs; the receipt records the locator instead.
pub fn fetch_url_tree(cache_root: &Path, url: &str) -> Result<PathBuf, RegistryError> {
    let archive_type =
        ArchiveType::infer_from_url(url).ok_or_else(|| RegistryError::Fetch {
            url: url.to_string(),
            reason: "could not infer archive type from URL".to_string(),
        })?;

    let key = crate::checksum::sha256_hex(url.as_bytes());
    let cache_dir = cache_root.join(&key[..16]);
    let tree_dir = cache_dir.join("tree");
    if tree_dir.is_dir() {
        return Ok(tree_dir);
    }

    fs::create_dir_all(&cache_dir).map_err(|err| RegistryError::Fetch {
        url: url.to_string(),
        reason: format!("failed creating cache dir {}: {err}", cache_dir.display()),
    })?;
    let archive_path = cache_dir.join(format!("artifact.{}", archive_type.cache_extension()));
    download(url, &archive_path, &mut |_done, _total| {})?;

    fs::create_dir_all(&tree_dir).map_err(|err| RegistryError::Fetch {
        url: url.to_string(),
        reason: format!("failed creating cache tree {}: {err}", tree_dir.display()),
    })?;
    if let Err(err) = extract_archive(&archive_path, &tree_dir, archive_type) {
        let _ = fs::remove_dir_all(&tree_dir);
        return Err(RegistryError::Fetch {
            url: url.to_string(),
            reason: format!("{err:#}"),
        });
    }
    Ok(tree_dir)
}

fn download(
    url: &str,
    dest: &Path,
    progress: &mut dyn FnMut(u64, Option<u64>),
) -> Result<(), RegistryError> {
    let part_path = dest.with_file_name(format!(
        "{}.part",
        dest.file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("artifact")
    ));

    let result = if let Some(local) = url.strip_prefix("file://") {
        fs::copy(local, &part_path)
            .map(|_| ())
            .map_err(|err| RegistryError::Fetch {
                url: url.to_string(),
                reason: format!("failed copying local artifact: {err}"),
            })
    } else {
        download_http(url, &part_path, progress)
    };

    if let Err(err) = result {
        let _ = fs::remove_file(&part_path);
        return Err(err);
    }

    if dest.exists() {
        fs::remove_file(dest).map_err(|err| RegistryError::Fetch {
            url: url.to_string(),
            reason: format!("failed replacing cached artifact {}: {err}", dest.display()),
        })?;
    }
    fs::rename(&part_path, dest).map_err(|err| RegistryError::Fetch {
        url: url.to_string(),
        reason: format!(
            "failed moving downloaded artifact into cache {}: {err}",
            dest.display()
        ),
    })?;
    Ok(())
}

fn download_http(
    url: &str,
    dest: &Path,
    progress: &mut dyn FnMut(u64, Option<u64>),
) -> Result<(), RegistryError> {
    let fetch_error = |reason: String| RegistryError::Fetch {
        url: url.to_string(),
        reason,
    };

    let mut response = reqwest::blocking::get(url).map_err(|err| fetch_error(err.to_string()))?;
    if !response.status().is_success() {
        return Err(fetch_error(format!("server returned {}", response.status())));
    }

    let total = response.content_length();
    let mut file =
        fs::File::create(dest).map_err(|err| fetch_error(format!("failed creating file: {err}")))?;
    let mut done = 0_u64;
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = response
            .read(&mut buffer)
            .map_err(|err| fetch_error(format!("read failed: {err}")))?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .map_err(|err| fetch_error(format!("write failed: {err}")))?;
        done += read as u64;
        progress(done, total);
    }
    file.flush()
        .map_err(|err| fetch_error(format!("flush failed: {err}")))?;
    Ok(())
}

fn extract_archive(archive_path: &Path, dst: &Path, archive_type: ArchiveType) -> anyhow::Result<()> {
    match archive_type {
        ArchiveType::Zip => extract_zip(archive_path, dst),
        ArchiveType::TarGz => extract_tar(archive_path, dst),
    }
}

fn extract_tar(archive_path: &Path, dst: &Path) -> anyhow::Result<()> {
    run_command(
        Command::new("tar")
            .arg("-xf")
            .arg(archive_path)
            .arg("-C")
            .arg(dst),
        "failed to extract tar archive",
    )
}

fn extract_zip(archive_path: &Path, dst: &Path) -> anyhow::Result<()> {
    if cfg!(windows) {
        let mut command = Command::new("powershell");
        command.arg("-NoProfile").arg("-Command").arg(format!(
            "Expand-Archive -LiteralPath '{}' -DestinationPath '{}' -Force",
            escape_ps_single_quote(archive_path),
            escape_ps_single_quote(dst)
        ));
        if run_command(
            &mut command,
            "failed to extract zip archive with powershell",
        )
        .is_ok()
        {
            return Ok(());
        }
    }

    let mut unzip_command = Command::new("unzip");
    unzip_command.arg("-q").arg(archive_path).arg("-d").arg(dst);
    if run_command(
        &mut unzip_command,
        "failed to extract zip archive with unzip",
    )
    .is_ok()
    {
        return Ok(());
    }

    run_command(
        Command::new("tar")
            .arg("-xf")
            .arg(archive_path)
            .arg("-C")
            .arg(dst),
        "failed to extract zip archive with tar fallback",
    )
}

fn escape_ps_single_quote(path: &Path) -> String {
    path.display().to_string().replace('\'', "''")
}

fn run_command(command: &mut Command, context_message: &str) -> anyhow::Result<()> {
    let output = command
        .output()
        .map_err(|err| anyhow::anyhow!("{context_message}: command failed to start: {err}"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow::anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}
