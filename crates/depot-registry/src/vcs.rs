use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::RegistryError;

fn base_git_command() -> Command {
    let mut command = Command::new("git");
    command
        .arg("-c")
        .arg("core.autocrlf=false")
        .arg("-c")
        .arg("core.eol=lf");
    if cfg!(windows) {
        command.arg("-c").arg("core.longpaths=true");
    }
    command
}

fn run_git(command: &mut Command, url: &str, what: &str) -> Result<(), RegistryError> {
    let output = command.output().map_err(|err| RegistryError::Fetch {
        url: url.to_string(),
        reason: format!("failed launching git {what}: {err}"),
    })?;
    if !output.status.success() {
        return Err(RegistryError::Fetch {
            url: url.to_string(),
            reason: format!(
                "git {what} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(())
}

fn checkout_dir_name(url: &str, rev: &str) -> String {
    let sanitized: String = url
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!("{sanitized}@{rev}")
}

/// Clones `url` and pins the working tree to `rev` under the VCS cache. An
/// existing checkout for the same url+rev is reused as-is; revisions are
/// immutable once pinned.
pub fn checkout_vcs_source(
    cache_root: &Path,
    url: &str,
    rev: &str,
) -> Result<PathBuf, RegistryError> {
    let destination = cache_root.join(checkout_dir_name(url, rev));
    if destination.join(".git").exists() {
        return Ok(destination);
    }
    if destination.exists() {
        std::fs::remove_dir_all(&destination).map_err(|err| RegistryError::Fetch {
            url: url.to_string(),
            reason: format!(
                "failed clearing stale checkout {}: {err}",
                destination.display()
            ),
        })?;
    }
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).map_err(|err| RegistryError::Fetch {
            url: url.to_string(),
            reason: format!("failed creating vcs cache dir {}: {err}", parent.display()),
        })?;
    }

    run_git(
        base_git_command()
            .arg("clone")
            .arg("--")
            .arg(url)
            .arg(&destination),
        url,
        "clone",
    )?;
    run_git(
        base_git_command()
            .arg("-C")
            .arg(&destination)
            .arg("checkout")
            .arg("--detach")
            .arg(rev),
        url,
        "checkout",
    )?;
    Ok(destination)
}
