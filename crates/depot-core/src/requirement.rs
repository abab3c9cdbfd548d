use anyhow::{anyhow, Context, Result};
use semver::VersionReq;

use crate::name::PackageName;

/// Where a requirement's distribution comes from. `Index` is the default and
/// resolves against configured registry indexes; the other variants pin the
/// requirement to one concrete location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    Index,
    FindLinks,
    Url(String),
    Vcs { url: String, rev: String },
}

impl SourceLocator {
    pub fn describe(&self) -> String {
        match self {
            Self::Index => "index".to_string(),
            Self::FindLinks => "find-links".to_string(),
            Self::Url(url) => format!("url+{url}"),
            Self::Vcs { url, rev } => format!("git+{url}@{rev}"),
        }
    }

    pub fn parse_token(token: &str) -> Result<Self> {
        if token == "index" {
            return Ok(Self::Index);
        }
        if token == "find-links" {
            return Ok(Self::FindLinks);
        }
        if let Some(url) = token.strip_prefix("url+") {
            return Ok(Self::Url(url.to_string()));
        }
        if let Some(rest) = token.strip_prefix("git+") {
            let (url, rev) = rest
                .rsplit_once('@')
                .ok_or_else(|| anyhow!("vcs locator is missing a revision: {token}"))?;
            return Ok(Self::Vcs {
                url: url.to_string(),
                rev: rev.to_string(),
            });
        }
        Err(anyhow!("unknown source locator token: {token}"))
    }
}

/// One parsed requirement specifier. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: PackageName,
    pub requirement: VersionReq,
    pub locator: SourceLocator,
    pub extras: Vec<String>,
}

impl Requirement {
    pub fn any(name: PackageName) -> Self {
        Self {
            name,
            requirement: VersionReq::STAR,
            locator: SourceLocator::Index,
            extras: Vec::new(),
        }
    }

    /// Parses one requirement spec. Accepted grammar:
    ///
    /// - `name`: any version
    /// - `name@<req>`: semver requirement, e.g. `tool@^1.2` or `tool@=1.0.0`
    /// - `name[extra,extra2]@<req>`: extras
    /// - `git+<url>#<name>@<rev>`: git checkout pinned to a revision
    /// - `<url>#<name>` / `<url>#<name>@<req>`: direct archive URL
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(anyhow!("requirement spec must not be empty"));
        }

        if let Some(rest) = spec.strip_prefix("git+") {
            let (url, fragment) = rest.split_once('#').ok_or_else(|| {
                anyhow!("vcs requirement must name its package: git+<url>#<name>@<rev>")
            })?;
            let (raw_name, rev) = fragment.split_once('@').ok_or_else(|| {
                anyhow!("vcs requirement must pin a revision: git+<url>#<name>@<rev>")
            })?;
            if rev.trim().is_empty() {
                return Err(anyhow!("vcs revision must not be empty: {spec}"));
            }
            let (name, extras) = parse_name_and_extras(raw_name)?;
            return Ok(Self {
                name,
                requirement: VersionReq::STAR,
                locator: SourceLocator::Vcs {
                    url: url.to_string(),
                    rev: rev.to_string(),
                },
                extras,
            });
        }

        if spec.contains("://") {
            let (url, fragment) = spec.split_once('#').ok_or_else(|| {
                anyhow!("url requirement must name its package: <url>#<name>[@<req>]")
            })?;
            let (raw_name, raw_req) = match fragment.split_once('@') {
                Some((raw_name, raw_req)) => (raw_name, raw_req),
                None => (fragment, "*"),
            };
            let (name, extras) = parse_name_and_extras(raw_name)?;
            let requirement = VersionReq::parse(raw_req)
                .with_context(|| format!("invalid version requirement for '{name}': {raw_req}"))?;
            return Ok(Self {
                name,
                requirement,
                locator: SourceLocator::Url(url.to_string()),
                extras,
            });
        }

        let (raw_name, raw_req) = match spec.split_once('@') {
            Some((raw_name, raw_req)) => (raw_name, raw_req),
            None => (spec, "*"),
        };
        let (name, extras) = parse_name_and_extras(raw_name)?;
        let requirement = VersionReq::parse(raw_req)
            .with_context(|| format!("invalid version requirement for '{name}': {raw_req}"))?;
        Ok(Self {
            name,
            requirement,
            locator: SourceLocator::Index,
            extras,
        })
    }
}

fn parse_name_and_extras(raw: &str) -> Result<(PackageName, Vec<String>)> {
    let raw = raw.trim();
    let Some((name_part, extras_part)) = raw.split_once('[') else {
        return Ok((PackageName::new(raw)?, Vec::new()));
    };

    let extras_part = extras_part
        .strip_suffix(']')
        .ok_or_else(|| anyhow!("unterminated extras list in requirement: {raw}"))?;
    let mut extras = Vec::new();
    for extra in extras_part.split(',') {
        let extra = extra.trim();
        if extra.is_empty() {
            return Err(anyhow!("empty extra name in requirement: {raw}"));
        }
        extras.push(extra.to_ascii_lowercase());
    }
    extras.sort();
    extras.dedup();
    Ok((PackageName::new(name_part)?, extras))
}

/// Parses a requirements file: one spec per line, `#` comments and blank lines
/// ignored.
pub fn parse_requirements_file(content: &str) -> Result<Vec<Requirement>> {
    let mut requirements = Vec::new();
    for (line_number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let requirement = Requirement::parse(line)
            .with_context(|| format!("invalid requirement on line {}", line_number + 1))?;
        requirements.push(requirement);
    }
    Ok(requirements)
}
