//! Source string parsing.
//!
//! A source string is one of:
//! - `github:owner/repo[@ref]` or `owner/repo[@ref]`
//! - a local path (`./dir`, `../dir`, `/abs/dir`, `~/dir`, or any existing path with a separator)
//! - a PyPI name, optionally with a constraint (`pkg`, `pkg==1.2`, `pkg>=1,<2`, `pkg@1.2`)

mod constraint;

pub use constraint::{COMPARATORS, Clause, VersionConstraint};

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::PkglinkError;
use crate::runtime::Runtime;
use crate::runtime::path::{expand_tilde, normalize_path};
use constraint::COMPARATOR_CHARS;

const GITHUB_PREFIX: &str = "github:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    PyPi,
    GitHub,
    Local,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::PyPi => write!(f, "pypi"),
            SourceKind::GitHub => write!(f, "github"),
            SourceKind::Local => write!(f, "local"),
        }
    }
}

/// Where a package comes from. Each variant only carries what it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Source {
    #[serde(rename = "pypi")]
    PyPi {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<VersionConstraint>,
    },
    #[serde(rename = "github")]
    GitHub {
        owner: String,
        repo: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    Local { path: PathBuf },
}

/// A parsed, normalized package spec. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSpec {
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_override: Option<String>,
}

impl PackageSpec {
    pub fn kind(&self) -> SourceKind {
        match self.source {
            Source::PyPi { .. } => SourceKind::PyPi,
            Source::GitHub { .. } => SourceKind::GitHub,
            Source::Local { .. } => SourceKind::Local,
        }
    }

    /// Normalized name: PyPI project name, `owner/repo`, or absolute local path.
    pub fn name(&self) -> String {
        match &self.source {
            Source::PyPi { name, .. } => name.clone(),
            Source::GitHub { owner, repo, .. } => format!("{}/{}", owner, repo),
            Source::Local { path } => path.display().to_string(),
        }
    }

    /// Version constraint (PyPI) or git reference (GitHub).
    pub fn version_constraint(&self) -> Option<String> {
        match &self.source {
            Source::PyPi { version, .. } => version.as_ref().map(|v| v.to_string()),
            Source::GitHub { reference, .. } => reference.clone(),
            Source::Local { .. } => None,
        }
    }

    /// Requirement string handed to the installer. Local sources are never installed.
    pub fn requirement(&self) -> Option<String> {
        match &self.source {
            Source::PyPi { name, version } => Some(match version {
                Some(v) => format!("{}{}", name, v),
                None => name.clone(),
            }),
            Source::GitHub {
                owner,
                repo,
                reference,
            } => {
                let base = format!("git+https://github.com/{}/{}.git", owner, repo);
                Some(match reference {
                    Some(r) => format!("{}@{}", base, r),
                    None => base,
                })
            }
            Source::Local { .. } => None,
        }
    }

    /// Name used for the default symlink (`.{link_name}`).
    pub fn link_name(&self) -> String {
        if let Some(module) = &self.module_override {
            return module.clone();
        }
        match &self.source {
            Source::PyPi { name, .. } => name.clone(),
            Source::GitHub { repo, .. } => repo.clone(),
            Source::Local { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "local".to_string()),
        }
    }

    /// Distribution name: what uv installs, whatever module `--from` points at.
    pub fn project_name(&self) -> String {
        match &self.source {
            Source::PyPi { name, .. } => name.clone(),
            Source::GitHub { repo, .. } => repo.clone(),
            Source::Local { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "local".to_string()),
        }
    }

    /// Module directory the resolver should look in first.
    pub fn module_hint(&self) -> Option<String> {
        if let Some(module) = &self.module_override {
            return Some(module.clone());
        }
        match &self.source {
            Source::PyPi { name, .. } => Some(name.replace('-', "_")),
            Source::GitHub { repo, .. } => Some(repo.replace('-', "_")),
            Source::Local { .. } => None,
        }
    }

    /// Attach the module override used by `--from`.
    pub fn with_module_override(mut self, module: String) -> Self {
        self.module_override = Some(module);
        self
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Source::PyPi { name, version } => {
                write!(f, "{}", name)?;
                if let Some(v) = version {
                    write!(f, "{}", v)?;
                }
            }
            Source::GitHub {
                owner,
                repo,
                reference,
            } => {
                write!(f, "github:{}/{}", owner, repo)?;
                if let Some(r) = reference {
                    write!(f, "@{}", r)?;
                }
            }
            Source::Local { path } => write!(f, "{}", path.display())?,
        }
        if let Some(module) = &self.module_override {
            write!(f, " (module {})", module)?;
        }
        Ok(())
    }
}

/// Parse a source string, honouring `--from`.
///
/// With `--from`, the `from` value is what gets installed and `source` must be a
/// bare module name that the resolver searches for.
#[tracing::instrument(skip(runtime))]
pub fn parse_with_from<R: Runtime>(
    runtime: &R,
    source: &str,
    from: Option<&str>,
) -> Result<PackageSpec> {
    match from {
        None => parse_source(runtime, source),
        Some(from) => {
            let module = source.trim();
            if !is_valid_name(module) {
                return Err(PkglinkError::spec_parse(
                    source,
                    "with --from, the source must be a plain module name",
                )
                .into());
            }
            let spec = parse_source(runtime, from)?;
            Ok(spec.with_module_override(module.to_string()))
        }
    }
}

/// Parse a raw source string into a [`PackageSpec`].
#[tracing::instrument(skip(runtime))]
pub fn parse_source<R: Runtime>(runtime: &R, raw: &str) -> Result<PackageSpec> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PkglinkError::spec_parse(raw, "source cannot be empty").into());
    }

    let source = if let Some(rest) = raw.strip_prefix(GITHUB_PREFIX) {
        parse_github(raw, rest)?
    } else if has_explicit_path_prefix(raw) {
        parse_local(runtime, raw)?
    } else if has_separator(raw) && local_candidate(runtime, raw)?.is_some() {
        parse_local(runtime, raw)?
    } else if let Some(pos) = raw.find(COMPARATOR_CHARS) {
        parse_pypi_with_constraint(raw, pos)?
    } else if has_separator(raw) {
        if raw.matches('/').count() == 1 && !raw.contains('\\') {
            parse_github(raw, raw)?
        } else {
            return Err(PkglinkError::spec_parse(
                raw,
                "ambiguous source: not an existing path and not owner/repo",
            )
            .into());
        }
    } else {
        parse_pypi(raw)?
    };

    Ok(PackageSpec {
        source,
        module_override: None,
    })
}

fn has_explicit_path_prefix(raw: &str) -> bool {
    raw == "."
        || raw == ".."
        || raw.starts_with("./")
        || raw.starts_with("../")
        || raw.starts_with('/')
        || raw.starts_with('~')
        || raw.starts_with(".\\")
        || raw.starts_with("..\\")
        || Path::new(raw).is_absolute()
}

fn has_separator(raw: &str) -> bool {
    raw.contains('/') || raw.contains('\\')
}

/// Absolute form of `raw` if it names an existing directory.
fn local_candidate<R: Runtime>(runtime: &R, raw: &str) -> Result<Option<PathBuf>> {
    let expanded = expand_tilde(raw, runtime.home_dir().as_deref());
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        runtime.current_dir()?.join(expanded)
    };
    let absolute = normalize_path(&absolute);
    Ok(runtime.is_dir(&absolute).then_some(absolute))
}

fn parse_local<R: Runtime>(runtime: &R, raw: &str) -> Result<Source> {
    match local_candidate(runtime, raw)? {
        Some(path) => Ok(Source::Local { path }),
        None => Err(PkglinkError::spec_parse(raw, "local path does not exist or is not a directory").into()),
    }
}

fn parse_github(raw: &str, body: &str) -> Result<Source, PkglinkError> {
    let (repo_part, reference) = match body.rfind('@') {
        Some(at) => {
            let reference = &body[at + 1..];
            if reference.is_empty() {
                return Err(PkglinkError::spec_parse(raw, "reference after @ cannot be empty"));
            }
            (&body[..at], Some(reference.to_string()))
        }
        None => (body, None),
    };

    let (owner, repo) = repo_part
        .split_once('/')
        .ok_or_else(|| PkglinkError::spec_parse(raw, "expected owner/repo"))?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);

    if !is_valid_name(owner) || !is_valid_name(repo) {
        return Err(PkglinkError::spec_parse(raw, "expected owner/repo"));
    }

    Ok(Source::GitHub {
        owner: owner.to_lowercase(),
        repo: repo.to_lowercase(),
        reference,
    })
}

fn parse_pypi_with_constraint(raw: &str, pos: usize) -> Result<Source, PkglinkError> {
    let name = raw[..pos].trim();
    if name.is_empty() {
        return Err(PkglinkError::spec_parse(raw, "version constraint without a package name"));
    }
    if has_separator(name) {
        return Err(PkglinkError::spec_parse(
            raw,
            "version constraints only apply to PyPI package names",
        ));
    }
    if !is_valid_name(name) {
        return Err(PkglinkError::spec_parse(name, "invalid package name"));
    }
    let version = raw[pos..].parse::<VersionConstraint>()?;
    Ok(Source::PyPi {
        name: normalize_pypi_name(name),
        version: Some(version),
    })
}

fn parse_pypi(raw: &str) -> Result<Source, PkglinkError> {
    let (name, version) = match raw.split_once('@') {
        Some((name, version)) => (name, Some(VersionConstraint::pinned(version)?)),
        None => (raw, None),
    };
    if !is_valid_name(name) {
        return Err(PkglinkError::spec_parse(raw, "invalid package name"));
    }
    Ok(Source::PyPi {
        name: normalize_pypi_name(name),
        version,
    })
}

/// `[A-Za-z0-9]([A-Za-z0-9._-]*[A-Za-z0-9])?`
pub fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        }
        _ => false,
    }
}

/// Lowercase and collapse runs of `-`, `_`, `.` into a single `-`.
pub fn normalize_pypi_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.push(c.to_ascii_lowercase());
            in_separator = false;
        }
    }
    out
}
