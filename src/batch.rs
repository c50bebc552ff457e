//! `pkglink.config.yaml`: a named set of links applied together by `pkglink sync`.
//!
//! ```yaml
//! defaults:
//!   directory: resources
//!   force: false
//! links:
//!   toolbelt:
//!     source: toolbelt>=1.0
//!   templates:
//!     source: github:org/templates@v2
//!     directory: templates
//!     symlink_name: .tpl
//!   linters:
//!     source: lint-kit
//!     inside_pkglink: true
//!     project_name: lint_tools
//! ```
//!
//! Every entry must link to its own location. Entries may share a uvx project
//! name only when they install the same source, and at most one of them builds it.

use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::application::{DEFAULT_DIRECTORY, LinkRequest, default_symlink_name};
use crate::cache::CacheKey;
use crate::error::PkglinkError;
use crate::runtime::Runtime;
use crate::spec::parse_with_from;
use crate::tool::TOOL_DIR;

pub const DEFAULT_CONFIG_FILE: &str = "pkglink.config.yaml";

/// Values applied to every entry that does not set its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkDefaults {
    pub directory: Option<String>,
    pub symlink_name: Option<String>,
    pub from: Option<String>,
    pub force: Option<bool>,
    pub dry_run: Option<bool>,
    pub project_name: Option<String>,
    pub inside_pkglink: Option<bool>,
    pub no_setup: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkEntry {
    pub source: String,
    pub directory: Option<String>,
    pub symlink_name: Option<String>,
    pub from: Option<String>,
    pub force: Option<bool>,
    pub dry_run: Option<bool>,
    pub project_name: Option<String>,
    pub inside_pkglink: Option<bool>,
    pub no_setup: Option<bool>,
}

/// An entry that uses a uvx project name.
struct ProjectUser<'c> {
    entry: &'c str,
    source: CacheKey,
    inside_pkglink: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    #[serde(default)]
    pub defaults: LinkDefaults,
    #[serde(default)]
    pub links: BTreeMap<String, LinkEntry>,
}

impl BatchConfig {
    /// Read, parse and validate a batch file.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime>(runtime: &R, path: &Path) -> Result<Self> {
        if !runtime.is_file(path) {
            return Err(PkglinkError::config(path, "file not found").into());
        }
        let content = runtime.read_to_string(path)?;
        let config: BatchConfig = serde_yaml::from_str(&content)
            .map_err(|e| PkglinkError::config(path, e.to_string()))?;
        config.validate(runtime, path)?;
        Ok(config)
    }

    /// Merged request per entry, in entry-name order.
    pub fn requests(&self, force_dry_run: bool) -> Vec<(String, LinkRequest)> {
        self.links
            .iter()
            .map(|(name, entry)| (name.clone(), self.request_for(entry, force_dry_run)))
            .collect()
    }

    fn request_for(&self, entry: &LinkEntry, force_dry_run: bool) -> LinkRequest {
        let d = &self.defaults;
        LinkRequest {
            source: entry.source.clone(),
            directory: entry
                .directory
                .clone()
                .or_else(|| d.directory.clone())
                .unwrap_or_else(|| DEFAULT_DIRECTORY.to_string()),
            symlink_name: entry.symlink_name.clone().or_else(|| d.symlink_name.clone()),
            from: entry.from.clone().or_else(|| d.from.clone()),
            force: entry.force.or(d.force).unwrap_or(false),
            dry_run: force_dry_run || entry.dry_run.or(d.dry_run).unwrap_or(false),
            refresh: false,
            project_name: entry.project_name.clone().or_else(|| d.project_name.clone()),
            inside_pkglink: entry.inside_pkglink.or(d.inside_pkglink).unwrap_or(false),
            no_setup: entry.no_setup.or(d.no_setup).unwrap_or(false),
        }
    }

    fn validate<R: Runtime>(&self, runtime: &R, path: &Path) -> Result<()> {
        if self.links.is_empty() {
            return Err(PkglinkError::config(path, "no links defined").into());
        }

        let mut seen: BTreeMap<String, &str> = BTreeMap::new();
        let mut projects: BTreeMap<String, Vec<ProjectUser<'_>>> = BTreeMap::new();
        for (name, entry) in &self.links {
            if entry.source.trim().is_empty() {
                return Err(
                    PkglinkError::config(path, format!("entry '{}' has an empty source", name))
                        .into(),
                );
            }
            let request = self.request_for(entry, false);
            // Unparseable sources are reported when the entry runs.
            let Ok(spec) = parse_with_from(runtime, &request.source, request.from.as_deref())
            else {
                continue;
            };

            let symlink = request
                .symlink_name
                .clone()
                .unwrap_or_else(|| default_symlink_name(&spec));
            let location = if request.inside_pkglink {
                format!("{}/{}", TOOL_DIR, symlink)
            } else {
                symlink
            };
            if let Some(other) = seen.insert(location.clone(), name.as_str()) {
                return Err(PkglinkError::config(
                    path,
                    format!(
                        "entries '{}' and '{}' both link to '{}'",
                        other, name, location
                    ),
                )
                .into());
            }

            let project = request
                .project_name
                .clone()
                .unwrap_or_else(|| spec.project_name());
            projects.entry(project).or_default().push(ProjectUser {
                entry: name,
                source: CacheKey::for_spec(&spec),
                inside_pkglink: request.inside_pkglink,
            });
        }

        for (project, users) in &projects {
            let same_source = users.iter().all(|u| u.source == users[0].source);
            let builders = users.iter().filter(|u| u.inside_pkglink).count();
            if same_source && builders <= 1 {
                continue;
            }
            let entries: Vec<String> = users.iter().map(|u| format!("'{}'", u.entry)).collect();
            return Err(PkglinkError::config(
                path,
                format!(
                    "entries {} share project_name '{}' but {}",
                    entries.join(", "),
                    project,
                    if same_source {
                        "more than one sets inside_pkglink"
                    } else {
                        "install different sources"
                    }
                ),
            )
            .into());
        }
        Ok(())
    }
}

/// `pkglink.config.yaml` in `dir`.
pub fn default_config_path(dir: &Path) -> PathBuf {
    dir.join(DEFAULT_CONFIG_FILE)
}
