//! The two files pkglink writes into a uvx project directory.

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::dist_info::DistInfo;
use crate::runtime::Runtime;

const DEFAULT_REQUIRES_PYTHON: &str = ">=3.11";

#[derive(Serialize)]
struct Pyproject<'a> {
    #[serde(rename = "build-system")]
    build_system: BuildSystem,
    project: Project<'a>,
    tool: ToolTable,
}

#[derive(Serialize)]
struct BuildSystem {
    requires: Vec<&'static str>,
    #[serde(rename = "build-backend")]
    build_backend: &'static str,
}

#[derive(Serialize)]
struct Project<'a> {
    name: String,
    version: &'a str,
    description: String,
    #[serde(rename = "requires-python")]
    requires_python: &'a str,
    scripts: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct ToolTable {
    hatch: Hatch,
}

#[derive(Serialize)]
struct Hatch {
    build: HatchBuild,
}

#[derive(Serialize)]
struct HatchBuild {
    targets: HatchTargets,
}

#[derive(Serialize)]
struct HatchTargets {
    wheel: HatchWheel,
}

#[derive(Serialize)]
struct HatchWheel {
    packages: Vec<String>,
}

/// `pyproject.toml` exposing the console scripts of `info`, with `src/<module>` as the package.
pub fn render_pyproject(project: &str, module: &str, info: &DistInfo) -> Result<String> {
    let name = project.replace('_', "-");
    let pyproject = Pyproject {
        build_system: BuildSystem {
            requires: vec!["hatchling"],
            build_backend: "hatchling.build",
        },
        project: Project {
            description: info
                .summary
                .clone()
                .unwrap_or_else(|| format!("{} package", name)),
            name,
            version: &info.version,
            requires_python: info
                .requires_python
                .as_deref()
                .unwrap_or(DEFAULT_REQUIRES_PYTHON),
            scripts: &info.console_scripts,
        },
        tool: ToolTable {
            hatch: Hatch {
                build: HatchBuild {
                    targets: HatchTargets {
                        wheel: HatchWheel {
                            packages: vec![format!("src/{}", module)],
                        },
                    },
                },
            },
        },
    };
    Ok(toml::to_string_pretty(&pyproject)?)
}

/// Contents of `.pkglink-metadata.yaml`: what the project directory was last built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub version: String,
    pub source_hash: String,
    pub install_spec: String,
    pub package_name: String,
    #[serde(default)]
    pub console_scripts: BTreeMap<String, String>,
    pub last_refreshed: DateTime<Utc>,
}

impl ToolMetadata {
    /// Previously written metadata. Unreadable or malformed files count as absent.
    pub fn read<R: Runtime>(runtime: &R, path: &Path) -> Option<Self> {
        if !runtime.is_file(path) {
            return None;
        }
        let parsed = runtime
            .read_to_string(path)
            .and_then(|content| Ok(serde_yaml::from_str(&content)?));
        match parsed {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("Ignoring unreadable {:?}: {:#}", path, e);
                None
            }
        }
    }

    /// uvx needs a refresh when the install, its version or its scripts changed.
    pub fn differs_from(&self, previous: Option<&ToolMetadata>) -> bool {
        match previous {
            None => true,
            Some(prev) => {
                prev.source_hash != self.source_hash
                    || prev.install_spec != self.install_spec
                    || prev.version != self.version
                    || prev.console_scripts != self.console_scripts
            }
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
