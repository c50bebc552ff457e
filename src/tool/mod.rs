//! uvx project directories.
//!
//! `pkglink tool` wraps a cached install in `.pkglink/<project>/` so that
//! `uvx --from .pkglink/<project> <script>` runs the package's console scripts
//! without installing anything into the project:
//!
//! ```text
//! .pkglink/<project>/
//!   pyproject.toml            console scripts taken from the dist-info
//!   .pkglink-metadata.yaml    what the directory was last built from
//!   src/<module> -> <cache>/<key>/<module>
//! ```

mod dist_info;
mod project;

pub use dist_info::{DistInfo, find_dist_info};
pub use project::{ToolMetadata, render_pyproject};

use anyhow::Result;
use chrono::Utc;
use log::{debug, info};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::cache::CacheKey;
use crate::error::PkglinkError;
use crate::link::LinkPlanner;
use crate::runtime::Runtime;
use crate::spec::PackageSpec;

/// Directory under the working directory holding uvx projects and their links.
pub const TOOL_DIR: &str = ".pkglink";
pub const METADATA_FILE: &str = ".pkglink-metadata.yaml";
pub const PYPROJECT_FILE: &str = "pyproject.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolPlan {
    pub dir: PathBuf,
    pub project: String,
    pub module: String,
    pub module_source: PathBuf,
    pub metadata: ToolMetadata,
    pub needs_refresh: bool,
    #[serde(skip)]
    pub pyproject: String,
}

impl ToolPlan {
    /// Name uv knows the project by (`pyproject.toml` `project.name`).
    pub fn package_name(&self) -> String {
        self.project.replace('_', "-")
    }

    pub fn describe(&self) -> String {
        let scripts = if self.metadata.console_scripts.is_empty() {
            "no console scripts".to_string()
        } else {
            let names: Vec<&str> = self
                .metadata
                .console_scripts
                .keys()
                .map(String::as_str)
                .collect();
            format!("scripts: {}", names.join(", "))
        };
        let refresh = if self.needs_refresh { ", then refresh uvx" } else { "" };
        format!(
            "would prepare {} for uvx ({} {}, {}){}",
            self.dir.display(),
            self.package_name(),
            self.metadata.version,
            scripts,
            refresh
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    /// Files rewritten; uvx already saw this build.
    Current,
    Refreshed,
    /// Files written but uvx could not rebuild. The next run tries again.
    RefreshFailed(String),
    DryRun(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolReport {
    #[serde(flatten)]
    pub plan: ToolPlan,
    #[serde(skip)]
    pub outcome: ToolOutcome,
}

pub struct ToolBuilder<'a, R: Runtime> {
    runtime: &'a R,
    planner: LinkPlanner<'a, R>,
}

impl<'a, R: Runtime> ToolBuilder<'a, R> {
    pub fn new(runtime: &'a R) -> Self {
        Self {
            runtime,
            planner: LinkPlanner::new(runtime),
        }
    }

    /// Work out `<tool_root>/<project>` for `spec` installed at `install_root`.
    /// Reads the install and any previous metadata; writes nothing.
    #[tracing::instrument(skip(self, key))]
    pub fn plan(
        &self,
        spec: &PackageSpec,
        key: &CacheKey,
        install_root: &Path,
        tool_root: &Path,
        project: &str,
    ) -> Result<ToolPlan> {
        let (Some(module), Some(requirement)) = (spec.module_hint(), spec.requirement()) else {
            return Err(PkglinkError::spec_parse(
                spec.to_string(),
                "local checkouts have no installed metadata to build a uvx project from",
            )
            .into());
        };

        let module_source = install_root.join(&module);
        if !self.runtime.is_dir(&module_source) {
            return Err(PkglinkError::Resolution {
                requested: module,
                root: install_root.to_path_buf(),
            }
            .into());
        }

        let info = find_dist_info(
            self.runtime,
            install_root,
            &[spec.project_name(), module.clone()],
        )?;
        let dir = tool_root.join(project);
        let previous = ToolMetadata::read(self.runtime, &dir.join(METADATA_FILE));

        let mut metadata = ToolMetadata {
            version: info.version.clone(),
            source_hash: key.to_string(),
            install_spec: requirement,
            package_name: module.clone(),
            console_scripts: info.console_scripts.clone(),
            last_refreshed: Utc::now(),
        };
        let needs_refresh = metadata.differs_from(previous.as_ref());
        if let (false, Some(previous)) = (needs_refresh, &previous) {
            metadata.last_refreshed = previous.last_refreshed;
        }
        debug!(
            "uvx project {:?}: version {}, refresh needed: {}",
            dir, metadata.version, needs_refresh
        );

        Ok(ToolPlan {
            pyproject: render_pyproject(project, &module, &info)?,
            dir,
            project: project.to_string(),
            module,
            module_source,
            metadata,
            needs_refresh,
        })
    }

    /// Write `pyproject.toml` and point `src/<module>` at the cached module.
    pub fn write_project(&self, plan: &ToolPlan) -> Result<()> {
        let src = plan.dir.join("src");
        self.runtime.create_dir_all(&src)?;
        let link = self
            .planner
            .plan(&plan.module_source, &src.join(&plan.module), true);
        self.planner.execute(&link, false)?;
        self.runtime
            .write(&plan.dir.join(PYPROJECT_FILE), plan.pyproject.as_bytes())?;
        info!("Prepared {:?} for uvx", plan.dir);
        Ok(())
    }

    /// Record what the directory was built from.
    pub fn write_metadata(&self, plan: &ToolPlan) -> Result<()> {
        self.runtime.write(
            &plan.dir.join(METADATA_FILE),
            plan.metadata.to_yaml()?.as_bytes(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use crate::spec::Source;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    struct Install {
        _dir: TempDir,
        root: PathBuf,
        tools: PathBuf,
    }

    fn toolbelt() -> PackageSpec {
        PackageSpec {
            source: Source::PyPi {
                name: "toolbelt".into(),
                version: None,
            },
            module_override: None,
        }
    }

    /// A cached install of `toolbelt` at `version` with one console script.
    fn install(version: &str) -> Install {
        let dir = tempdir().unwrap();
        let root = dir.path().join("cache").join("slot");
        fs::create_dir_all(root.join("toolbelt").join("resources")).unwrap();
        fs::write(root.join("toolbelt").join("__init__.py"), "").unwrap();
        write_dist_info(&root, version);
        Install {
            tools: dir.path().join("work").join(TOOL_DIR),
            root,
            _dir: dir,
        }
    }

    fn write_dist_info(root: &Path, version: &str) {
        let dist_info = root.join(format!("toolbelt-{}.dist-info", version));
        fs::create_dir_all(&dist_info).unwrap();
        fs::write(
            dist_info.join("entry_points.txt"),
            "[console_scripts]\ntb = toolbelt.cli:main\n",
        )
        .unwrap();
    }

    #[cfg(unix)]
    #[test_log::test]
    fn test_plan_and_write_project_dir() {
        let inst = install("1.0");
        let runtime = RealRuntime;
        let builder = ToolBuilder::new(&runtime);
        let spec = toolbelt();
        let key = CacheKey::for_spec(&spec);

        let plan = builder
            .plan(&spec, &key, &inst.root, &inst.tools, "toolbelt")
            .unwrap();
        assert!(plan.needs_refresh);
        assert_eq!(plan.dir, inst.tools.join("toolbelt"));
        assert_eq!(plan.metadata.version, "1.0");
        assert_eq!(plan.metadata.install_spec, "toolbelt");
        assert_eq!(plan.metadata.source_hash, key.to_string());
        assert!(!inst.tools.exists());

        builder.write_project(&plan).unwrap();
        builder.write_metadata(&plan).unwrap();

        let pyproject = fs::read_to_string(plan.dir.join(PYPROJECT_FILE)).unwrap();
        assert!(pyproject.contains(r#"tb = "toolbelt.cli:main""#), "{pyproject}");
        assert_eq!(
            fs::read_link(plan.dir.join("src").join("toolbelt")).unwrap(),
            inst.root.join("toolbelt")
        );
        assert!(plan.dir.join("src").join("toolbelt").join("__init__.py").exists());

        // Same install again: nothing for uvx to pick up, timestamp kept.
        let again = builder
            .plan(&spec, &key, &inst.root, &inst.tools, "toolbelt")
            .unwrap();
        assert!(!again.needs_refresh);
        assert_eq!(again.metadata.last_refreshed, plan.metadata.last_refreshed);
        builder.write_project(&again).unwrap();
    }

    #[test]
    fn test_new_version_needs_refresh() {
        let inst = install("1.0");
        let runtime = RealRuntime;
        let builder = ToolBuilder::new(&runtime);
        let spec = toolbelt();
        let key = CacheKey::for_spec(&spec);

        let plan = builder
            .plan(&spec, &key, &inst.root, &inst.tools, "toolbelt")
            .unwrap();
        fs::create_dir_all(&plan.dir).unwrap();
        builder.write_metadata(&plan).unwrap();

        fs::remove_dir_all(inst.root.join("toolbelt-1.0.dist-info")).unwrap();
        write_dist_info(&inst.root, "1.1");
        let plan = builder
            .plan(&spec, &key, &inst.root, &inst.tools, "toolbelt")
            .unwrap();
        assert!(plan.needs_refresh);
        assert_eq!(plan.metadata.version, "1.1");
        assert!(plan.describe().contains("then refresh uvx"));
    }

    #[test]
    fn test_describe_names_project_and_scripts() {
        let inst = install("2.0");
        let runtime = RealRuntime;
        let spec = toolbelt();
        let plan = ToolBuilder::new(&runtime)
            .plan(&spec, &CacheKey::for_spec(&spec), &inst.root, &inst.tools, "my_tools")
            .unwrap();

        assert_eq!(plan.package_name(), "my-tools");
        let text = plan.describe();
        assert!(text.starts_with("would prepare"));
        assert!(text.contains("my-tools 2.0"));
        assert!(text.contains("scripts: tb"));
    }

    #[test]
    fn test_local_spec_is_rejected() {
        let inst = install("1.0");
        let runtime = RealRuntime;
        let spec = PackageSpec {
            source: Source::Local {
                path: inst.root.clone(),
            },
            module_override: None,
        };

        let err = ToolBuilder::new(&runtime)
            .plan(&spec, &CacheKey::for_spec(&spec), &inst.root, &inst.tools, "slot")
            .unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 2);
    }

    #[test]
    fn test_missing_module_dir_is_a_resolution_error() {
        let inst = install("1.0");
        fs::remove_dir_all(inst.root.join("toolbelt")).unwrap();
        let runtime = RealRuntime;
        let spec = toolbelt();

        let err = ToolBuilder::new(&runtime)
            .plan(&spec, &CacheKey::for_spec(&spec), &inst.root, &inst.tools, "toolbelt")
            .unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 4);
    }
}
