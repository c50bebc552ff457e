//! Post-install setup: a linked package can ask for extra symlinks in the project
//! directory through a `pkglink.yaml` at the top of the linked directory.
//!
//! ```yaml
//! symlinks:
//!   - source: configs/.editorconfig
//!     target: .editorconfig
//! ```

use anyhow::Result;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::PkglinkError;
use crate::link::{LinkAction, LinkOutcome, LinkPlan, LinkPlanner};
use crate::runtime::{Runtime, is_plain_relative};

/// Setup file names, looked up in this order.
pub const SETUP_FILES: [&str; 2] = ["pkglink.yaml", "pkglink.setup.yaml"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupConfig {
    #[serde(default)]
    pub symlinks: Vec<SymlinkSpec>,
}

/// `source` is relative to the linked directory, `target` to the project directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SymlinkSpec {
    pub source: String,
    pub target: String,
}

impl SetupConfig {
    /// The setup file found in `dir` together with its contents.
    pub fn load<R: Runtime>(runtime: &R, dir: &Path) -> Result<Option<(PathBuf, SetupConfig)>> {
        let Some(path) = SETUP_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| runtime.is_file(path))
        else {
            return Ok(None);
        };
        let content = runtime.read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(Some((path, SetupConfig::default())));
        }
        let config = serde_yaml::from_str(&content)
            .map_err(|e| PkglinkError::setup(&path, e.to_string()))?;
        Ok(Some((path, config)))
    }
}

/// One setup symlink and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupLink {
    #[serde(flatten)]
    pub plan: LinkPlan,
    #[serde(skip)]
    pub outcome: LinkOutcome,
}

pub struct PostInstallSetup<'a, R: Runtime> {
    runtime: &'a R,
    planner: LinkPlanner<'a, R>,
}

impl<'a, R: Runtime> PostInstallSetup<'a, R> {
    pub fn new(runtime: &'a R) -> Self {
        Self {
            runtime,
            planner: LinkPlanner::new(runtime),
        }
    }

    /// Plan the symlinks requested by the setup file in `package_dir`.
    ///
    /// Sources go through `linked_dir`, the symlink pointing at `package_dir`, so
    /// they follow the package when it is relinked. Targets land under `base_dir`.
    /// Every entry is checked before anything is planned.
    #[tracing::instrument(skip(self))]
    pub fn plan(
        &self,
        package_dir: &Path,
        linked_dir: &Path,
        base_dir: &Path,
        force: bool,
    ) -> Result<Vec<LinkPlan>> {
        let Some((file, config)) = SetupConfig::load(self.runtime, package_dir)? else {
            debug!("No setup file in {:?}", package_dir);
            return Ok(Vec::new());
        };
        debug!("{} setup symlink(s) in {:?}", config.symlinks.len(), file);

        for link in &config.symlinks {
            for (role, value) in [("source", &link.source), ("target", &link.target)] {
                if !is_plain_relative(value) {
                    return Err(PkglinkError::setup(
                        &file,
                        format!("symlink {} '{}' must be a relative path without '..'", role, value),
                    )
                    .into());
                }
            }
            if !self.runtime.exists(&package_dir.join(&link.source)) {
                return Err(PkglinkError::setup(
                    &file,
                    format!("symlink source '{}' does not exist", link.source),
                )
                .into());
            }
        }

        Ok(config
            .symlinks
            .iter()
            .map(|link| {
                self.planner.plan(
                    &linked_dir.join(&link.source),
                    &base_dir.join(&link.target),
                    force,
                )
            })
            .collect())
    }

    /// Execute `plans` in order, creating missing parent directories of the targets.
    pub fn apply(&self, plans: Vec<LinkPlan>, dry_run: bool) -> Result<Vec<SetupLink>> {
        let mut applied = Vec::with_capacity(plans.len());
        for plan in plans {
            let writes = matches!(plan.action, LinkAction::Create | LinkAction::ForceOverwrite);
            if writes && !dry_run {
                if let Some(parent) = plan.target.parent() {
                    self.runtime.create_dir_all(parent)?;
                }
            }
            let outcome = self.planner.execute(&plan, dry_run)?;
            applied.push(SetupLink { plan, outcome });
        }
        if !applied.is_empty() {
            info!("Post-install setup handled {} symlink(s)", applied.len());
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::exit_code_for;
    use crate::runtime::{MockRuntime, RealRuntime};
    use std::fs;
    use tempfile::{TempDir, tempdir};

    const EDITORCONFIG_SETUP: &str = r#"
symlinks:
  - source: configs/.editorconfig
    target: .editorconfig
  - source: docs/style.css
    target: theme/inner/style.css
"#;

    struct Project {
        _dir: TempDir,
        package: PathBuf,
        linked: PathBuf,
        work: PathBuf,
    }

    fn run(p: &Project, force: bool, dry_run: bool) -> Result<Vec<SetupLink>> {
        let runtime = RealRuntime;
        let setup = PostInstallSetup::new(&runtime);
        let plans = setup.plan(&p.package, &p.linked, &p.work, force)?;
        setup.apply(plans, dry_run)
    }

    /// A package directory with a setup file, and a project linking it as `.pkg`.
    fn project(setup: &str) -> Project {
        let dir = tempdir().unwrap();
        let package = dir.path().join("cache").join("pkg").join("resources");
        fs::create_dir_all(package.join("configs")).unwrap();
        fs::create_dir_all(package.join("docs")).unwrap();
        fs::write(package.join("configs").join(".editorconfig"), "root = true").unwrap();
        fs::write(package.join("docs").join("style.css"), "body {}").unwrap();
        fs::write(package.join("pkglink.yaml"), setup).unwrap();
        let work = dir.path().join("work");
        fs::create_dir_all(&work).unwrap();
        Project {
            linked: work.join(".pkg"),
            package,
            work,
            _dir: dir,
        }
    }

    #[test]
    fn test_no_setup_file_plans_nothing() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_file().times(2).returning(|_| false);

        let setup = PostInstallSetup::new(&runtime);
        let plans = setup
            .plan(Path::new("/cache/k/pkg"), Path::new("/work/.pkg"), Path::new("/work"), false).unwrap();
        assert!(plans.is_empty());
    }

    #[test]
    fn test_empty_setup_files() {
        for content in ["", "symlinks: []\n"] {
            let p = project(content);
            let runtime = RealRuntime;
            let plans = PostInstallSetup::new(&runtime)
                .plan(&p.package, &p.linked, &p.work, false).unwrap();
            assert!(plans.is_empty(), "{content:?}");
        }
    }

    #[test]
    fn test_alternate_setup_file_name() {
        let p = project("");
        fs::remove_file(p.package.join("pkglink.yaml")).unwrap();
        fs::write(
            p.package.join("pkglink.setup.yaml"),
            "symlinks:\n  - source: docs\n    target: docs\n",
        ).unwrap();

        let runtime = RealRuntime;
        let plans = PostInstallSetup::new(&runtime)
            .plan(&p.package, &p.linked, &p.work, false).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].target, p.work.join("docs"));
        assert_eq!(plans[0].source, p.linked.join("docs"));
    }

    #[cfg(unix)]
    #[test_log::test]
    fn test_setup_links_land_in_project_dir() {
        let p = project(EDITORCONFIG_SETUP);
        std::os::unix::fs::symlink(&p.package, &p.linked).unwrap();

        let applied = run(&p, false, false).unwrap();
        assert_eq!(applied.len(), 2);
        assert!(applied.iter().all(|l| l.outcome == LinkOutcome::Created));

        let editorconfig = p.work.join(".editorconfig");
        assert_eq!(fs::read_to_string(&editorconfig).unwrap(), "root = true");
        assert_eq!(
            fs::read_link(&editorconfig).unwrap(),
            p.linked.join("configs").join(".editorconfig")
        );
        assert!(p.work.join("theme").join("inner").join("style.css").is_file());

        // Running again finds everything in place.
        let applied = run(&p, false, false).unwrap();
        assert!(applied.iter().all(|l| l.outcome == LinkOutcome::Unchanged));
    }

    #[test]
    fn test_dry_run_setup_writes_nothing() {
        let p = project(EDITORCONFIG_SETUP);

        let applied = run(&p, false, true).unwrap();
        assert_eq!(applied.len(), 2);
        assert!(matches!(&applied[1].outcome, LinkOutcome::DryRun(text) if text.contains("style.css")));
        assert!(fs::read_dir(&p.work).unwrap().next().is_none());
    }

    #[test]
    fn test_invalid_yaml_is_a_setup_error() {
        let p = project("invalid: yaml: content: [");

        let err = run(&p, false, false).unwrap_err();
        assert_eq!(exit_code_for(&err), 2);
        assert!(err.to_string().contains("pkglink.yaml"));
    }

    #[test]
    fn test_setup_paths_must_stay_inside() {
        for (source, target) in [
            ("../../secret", ".secret"),
            ("/etc/passwd", ".passwd"),
            ("configs/.editorconfig", "../outside"),
            ("configs/.editorconfig", "/tmp/outside"),
            ("configs/.editorconfig", "."),
        ] {
            let p = project(&format!(
                "symlinks:\n  - source: {source}\n    target: {target}\n"
            ));
            let err = run(&p, true, false).unwrap_err();
            assert_eq!(exit_code_for(&err), 2, "{source} -> {target}");
            assert!(fs::read_dir(&p.work).unwrap().next().is_none());
        }
    }

    #[test]
    fn test_missing_source_fails_before_any_link() {
        let p = project(
            r#"
symlinks:
  - source: docs/style.css
    target: style.css
  - source: configs/missing.toml
    target: missing.toml
"#,
        );

        let err = run(&p, false, false).unwrap_err();
        assert!(err.to_string().contains("configs/missing.toml"));
        assert!(!p.work.join("style.css").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_target_needs_force() {
        let p = project(EDITORCONFIG_SETUP);
        std::os::unix::fs::symlink(&p.package, &p.linked).unwrap();
        fs::write(p.work.join(".editorconfig"), "mine").unwrap();

        let err = run(&p, false, false).unwrap_err();
        assert_eq!(exit_code_for(&err), 5);
        assert_eq!(fs::read_to_string(p.work.join(".editorconfig")).unwrap(), "mine");

        let applied = run(&p, true, false).unwrap();
        assert_eq!(applied[0].outcome, LinkOutcome::Replaced);
        assert_eq!(
            fs::read_to_string(p.work.join(".editorconfig")).unwrap(),
            "root = true"
        );
    }
}
