//! Installer adapter: materializes a package's files into a directory via `uv`.
//!
//! Two strategies, tried in order:
//!
//! 1. `uvx --from <requirement> python -c ...` prints the site-packages directory
//!    of uvx's ephemeral environment, which is then copied into the target.
//! 2. `uv pip install <requirement> --target <target>`.

mod runner;

pub use runner::{ProcessRunner, ToolOutput, ToolRunner};

#[cfg(test)]
pub use runner::MockToolRunner;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use crate::error::PkglinkError;
use crate::runtime::Runtime;
use crate::spec::PackageSpec;

const SITE_PACKAGES_SCRIPT: &str = "import site; print(site.getsitepackages()[0])";
const NOOP_SCRIPT: &str = "pass";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Populate `target` (an existing, empty directory) with the package's files.
    async fn install(&self, spec: &PackageSpec, target: &Path) -> Result<()>;

    /// Make uvx rebuild its cached environment for the project at `project_dir`.
    async fn refresh_tool(&self, package: &str, project_dir: &Path) -> Result<()>;
}

pub struct UvInstaller<'a, R: Runtime, T: ToolRunner> {
    runtime: &'a R,
    runner: T,
    uv_program: String,
    uvx_program: String,
}

impl<'a, R: Runtime, T: ToolRunner> UvInstaller<'a, R, T> {
    pub fn new(runtime: &'a R, runner: T, uv_program: String, uvx_program: String) -> Self {
        Self {
            runtime,
            runner,
            uv_program,
            uvx_program,
        }
    }

    /// uvx strategy. Returns the diagnostic text on failure.
    async fn install_with_uvx(&self, requirement: &str, target: &Path) -> Result<(), String> {
        let args = vec![
            "--from".to_string(),
            requirement.to_string(),
            "python".to_string(),
            "-c".to_string(),
            SITE_PACKAGES_SCRIPT.to_string(),
        ];
        let output = self
            .runner
            .run(&self.uvx_program, &args)
            .await
            .map_err(|e| format!("{:#}", e))?;
        if !output.success {
            return Err(output.diagnostics().to_string());
        }

        let site_packages = output
            .stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| "uvx did not report a site-packages directory".to_string())?;
        if !self.runtime.is_dir(&site_packages) {
            return Err(format!(
                "reported site-packages {:?} is not a directory",
                site_packages
            ));
        }

        debug!("Copying {:?} into {:?}", site_packages, target);
        self.runtime
            .copy_dir_all(&site_packages, target)
            .map_err(|e| format!("{:#}", e))
    }

    /// `uv pip install --target` strategy. Returns the diagnostic text on failure.
    async fn install_with_uv_pip(&self, requirement: &str, target: &Path) -> Result<(), String> {
        let args = vec![
            "pip".to_string(),
            "install".to_string(),
            requirement.to_string(),
            "--target".to_string(),
            target.display().to_string(),
        ];
        let output = self
            .runner
            .run(&self.uv_program, &args)
            .await
            .map_err(|e| format!("{:#}", e))?;
        if output.success {
            Ok(())
        } else {
            Err(output.diagnostics().to_string())
        }
    }

    /// Empty `target` so the fallback does not see a half-copied tree.
    fn reset_target(&self, target: &Path) -> Result<()> {
        if self.runtime.exists(target) {
            self.runtime.remove_dir_all(target)?;
        }
        self.runtime
            .create_dir_all(target)
            .with_context(|| format!("Failed to recreate {:?}", target))
    }
}

#[async_trait]
impl<'a, R: Runtime, T: ToolRunner> PackageInstaller for UvInstaller<'a, R, T> {
    #[tracing::instrument(skip(self))]
    async fn install(&self, spec: &PackageSpec, target: &Path) -> Result<()> {
        let requirement = spec.requirement().ok_or_else(|| PkglinkError::Installation {
            spec: spec.to_string(),
            diagnostics: "local sources are linked in place and never installed".to_string(),
        })?;

        info!("Installing {} with {}", requirement, self.uvx_program);
        let primary = match self.install_with_uvx(&requirement, target).await {
            Ok(()) => return Ok(()),
            Err(diagnostics) => diagnostics,
        };

        warn!(
            "{} failed for {}, falling back to {} pip install",
            self.uvx_program, requirement, self.uv_program
        );
        debug!("{} diagnostics: {}", self.uvx_program, primary);
        self.reset_target(target)?;

        match self.install_with_uv_pip(&requirement, target).await {
            Ok(()) => Ok(()),
            Err(fallback) => Err(PkglinkError::Installation {
                spec: requirement,
                diagnostics: format!(
                    "{} --from: {}\n{} pip install --target: {}",
                    self.uvx_program, primary, self.uv_program, fallback
                ),
            }
            .into()),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn refresh_tool(&self, package: &str, project_dir: &Path) -> Result<()> {
        let args = vec![
            "--refresh-package".to_string(),
            package.to_string(),
            "--from".to_string(),
            project_dir.display().to_string(),
            "python".to_string(),
            "-c".to_string(),
            NOOP_SCRIPT.to_string(),
        ];
        let output = self.runner.run(&self.uvx_program, &args).await?;
        if !output.success {
            anyhow::bail!(
                "{} could not rebuild {}: {}",
                self.uvx_program,
                package,
                output.diagnostics()
            );
        }
        debug!("{} rebuilt {} from {:?}", self.uvx_program, package, project_dir);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use crate::spec::Source;
    use mockall::predicate::eq;
    use std::fs;
    use tempfile::tempdir;

    fn toolbelt() -> PackageSpec {
        PackageSpec {
            source: Source::PyPi {
                name: "toolbelt".into(),
                version: Some("==1.0".parse().unwrap()),
            },
            module_override: None,
        }
    }

    fn ok(stdout: &str) -> ToolOutput {
        ToolOutput {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    fn failed(stderr: &str) -> ToolOutput {
        ToolOutput {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    #[tokio::test]
    async fn test_uvx_strategy_copies_site_packages() {
        let dir = tempdir().unwrap();
        let site = dir.path().join("env").join("site-packages");
        fs::create_dir_all(site.join("toolbelt").join("resources")).unwrap();
        fs::write(site.join("toolbelt").join("__init__.py"), "").unwrap();
        let target = dir.path().join("target");
        fs::create_dir_all(&target).unwrap();

        let mut runner = MockToolRunner::new();
        let site_out = format!("Installed 1 package\n{}\n", site.display());
        runner
            .expect_run()
            .withf(|program, args| {
                program == "uvx" && args[0] == "--from" && args[1] == "toolbelt==1.0"
            })
            .times(1)
            .returning(move |_, _| Ok(ok(&site_out)));

        let runtime = RealRuntime;
        let installer = UvInstaller::new(&runtime, runner, "uv".into(), "uvx".into());
        installer.install(&toolbelt(), &target).await.unwrap();

        assert!(target.join("toolbelt").join("resources").is_dir());
    }

    #[test_log::test(tokio::test)]
    async fn test_falls_back_to_uv_pip_target() {
        let mut runtime = MockRuntime::new();
        let target = PathBuf::from("/cache/.staging/abc");
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_remove_dir_all()
            .with(eq(target.clone()))
            .times(1)
            .returning(|_| Ok(()));
        runtime
            .expect_create_dir_all()
            .with(eq(target.clone()))
            .times(1)
            .returning(|_| Ok(()));

        let mut runner = MockToolRunner::new();
        runner
            .expect_run()
            .withf(|program, _| program == "uvx")
            .returning(|_, _| Ok(failed("no python found")));
        let expected_target = target.display().to_string();
        runner
            .expect_run()
            .withf(move |program, args| {
                program == "uv"
                    && args.to_vec()
                        == vec![
                            "pip".to_string(),
                            "install".to_string(),
                            "toolbelt==1.0".to_string(),
                            "--target".to_string(),
                            expected_target.clone(),
                        ]
            })
            .times(1)
            .returning(|_, _| Ok(ok("")));

        let installer = UvInstaller::new(&runtime, runner, "uv".into(), "uvx".into());
        installer.install(&toolbelt(), &target).await.unwrap();
    }

    #[tokio::test]
    async fn test_both_strategies_failing_reports_both_diagnostics() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| false);
        runtime.expect_create_dir_all().returning(|_| Ok(()));

        let mut runner = MockToolRunner::new();
        runner
            .expect_run()
            .withf(|program, _| program == "uvx")
            .returning(|_, _| Err(anyhow::anyhow!("Failed to run 'uvx'")));
        runner
            .expect_run()
            .withf(|program, _| program == "uv")
            .returning(|_, _| Ok(failed("No solution found for toolbelt==1.0")));

        let installer = UvInstaller::new(&runtime, runner, "uv".into(), "uvx".into());
        let err = installer
            .install(&toolbelt(), Path::new("/t"))
            .await
            .unwrap_err();

        match err.downcast_ref::<PkglinkError>() {
            Some(PkglinkError::Installation { spec, diagnostics }) => {
                assert_eq!(spec, "toolbelt==1.0");
                assert!(diagnostics.contains("Failed to run 'uvx'"));
                assert!(diagnostics.contains("No solution found"));
            }
            other => panic!("expected Installation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_uvx_reporting_missing_dir_falls_back() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_dir().returning(|_| false);
        runtime.expect_exists().returning(|_| false);
        runtime.expect_create_dir_all().returning(|_| Ok(()));

        let mut runner = MockToolRunner::new();
        runner
            .expect_run()
            .withf(|program, _| program == "uvx")
            .returning(|_, _| Ok(ok("/nowhere/site-packages\n")));
        runner
            .expect_run()
            .withf(|program, _| program == "uv")
            .times(1)
            .returning(|_, _| Ok(ok("")));

        let installer = UvInstaller::new(&runtime, runner, "uv".into(), "uvx".into());
        installer.install(&toolbelt(), Path::new("/t")).await.unwrap();
    }

    #[tokio::test]
    async fn test_local_spec_is_rejected() {
        let runtime = MockRuntime::new();
        let runner = MockToolRunner::new();
        let installer = UvInstaller::new(&runtime, runner, "uv".into(), "uvx".into());
        let spec = PackageSpec {
            source: Source::Local {
                path: PathBuf::from("/src/tool"),
            },
            module_override: None,
        };

        let err = installer.install(&spec, Path::new("/t")).await.unwrap_err();
        assert!(err.to_string().contains("never installed"));
    }

    #[tokio::test]
    async fn test_github_requirement_is_passed_through() {
        let dir = tempdir().unwrap();
        let site = dir.path().join("site");
        fs::create_dir_all(site.join("repo")).unwrap();
        fs::write(site.join("repo").join("x.txt"), "").unwrap();

        let mut runner = MockToolRunner::new();
        let out = format!("{}\n", site.display());
        runner
            .expect_run()
            .withf(|_, args| args[1] == "git+https://github.com/org/repo.git@v2")
            .times(1)
            .returning(move |_, _| Ok(ok(&out)));

        let runtime = RealRuntime;
        let installer = UvInstaller::new(&runtime, runner, "uv".into(), "uvx".into());
        let spec = PackageSpec {
            source: Source::GitHub {
                owner: "org".into(),
                repo: "repo".into(),
                reference: Some("v2".into()),
            },
            module_override: None,
        };
        let target = dir.path().join("target");
        installer.install(&spec, &target).await.unwrap();
        assert!(target.join("repo").join("x.txt").exists());
    }

    #[tokio::test]
    async fn test_refresh_tool_runs_uvx_against_project_dir() {
        let runtime = MockRuntime::new();
        let mut runner = MockToolRunner::new();
        runner
            .expect_run()
            .withf(|program, args| {
                program == "uvx"
                    && args[..4]
                        == [
                            "--refresh-package".to_string(),
                            "my-tools".to_string(),
                            "--from".to_string(),
                            "/work/.pkglink/my_tools".to_string(),
                        ]
            })
            .times(1)
            .returning(|_, _| Ok(ok("")));

        let installer = UvInstaller::new(&runtime, runner, "uv".into(), "uvx".into());
        installer
            .refresh_tool("my-tools", Path::new("/work/.pkglink/my_tools"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_refresh_tool_failure_carries_diagnostics() {
        let runtime = MockRuntime::new();
        let mut runner = MockToolRunner::new();
        runner
            .expect_run()
            .returning(|_, _| Ok(failed("hatchling: no such package")));

        let installer = UvInstaller::new(&runtime, runner, "uv".into(), "uvx".into());
        let err = installer
            .refresh_tool("toolbelt", Path::new("/work/.pkglink/toolbelt"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("hatchling: no such package"));
    }
}
