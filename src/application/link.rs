//! Link use case: parse, install (or reuse the cache), resolve, link, then run
//! the package's post-install setup.
//!
//! With `inside_pkglink` the link goes to `.pkglink/<symlink_name>` and the install
//! is also wrapped as a uvx project in `.pkglink/<project>/`.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;

use crate::cache::{CacheKey, CacheStore};
use crate::cleanup::{CleanupGuard, SharedCleanupContext, with_interrupt_cleanup};
use crate::error::PkglinkError;
use crate::install::PackageInstaller;
use crate::link::{LinkOutcome, LinkPlan, LinkPlanner};
use crate::resolve::{DirectoryResolver, Resolution, ResolverOptions};
use crate::runtime::Runtime;
use crate::setup::{PostInstallSetup, SetupLink};
use crate::spec::{PackageSpec, Source, is_valid_name, parse_with_from};
use crate::tool::{TOOL_DIR, ToolBuilder, ToolOutcome, ToolReport};

/// Directory linked when none is requested.
pub const DEFAULT_DIRECTORY: &str = "resources";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRequest {
    pub source: String,
    pub directory: String,
    pub symlink_name: Option<String>,
    pub from: Option<String>,
    pub force: bool,
    pub dry_run: bool,
    /// Ignore any cached install and reinstall.
    pub refresh: bool,
    /// uvx project directory name under `.pkglink/` (default: the package name).
    pub project_name: Option<String>,
    /// Link under `.pkglink/` and build the uvx project next to it.
    pub inside_pkglink: bool,
    /// Skip the package's `pkglink.yaml` symlinks.
    pub no_setup: bool,
}

impl LinkRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            directory: DEFAULT_DIRECTORY.to_string(),
            symlink_name: None,
            from: None,
            force: false,
            dry_run: false,
            refresh: false,
            project_name: None,
            inside_pkglink: false,
            no_setup: false,
        }
    }
}

/// Everything one link run decided, in pipeline order.
#[derive(Debug, Clone, Serialize)]
pub struct LinkReport {
    pub spec: PackageSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<CacheKey>,
    pub cache_hit: bool,
    pub install_root: PathBuf,
    pub resolution: Resolution,
    pub plan: LinkPlan,
    #[serde(skip)]
    pub outcome: LinkOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub setup: Vec<SetupLink>,
}

/// Default symlink name for a spec: `.{link_name}`.
pub fn default_symlink_name(spec: &PackageSpec) -> String {
    format!(".{}", spec.link_name())
}

/// A symlink name is a single entry of the working directory.
fn check_symlink_name(name: &str) -> Result<(), PkglinkError> {
    if name.trim().is_empty() {
        return Err(PkglinkError::spec_parse(name, "symlink name cannot be empty"));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(PkglinkError::spec_parse(
            name,
            "symlink name must be a plain file name without path separators",
        )),
    }
}

/// Project directory name for an `inside_pkglink` request, checked before anything is installed.
fn tool_project(
    request: &LinkRequest,
    spec: &PackageSpec,
    symlink_name: &str,
) -> Result<String, PkglinkError> {
    if let Source::Local { .. } = spec.source {
        return Err(PkglinkError::spec_parse(
            request.source.as_str(),
            "a local checkout cannot be prepared for uvx",
        ));
    }
    let project = request
        .project_name
        .clone()
        .unwrap_or_else(|| spec.project_name());
    if !is_valid_name(&project) {
        return Err(PkglinkError::spec_parse(
            project,
            "project name must be a plain package name",
        ));
    }
    if project == symlink_name {
        return Err(PkglinkError::spec_parse(
            symlink_name,
            "symlink name is taken by the uvx project directory",
        ));
    }
    Ok(project)
}

pub struct LinkUseCase<'a, R: Runtime, I: PackageInstaller> {
    runtime: &'a R,
    installer: I,
    cache: CacheStore<'a, R>,
    resolver: DirectoryResolver<'a, R>,
    planner: LinkPlanner<'a, R>,
    setup: PostInstallSetup<'a, R>,
    work_dir: PathBuf,
    cleanup: SharedCleanupContext,
}

impl<'a, R: Runtime, I: PackageInstaller> LinkUseCase<'a, R, I> {
    pub fn new(
        runtime: &'a R,
        installer: I,
        cache_root: PathBuf,
        resolver_options: ResolverOptions,
        work_dir: PathBuf,
        cleanup: SharedCleanupContext,
    ) -> Self {
        Self {
            runtime,
            installer,
            cache: CacheStore::new(runtime, cache_root),
            resolver: DirectoryResolver::new(runtime, resolver_options),
            planner: LinkPlanner::new(runtime),
            setup: PostInstallSetup::new(runtime),
            work_dir,
            cleanup,
        }
    }

    pub fn cache(&self) -> &CacheStore<'a, R> {
        &self.cache
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&self, request: &LinkRequest) -> Result<LinkReport> {
        let spec = parse_with_from(self.runtime, &request.source, request.from.as_deref())?;
        debug!("Parsed {:?} as {:?}", request.source, spec);

        let symlink_name = match &request.symlink_name {
            Some(name) => {
                check_symlink_name(name)?;
                name.clone()
            }
            None => default_symlink_name(&spec),
        };
        let project = if request.inside_pkglink {
            Some(tool_project(request, &spec, &symlink_name)?)
        } else {
            None
        };

        let (install_root, cache_key, cache_hit) = match &spec.source {
            Source::Local { path } => (path.clone(), None, false),
            _ => {
                let key = CacheKey::for_spec(&spec);
                let (root, hit) = self.ensure_installed(&spec, &key, request.refresh).await?;
                (root, Some(key), hit)
            }
        };

        let resolution = self.resolver.resolve(
            &install_root,
            &request.directory,
            spec.module_hint().as_deref(),
        )?;

        let link_dir = if request.inside_pkglink {
            self.work_dir.join(TOOL_DIR)
        } else {
            self.work_dir.clone()
        };
        let target = link_dir.join(&symlink_name);

        // Checked before anything is written.
        let setup_plans = if request.no_setup {
            Vec::new()
        } else {
            self.setup
                .plan(&resolution.path, &target, &self.work_dir, request.force)?
        };

        let tool = match (&project, &cache_key) {
            (Some(project), Some(key)) => Some(
                self.prepare_tool(&spec, key, &install_root, project, request.dry_run)
                    .await?,
            ),
            _ => None,
        };

        if request.inside_pkglink && !request.dry_run {
            self.runtime.create_dir_all(&link_dir)?;
        }

        let plan = self.planner.plan(&resolution.path, &target, request.force);
        let outcome = self.planner.execute(&plan, request.dry_run)?;

        let setup = self.setup.apply(setup_plans, request.dry_run)?;

        Ok(LinkReport {
            spec,
            cache_key,
            cache_hit,
            install_root,
            resolution,
            plan,
            outcome,
            tool,
            setup,
        })
    }

    /// Build or update `.pkglink/<project>`. A failed uvx refresh leaves the
    /// metadata unwritten so the next run retries it.
    async fn prepare_tool(
        &self,
        spec: &PackageSpec,
        key: &CacheKey,
        install_root: &Path,
        project: &str,
        dry_run: bool,
    ) -> Result<ToolReport> {
        let builder = ToolBuilder::new(self.runtime);
        let plan = builder.plan(spec, key, install_root, &self.work_dir.join(TOOL_DIR), project)?;
        if dry_run {
            return Ok(ToolReport {
                outcome: ToolOutcome::DryRun(plan.describe()),
                plan,
            });
        }

        builder.write_project(&plan)?;
        let outcome = if plan.needs_refresh {
            match self
                .installer
                .refresh_tool(&plan.package_name(), &plan.dir)
                .await
            {
                Ok(()) => ToolOutcome::Refreshed,
                Err(e) => {
                    warn!("uvx refresh of {} failed: {:#}", plan.package_name(), e);
                    ToolOutcome::RefreshFailed(format!("{:#}", e))
                }
            }
        } else {
            ToolOutcome::Current
        };
        if !matches!(outcome, ToolOutcome::RefreshFailed(_)) {
            builder.write_metadata(&plan)?;
        }
        Ok(ToolReport { plan, outcome })
    }

    /// Cached install root for `spec`, installing it first on a miss.
    async fn ensure_installed(
        &self,
        spec: &PackageSpec,
        key: &CacheKey,
        refresh: bool,
    ) -> Result<(PathBuf, bool)> {
        if !refresh {
            if let Some(root) = self.cache.lookup(key) {
                debug!("Cache hit for {} ({})", spec, key);
                return Ok((root, true));
            }
        }

        info!("Installing {}", spec);
        let staged = self.cache.stage(key)?;
        let guard = CleanupGuard::new(Arc::clone(&self.cleanup), staged.clone());

        let installed = with_interrupt_cleanup(
            Arc::clone(&self.cleanup),
            self.installer.install(spec, &staged),
        )
        .await;

        let published = installed.and_then(|()| self.cache.store(key, &staged));
        if published.is_err() {
            self.discard(&staged);
        }
        guard.success();

        let root = published.with_context(|| format!("while installing {}", spec))?;
        Ok((root, false))
    }

    fn discard(&self, staged: &Path) {
        if self.runtime.exists(staged) {
            if let Err(e) = self.runtime.remove_dir_all(staged) {
                warn!("Failed to remove staging directory {:?}: {}", staged, e);
            }
        }
    }
}
