use anyhow::{Result, bail};
use log::debug;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::application::{
    LinkReport, LinkRequest, LinkUseCase, SyncUseCase, compile_filters,
};
use crate::batch::{BatchConfig, default_config_path};
use crate::cache::CacheStore;
use crate::cleanup;
use crate::install::PackageInstaller;
use crate::link::{LinkOutcome, LinkPlan, LinkPlanner};
use crate::runtime::Runtime;
use crate::setup::SetupLink;
use crate::tool::{ToolOutcome, ToolReport};

pub mod config;
mod paths;

pub use config::Config;
pub use paths::default_cache_root;

fn link_use_case<R: Runtime, I: PackageInstaller>(
    config: &Config<R>,
    installer: I,
) -> Result<LinkUseCase<'_, R, I>> {
    let work_dir = config.runtime.current_dir()?;
    debug!("Working directory: {:?}", work_dir);
    Ok(LinkUseCase::new(
        &config.runtime,
        installer,
        config.cache_root.clone(),
        config.resolver.clone(),
        work_dir,
        cleanup::new_shared(),
    ))
}

fn link_line(plan: &LinkPlan, outcome: &LinkOutcome) -> String {
    let target = plan.target.display();
    let source = plan.source.display();
    match outcome {
        LinkOutcome::Created => format!("Linked {} -> {}", target, source),
        LinkOutcome::Replaced => format!("Replaced {} -> {}", target, source),
        LinkOutcome::Unchanged => format!("{} already links to {}", target, source),
        LinkOutcome::DryRun(text) => format!("[dry-run] {}", text),
    }
}

/// One-line summary of a finished link run.
pub fn outcome_line(report: &LinkReport) -> String {
    link_line(&report.plan, &report.outcome)
}

pub fn tool_line(tool: &ToolReport) -> String {
    let dir = tool.plan.dir.display();
    let name = tool.plan.package_name();
    let version = &tool.plan.metadata.version;
    match &tool.outcome {
        ToolOutcome::Current => format!("{} is up to date ({} {})", dir, name, version),
        ToolOutcome::Refreshed => format!("Prepared {} for uvx ({} {})", dir, name, version),
        ToolOutcome::RefreshFailed(e) => {
            format!("Prepared {}, but uvx could not refresh it: {}", dir, e)
        }
        ToolOutcome::DryRun(text) => format!("[dry-run] {}", text),
    }
}

pub fn setup_line(link: &SetupLink) -> String {
    format!("setup: {}", link_line(&link.plan, &link.outcome))
}

/// Every line a finished run prints: the uvx project, the link, then setup links.
pub fn report_lines(report: &LinkReport) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(tool) = &report.tool {
        lines.push(tool_line(tool));
    }
    lines.push(outcome_line(report));
    lines.extend(report.setup.iter().map(setup_line));
    lines
}

/// Link one source into the working directory.
#[tracing::instrument(skip(config))]
pub async fn link<R: Runtime>(config: Config<R>, request: LinkRequest) -> Result<()> {
    let use_case = link_use_case(&config, config.installer())?;
    let report = use_case.run(&request).await?;
    for line in report_lines(&report) {
        println!("{}", line);
    }
    Ok(())
}

/// Link a package under `.pkglink/` and make its console scripts runnable with uvx.
#[tracing::instrument(skip(config))]
pub async fn tool<R: Runtime>(config: Config<R>, mut request: LinkRequest) -> Result<()> {
    request.inside_pkglink = true;
    let use_case = link_use_case(&config, config.installer())?;
    let report = use_case.run(&request).await?;
    for line in report_lines(&report) {
        println!("{}", line);
    }
    if let Some(tool) = &report.tool {
        for script in tool.plan.metadata.console_scripts.keys() {
            println!("Run: uvx --from {} {}", tool.plan.dir.display(), script);
        }
    }
    Ok(())
}

/// Show what linking would do, without touching the working directory.
#[tracing::instrument(skip(config))]
pub async fn plan<R: Runtime>(config: Config<R>, mut request: LinkRequest, json: bool) -> Result<()> {
    request.dry_run = true;
    let use_case = link_use_case(&config, config.installer())?;
    let report = use_case.run(&request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Source:       {}", report.spec);
    let origin = match (&report.cache_key, report.cache_hit) {
        (Some(key), true) => format!("cached {}", key),
        (Some(key), false) => format!("installed {}", key),
        (None, _) => "local".to_string(),
    };
    println!("Install root: {} ({})", report.install_root.display(), origin);
    println!(
        "Resolved:     {} [{}]",
        report.resolution.path.display(),
        report.resolution.strategy
    );
    println!("Plan:         {}", report.plan.describe());
    if let Some(tool) = &report.tool {
        println!("Tool:         {}", tool.plan.describe());
    }
    for link in &report.setup {
        println!("Setup:        {}", link.plan.describe());
    }
    Ok(())
}

/// Apply every entry of a batch file.
#[tracing::instrument(skip(config))]
pub async fn sync<R: Runtime>(
    config: Config<R>,
    config_path: Option<PathBuf>,
    dry_run: bool,
    patterns: Vec<String>,
) -> Result<()> {
    let path = match config_path {
        Some(path) => path,
        None => default_config_path(&config.runtime.current_dir()?),
    };
    let batch = BatchConfig::load(&config.runtime, &path)?;
    let filters = compile_filters(&patterns)?;

    let use_case = link_use_case(&config, config.installer())?;
    let summary = SyncUseCase::new(&use_case)
        .run(&batch, &filters, dry_run)
        .await;

    if summary.results.is_empty() {
        println!("No entries matched.");
        return Ok(());
    }
    for entry in &summary.results {
        match &entry.result {
            Ok(report) => {
                for line in report_lines(report) {
                    println!("{}: {}", entry.name, line);
                }
            }
            Err(e) => println!("{}: error: {:#}", entry.name, e),
        }
    }

    let failed = summary.failed();
    if failed > 0 {
        bail!("{} of {} entries failed", failed, summary.results.len());
    }
    Ok(())
}

/// List dot-prefixed symlinks in `dir` (default: working directory).
#[tracing::instrument(skip(runtime))]
pub fn list<R: Runtime>(runtime: R, dir: Option<PathBuf>) -> Result<()> {
    let dir = match dir {
        Some(dir) => dir,
        None => runtime.current_dir()?,
    };
    let links = LinkPlanner::new(&runtime).list_managed_links(&dir)?;
    if links.is_empty() {
        println!("No managed links in {}", dir.display());
        return Ok(());
    }
    for link in links {
        let target = link
            .target
            .as_deref()
            .map(|t| t.display().to_string())
            .unwrap_or_else(|| "?".to_string());
        let status = if link.target_exists { "" } else { " (missing)" };
        println!("{} -> {}{}", link.name, target, status);
    }
    Ok(())
}

#[tracing::instrument(skip(config))]
pub fn cache_path<R: Runtime>(config: Config<R>) -> Result<()> {
    println!("{}", config.cache_root.display());
    Ok(())
}

#[tracing::instrument(skip(config))]
pub fn cache_list<R: Runtime>(config: Config<R>) -> Result<()> {
    let store = CacheStore::new(&config.runtime, config.cache_root.clone());
    let entries = store.entries()?;
    if entries.is_empty() {
        println!("Cache at {} is empty", store.root().display());
        return Ok(());
    }
    let now = SystemTime::now();
    for entry in entries {
        let age = now
            .duration_since(entry.created_at)
            .map(format_age)
            .unwrap_or_else(|_| "just now".to_string());
        println!("{}  {:>8}  {}", entry.key, age, entry.install_root.display());
    }
    Ok(())
}

/// Coarse age: `42s ago`, `5m ago`, `3h ago`, `2d ago`.
pub fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..=59 => format!("{}s ago", secs),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
