//! Link planner: decides what to do about the symlink target, then does it.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::PkglinkError;
use crate::runtime::{Runtime, is_path_under, normalize_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkAction {
    Create,
    AlreadyLinked,
    Conflict,
    ForceOverwrite,
    /// The target is the source or one of its ancestors; replacing it would delete the source.
    Refused,
}

/// What currently occupies the target path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "points_to", rename_all = "kebab-case")]
pub enum ExistingTarget {
    /// `None` when the link text cannot be read.
    Symlink(Option<PathBuf>),
    Directory,
    File,
}

impl fmt::Display for ExistingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExistingTarget::Symlink(Some(to)) => write!(f, "symlink to {}", to.display()),
            ExistingTarget::Symlink(None) => write!(f, "unreadable symlink"),
            ExistingTarget::Directory => write!(f, "directory"),
            ExistingTarget::File => write!(f, "file"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkPlan {
    pub source: PathBuf,
    pub target: PathBuf,
    pub action: LinkAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing: Option<ExistingTarget>,
}

impl LinkPlan {
    /// Human-readable account of what executing this plan does.
    pub fn describe(&self) -> String {
        let source = self.source.display();
        let target = self.target.display();
        let existing = self
            .existing
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_default();
        match self.action {
            LinkAction::Create => format!("would create symlink {} -> {}", target, source),
            LinkAction::AlreadyLinked => {
                format!("{} already links to {}, nothing to do", target, source)
            }
            LinkAction::Conflict => format!(
                "{} already exists ({}), would not replace it without --force",
                target, existing
            ),
            LinkAction::ForceOverwrite => format!(
                "would replace {} at {} with symlink -> {}",
                existing, target, source
            ),
            LinkAction::Refused => format!(
                "{} contains the link source {}, refusing to replace it",
                target, source
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    Replaced,
    Unchanged,
    DryRun(String),
}

/// A dot-prefixed symlink found in a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagedLink {
    pub name: String,
    pub path: PathBuf,
    pub target: Option<PathBuf>,
    pub target_exists: bool,
}

pub struct LinkPlanner<'a, R: Runtime> {
    runtime: &'a R,
}

impl<'a, R: Runtime> LinkPlanner<'a, R> {
    pub fn new(runtime: &'a R) -> Self {
        Self { runtime }
    }

    fn same_location(&self, a: &Path, b: &Path) -> bool {
        if normalize_path(a) == normalize_path(b) {
            return true;
        }
        match (self.runtime.canonicalize(a), self.runtime.canonicalize(b)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    /// True when removing `target` would also remove `source`.
    fn holds_source(&self, source: &Path, target: &Path) -> bool {
        if is_path_under(source, target) {
            return true;
        }
        let (Some(parent), Some(name)) = (target.parent(), target.file_name()) else {
            return false;
        };
        match (self.runtime.canonicalize(source), self.runtime.canonicalize(parent)) {
            (Ok(source), Ok(parent)) => is_path_under(&source, &parent.join(name)),
            _ => false,
        }
    }

    fn inspect(&self, target: &Path) -> Option<ExistingTarget> {
        if self.runtime.is_symlink(target) {
            Some(ExistingTarget::Symlink(self.runtime.resolve_link(target).ok()))
        } else if self.runtime.exists(target) {
            Some(if self.runtime.is_dir(target) {
                ExistingTarget::Directory
            } else {
                ExistingTarget::File
            })
        } else {
            None
        }
    }

    /// Decide how to make `target` a symlink to `source`. Never touches the filesystem.
    #[tracing::instrument(skip(self))]
    pub fn plan(&self, source: &Path, target: &Path, force: bool) -> LinkPlan {
        let existing = self.inspect(target);
        let action = match &existing {
            None => LinkAction::Create,
            Some(ExistingTarget::Symlink(Some(current))) if self.same_location(current, source) => {
                LinkAction::AlreadyLinked
            }
            Some(_) if self.holds_source(source, target) => LinkAction::Refused,
            Some(_) if force => LinkAction::ForceOverwrite,
            Some(_) => LinkAction::Conflict,
        };
        debug!("Planned {:?} for {:?} (existing: {:?})", action, target, existing);

        LinkPlan {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            action,
            existing,
        }
    }

    /// Carry out `plan`. With `dry_run`, only describe what would happen.
    #[tracing::instrument(skip(self))]
    pub fn execute(&self, plan: &LinkPlan, dry_run: bool) -> Result<LinkOutcome> {
        match plan.action {
            LinkAction::AlreadyLinked => Ok(LinkOutcome::Unchanged),
            _ if dry_run => Ok(LinkOutcome::DryRun(plan.describe())),
            LinkAction::Refused => Err(PkglinkError::UnsafeTarget {
                target: plan.target.clone(),
                linked: plan.source.clone(),
            }
            .into()),
            LinkAction::Conflict => Err(PkglinkError::LinkConflict {
                target: plan.target.clone(),
                existing: plan
                    .existing
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default(),
            }
            .into()),
            LinkAction::Create => {
                self.create(plan)?;
                Ok(LinkOutcome::Created)
            }
            LinkAction::ForceOverwrite => {
                self.remove_existing(&plan.target)?;
                self.create(plan)?;
                Ok(LinkOutcome::Replaced)
            }
        }
    }

    fn create(&self, plan: &LinkPlan) -> Result<()> {
        self.runtime
            .symlink(&plan.source, &plan.target)
            .with_context(|| format!("Failed to link {:?} -> {:?}", plan.target, plan.source))?;
        info!("Linked {:?} -> {:?}", plan.target, plan.source);
        Ok(())
    }

    fn remove_existing(&self, target: &Path) -> Result<()> {
        debug!("Removing existing {:?}", target);
        let removed = if self.runtime.is_symlink(target) {
            self.runtime.remove_symlink(target)
        } else if self.runtime.is_dir(target) {
            self.runtime.remove_dir_all(target)
        } else {
            self.runtime.remove_file(target)
        };
        removed.with_context(|| format!("Failed to remove existing {:?}", target))
    }

    /// Dot-prefixed symlinks directly inside `dir`, sorted by name.
    #[tracing::instrument(skip(self))]
    pub fn list_managed_links(&self, dir: &Path) -> Result<Vec<ManagedLink>> {
        let mut links = Vec::new();
        for path in self.runtime.read_dir(dir)? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with('.') || !self.runtime.is_symlink(&path) {
                continue;
            }
            links.push(ManagedLink {
                name: name.to_string(),
                target: self.runtime.resolve_link(&path).ok(),
                target_exists: self.runtime.exists(&path),
                path,
            });
        }
        Ok(links)
    }
}
