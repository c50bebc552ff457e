//! The resolver's strategies, highest priority first.
//!
//! Each strategy is a plain function over a [`SearchContext`] returning every
//! candidate it can see; ordering between candidates is decided by the caller.

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::similarity::{affix_score, similarity};
use super::{ResolutionCandidate, ResolverOptions, Strategy};
use crate::runtime::Runtime;

const PACKAGE_MARKER: &str = "__init__.py";
const RESOURCES_DIR: &str = "resources";

pub type StrategyFn<R> = fn(&SearchContext<'_, R>) -> Result<Vec<ResolutionCandidate>>;

/// Cascade order. The first strategy with any candidate wins.
pub fn cascade<R: Runtime>() -> [(Strategy, StrategyFn<R>); 6] {
    [
        (Strategy::ExactMatch, exact_match::<R>),
        (Strategy::PythonPackage, python_package::<R>),
        (Strategy::ResourceSibling, resource_sibling::<R>),
        (Strategy::PrefixSuffix, prefix_suffix::<R>),
        (Strategy::Similarity, similarity_match::<R>),
        (Strategy::Fallback, first_directory::<R>),
    ]
}

pub struct SearchContext<'a, R: Runtime> {
    pub runtime: &'a R,
    pub root: &'a Path,
    pub requested: &'a str,
    pub module: Option<&'a str>,
    pub options: &'a ResolverOptions,
}

impl<R: Runtime> SearchContext<'_, R> {
    /// Sorted, non-excluded subdirectories of `dir`.
    pub fn child_dirs(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(self
            .runtime
            .read_dir(dir)?
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| !self.options.is_excluded(name))
            })
            .filter(|p| self.runtime.is_dir(p))
            .collect())
    }

    pub fn top_level_dirs(&self) -> Result<Vec<PathBuf>> {
        self.child_dirs(self.root)
    }

    fn candidate(&self, path: PathBuf, strategy: Strategy, score: f64) -> ResolutionCandidate {
        ResolutionCandidate {
            path,
            strategy,
            score,
        }
    }

    /// Spellings of the module hint worth trying as a top-level directory.
    fn module_names(&self) -> Vec<String> {
        let Some(module) = self.module else {
            return Vec::new();
        };
        let mut names = vec![
            module.to_string(),
            module.replace('-', "_"),
            module.replace('_', "-"),
        ];
        names.dedup();
        names
    }
}

fn dir_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

/// `root/<module>/<requested>`, or `root/<requested>` when no module directory exists.
pub fn exact_match<R: Runtime>(ctx: &SearchContext<'_, R>) -> Result<Vec<ResolutionCandidate>> {
    let module_dirs: Vec<PathBuf> = ctx
        .module_names()
        .into_iter()
        .map(|name| ctx.root.join(name))
        .filter(|dir| ctx.runtime.is_dir(dir))
        .collect();

    let found = if module_dirs.is_empty() {
        let direct = ctx.root.join(ctx.requested);
        if ctx.runtime.is_dir(&direct) {
            vec![direct]
        } else {
            Vec::new()
        }
    } else {
        module_dirs
            .into_iter()
            .map(|dir| dir.join(ctx.requested))
            .filter(|path| ctx.runtime.is_dir(path))
            .take(1)
            .collect()
    };

    Ok(found
        .into_iter()
        .map(|path| ctx.candidate(path, Strategy::ExactMatch, 1.0))
        .collect())
}

/// Top-level Python packages containing `requested` as a direct child.
pub fn python_package<R: Runtime>(ctx: &SearchContext<'_, R>) -> Result<Vec<ResolutionCandidate>> {
    let mut candidates = Vec::new();
    for top in ctx.top_level_dirs()? {
        if !ctx.runtime.is_file(&top.join(PACKAGE_MARKER)) {
            continue;
        }
        let path = top.join(ctx.requested);
        if ctx.runtime.is_dir(&path) {
            candidates.push(ctx.candidate(path, Strategy::PythonPackage, 1.0));
        }
    }
    Ok(candidates)
}

/// Top-level directories holding a `resources` folder, searched directly and inside it.
pub fn resource_sibling<R: Runtime>(
    ctx: &SearchContext<'_, R>,
) -> Result<Vec<ResolutionCandidate>> {
    let mut candidates = Vec::new();
    for top in ctx.top_level_dirs()? {
        let resources = top.join(RESOURCES_DIR);
        if !ctx.runtime.is_dir(&resources) {
            continue;
        }
        let found = [top.join(ctx.requested), resources.join(ctx.requested)]
            .into_iter()
            .find(|path| ctx.runtime.is_dir(path));
        if let Some(path) = found {
            candidates.push(ctx.candidate(path, Strategy::ResourceSibling, 1.0));
        }
    }
    Ok(candidates)
}

/// Top-level directories named like `requested`, searched for a child named like it.
pub fn prefix_suffix<R: Runtime>(ctx: &SearchContext<'_, R>) -> Result<Vec<ResolutionCandidate>> {
    let mut candidates = Vec::new();
    for top in ctx.top_level_dirs()? {
        if affix_score(ctx.requested, dir_name(&top)).is_none() {
            continue;
        }
        for child in ctx.child_dirs(&top)? {
            if let Some(score) = affix_score(ctx.requested, dir_name(&child)) {
                candidates.push(ctx.candidate(child, Strategy::PrefixSuffix, score));
            }
        }
    }
    Ok(candidates)
}

/// Directories at depth one and two whose names are close to `requested`.
pub fn similarity_match<R: Runtime>(
    ctx: &SearchContext<'_, R>,
) -> Result<Vec<ResolutionCandidate>> {
    let threshold = ctx.options.similarity_threshold;
    let mut candidates = Vec::new();
    let mut consider = |path: PathBuf| {
        let score = similarity(ctx.requested, dir_name(&path));
        if score >= threshold {
            candidates.push(ctx.candidate(path, Strategy::Similarity, score));
        }
    };

    for top in ctx.top_level_dirs()? {
        for child in ctx.child_dirs(&top)? {
            consider(child);
        }
        consider(top);
    }
    Ok(candidates)
}

/// First non-excluded top-level directory.
pub fn first_directory<R: Runtime>(
    ctx: &SearchContext<'_, R>,
) -> Result<Vec<ResolutionCandidate>> {
    Ok(ctx
        .top_level_dirs()?
        .into_iter()
        .take(1)
        .map(|path| ctx.candidate(path, Strategy::Fallback, 0.0))
        .collect())
}
