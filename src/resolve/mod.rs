//! Directory resolver.
//!
//! Finds the directory a user meant inside an installed package whose layout
//! is not known in advance. Strategies run in a fixed order and the first one
//! producing any candidate decides the result:
//!
//! 1. exact `root/<module>/<requested>`
//! 2. `requested` inside a top-level Python package (`__init__.py`)
//! 3. `requested` next to or inside a top-level `resources` folder
//! 4. prefix/suffix name matching
//! 5. edit-distance similarity
//! 6. first top-level directory
//!
//! Within a strategy the best candidate has the highest score, then the
//! shallowest depth, then the lexicographically smallest path.

mod similarity;
mod strategies;

pub use similarity::{affix_score, similarity};
pub use strategies::{SearchContext, cascade};

use anyhow::Result;
use log::debug;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::PkglinkError;
use crate::runtime::{Runtime, depth_under, is_plain_relative};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.6;

/// Directory names never considered as candidates.
pub const DEFAULT_IGNORED_NAMES: &[&str] = &[
    "__pycache__",
    "bin",
    "build",
    "dist",
    "node_modules",
    "site-packages",
];

/// Name suffixes of packaging metadata directories.
pub const DEFAULT_IGNORED_SUFFIXES: &[&str] = &[".dist-info", ".egg-info", ".data"];

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverOptions {
    pub similarity_threshold: f64,
    pub ignored_names: Vec<String>,
    pub ignored_suffixes: Vec<String>,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            ignored_names: DEFAULT_IGNORED_NAMES.iter().map(|s| s.to_string()).collect(),
            ignored_suffixes: DEFAULT_IGNORED_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ResolverOptions {
    /// Hidden directories, build artifacts and packaging metadata.
    pub fn is_excluded(&self, name: &str) -> bool {
        name.starts_with('.')
            || self.ignored_names.iter().any(|n| n == name)
            || self.ignored_suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    ExactMatch,
    PythonPackage,
    ResourceSibling,
    PrefixSuffix,
    Similarity,
    Fallback,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::ExactMatch => "exact-match",
            Strategy::PythonPackage => "python-package",
            Strategy::ResourceSibling => "resource-sibling",
            Strategy::PrefixSuffix => "prefix-suffix",
            Strategy::Similarity => "similarity",
            Strategy::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionCandidate {
    pub path: PathBuf,
    pub strategy: Strategy,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub path: PathBuf,
    pub strategy: Strategy,
}

pub struct DirectoryResolver<'a, R: Runtime> {
    runtime: &'a R,
    options: ResolverOptions,
}

impl<'a, R: Runtime> DirectoryResolver<'a, R> {
    pub fn new(runtime: &'a R, options: ResolverOptions) -> Self {
        Self { runtime, options }
    }

    /// Resolve `requested` under `root`, searching inside `module` first when given.
    #[tracing::instrument(skip(self))]
    pub fn resolve(&self, root: &Path, requested: &str, module: Option<&str>) -> Result<Resolution> {
        check_requested(requested)?;
        let not_found = || PkglinkError::Resolution {
            requested: requested.to_string(),
            root: root.to_path_buf(),
        };
        if !self.runtime.is_dir(root) {
            debug!("Install root {:?} is not a directory", root);
            return Err(not_found().into());
        }

        let ctx = SearchContext {
            runtime: self.runtime,
            root,
            requested,
            module,
            options: &self.options,
        };

        for (strategy, run) in cascade::<R>() {
            let candidates = run(&ctx)?;
            debug!("Strategy {} produced {} candidate(s)", strategy, candidates.len());
            if let Some(best) = pick_best(root, candidates) {
                debug!(
                    "Resolved {:?} via {} (score {:.2})",
                    best.path, best.strategy, best.score
                );
                return Ok(Resolution {
                    path: best.path,
                    strategy: best.strategy,
                });
            }
        }

        Err(not_found().into())
    }
}

/// `requested` must be a relative path that stays inside the install root.
fn check_requested(requested: &str) -> Result<(), PkglinkError> {
    let reason = if requested.trim().is_empty() {
        "directory name cannot be empty"
    } else if !is_plain_relative(requested) {
        "directory must be a relative path inside the package"
    } else {
        return Ok(());
    };
    Err(PkglinkError::spec_parse(requested, reason))
}

/// Highest score, then shallowest, then smallest path.
fn pick_best(root: &Path, candidates: Vec<ResolutionCandidate>) -> Option<ResolutionCandidate> {
    candidates.into_iter().min_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| depth_under(root, &a.path).cmp(&depth_under(root, &b.path)))
            .then_with(|| a.path.cmp(&b.path))
    })
}
