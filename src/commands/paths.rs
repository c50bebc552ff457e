use anyhow::{Context, Result};
use log::debug;
use std::path::PathBuf;

use crate::runtime::Runtime;

/// Cache root when none is configured: the platform cache dir, else `~/.cache`.
#[tracing::instrument(skip(runtime))]
pub fn default_cache_root<R: Runtime>(runtime: &R) -> Result<PathBuf> {
    let root = match runtime.cache_dir() {
        Some(dir) => dir.join("pkglink"),
        None => runtime
            .home_dir()
            .context("Could not find a cache or home directory")?
            .join(".cache")
            .join("pkglink"),
    };
    debug!("Default cache root: {:?}", root);
    Ok(root)
}
