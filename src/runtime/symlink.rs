//! Symlink operations (create, read, resolve, remove).

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::RealRuntime;
use super::path::normalize_path;

impl RealRuntime {
    /// Links always point at directories, so Windows gets a directory symlink.
    #[tracing::instrument(skip(self))]
    pub(crate) fn symlink_impl(&self, original: &Path, link: &Path) -> Result<()> {
        #[cfg(unix)]
        let created = std::os::unix::fs::symlink(original, link);
        #[cfg(windows)]
        let created = std::os::windows::fs::symlink_dir(original, link);

        created.with_context(|| format!("Failed to link {:?} -> {:?}", link, original))
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn read_link_impl(&self, path: &Path) -> Result<PathBuf> {
        fs::read_link(path).with_context(|| format!("Failed to read symlink {:?}", path))
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn resolve_link_impl(&self, path: &Path) -> Result<PathBuf> {
        let target = self.read_link_impl(path)?;
        if target.is_absolute() {
            return Ok(target);
        }
        let parent = path
            .parent()
            .with_context(|| format!("Symlink {:?} has no parent directory", path))?;
        Ok(normalize_path(&parent.join(target)))
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn canonicalize_impl(&self, path: &Path) -> Result<PathBuf> {
        fs::canonicalize(path).with_context(|| format!("Failed to canonicalize {:?}", path))
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn is_symlink_impl(&self, path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn remove_symlink_impl(&self, path: &Path) -> Result<()> {
        #[cfg(unix)]
        let removed = fs::remove_file(path);
        // Directory symlinks are removed as directories on Windows.
        #[cfg(windows)]
        let removed = fs::remove_dir(path).or_else(|_| fs::remove_file(path));

        removed.with_context(|| format!("Failed to remove symlink {:?}", path))
    }
}
