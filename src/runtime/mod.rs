//! Runtime abstraction for system operations.
//!
//! Every filesystem and environment access made by the resolver, cache and link
//! planner goes through [`Runtime`], so the components can run against a real
//! directory tree or a `MockRuntime`.
//!
//! # Structure
//!
//! - `path` - Lexical path helpers (normalize, is_path_under, depth_under)
//! - `env` - Environment variables and well-known directories
//! - `fs` - File system operations (read, write, directory, tree copy)
//! - `symlink` - Symlink operations (create, read, resolve, remove)

mod env;
mod fs;
pub mod path;
mod symlink;

use anyhow::Result;
use std::env as std_env;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub use path::{depth_under, is_path_under, is_plain_relative, normalize_path};

#[cfg_attr(test, mockall::automock)]
pub trait Runtime: Send + Sync {
    // Environment
    fn env_var(&self, key: &str) -> Result<String, std_env::VarError>;
    fn current_dir(&self) -> Result<PathBuf>;

    // File System
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn read_to_string(&self, path: &Path) -> Result<String>;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    fn create_dir_all(&self, path: &Path) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn remove_dir_all(&self, path: &Path) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;

    /// List the entries of a directory, sorted by path.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Last modification time of a path (following symlinks).
    fn modified(&self, path: &Path) -> Result<SystemTime>;

    /// Recursively copy the contents of `from` into `to`, creating `to` if needed.
    fn copy_dir_all(&self, from: &Path, to: &Path) -> Result<()>;

    // Symlinks
    fn symlink(&self, original: &Path, link: &Path) -> Result<()>;
    fn read_link(&self, path: &Path) -> Result<PathBuf>;

    /// Resolve a symlink to an absolute path (without recursively resolving symlinks).
    /// If the link target is relative, it is resolved relative to the link's parent directory.
    fn resolve_link(&self, path: &Path) -> Result<PathBuf>;

    /// Canonicalize a path by resolving all symlinks and returning the canonical absolute path.
    fn canonicalize(&self, path: &Path) -> Result<PathBuf>;

    /// True for symlinks, including broken ones.
    fn is_symlink(&self, path: &Path) -> bool;
    fn remove_symlink(&self, path: &Path) -> Result<()>;

    // Directories
    fn home_dir(&self) -> Option<PathBuf>;
    fn cache_dir(&self) -> Option<PathBuf>;
}

pub struct RealRuntime;

impl Runtime for RealRuntime {
    fn env_var(&self, key: &str) -> Result<String, std_env::VarError> {
        self.env_var_impl(key)
    }

    fn current_dir(&self) -> Result<PathBuf> {
        self.current_dir_impl()
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.write_impl(path, contents)
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.read_to_string_impl(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.rename_impl(from, to)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.create_dir_all_impl(path)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.remove_file_impl(path)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        self.remove_dir_all_impl(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.exists_impl(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.is_dir_impl(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.is_file_impl(path)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        self.read_dir_impl(path)
    }

    fn modified(&self, path: &Path) -> Result<SystemTime> {
        self.modified_impl(path)
    }

    fn copy_dir_all(&self, from: &Path, to: &Path) -> Result<()> {
        self.copy_dir_all_impl(from, to)
    }

    fn symlink(&self, original: &Path, link: &Path) -> Result<()> {
        self.symlink_impl(original, link)
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        self.read_link_impl(path)
    }

    fn resolve_link(&self, path: &Path) -> Result<PathBuf> {
        self.resolve_link_impl(path)
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        self.canonicalize_impl(path)
    }

    fn is_symlink(&self, path: &Path) -> bool {
        self.is_symlink_impl(path)
    }

    fn remove_symlink(&self, path: &Path) -> Result<()> {
        self.remove_symlink_impl(path)
    }

    fn home_dir(&self) -> Option<PathBuf> {
        self.home_dir_impl()
    }

    fn cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir_impl()
    }
}
