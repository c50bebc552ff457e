//! File system operations (read, write, directory, tree copy).

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::RealRuntime;

impl RealRuntime {
    #[tracing::instrument(skip(self, contents))]
    pub(crate) fn write_impl(&self, path: &Path, contents: &[u8]) -> Result<()> {
        fs::write(path, contents).with_context(|| format!("Failed to write {:?}", path))
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn read_to_string_impl(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).context("Failed to read file to string")
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn rename_impl(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)
            .with_context(|| format!("Failed to rename {:?} to {:?}", from, to))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn create_dir_all_impl(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory {:?}", path))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn remove_file_impl(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).context("Failed to remove file")?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn remove_dir_all_impl(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path).context("Failed to remove directory and its contents")?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn exists_impl(&self, path: &Path) -> bool {
        path.exists()
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn is_dir_impl(&self, path: &Path) -> bool {
        path.is_dir()
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn is_file_impl(&self, path: &Path) -> bool {
        path.is_file()
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn read_dir_impl(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(path)
            .with_context(|| format!("Failed to read directory {:?}", path))?
            .map(|entry| Ok(entry?.path()))
            .collect::<Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn modified_impl(&self, path: &Path) -> Result<SystemTime> {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to read modification time of {:?}", path))
    }

    /// Symlinks inside `from` are recreated as symlinks, never followed.
    #[tracing::instrument(skip(self))]
    pub(crate) fn copy_dir_all_impl(&self, from: &Path, to: &Path) -> Result<()> {
        fs::create_dir_all(to).with_context(|| format!("Failed to create directory {:?}", to))?;
        for entry in fs::read_dir(from).with_context(|| format!("Failed to read {:?}", from))? {
            let entry = entry?;
            let src = entry.path();
            let dst = to.join(entry.file_name());
            let file_type = entry
                .file_type()
                .with_context(|| format!("Failed to inspect {:?}", src))?;
            if file_type.is_symlink() {
                copy_symlink(&src, &dst)?;
            } else if file_type.is_dir() {
                self.copy_dir_all_impl(&src, &dst)?;
            } else {
                fs::copy(&src, &dst)
                    .with_context(|| format!("Failed to copy {:?} to {:?}", src, dst))?;
            }
        }
        Ok(())
    }
}

fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src).with_context(|| format!("Failed to read symlink {:?}", src))?;

    #[cfg(unix)]
    let created = std::os::unix::fs::symlink(&link, dst);
    #[cfg(windows)]
    let created = if fs::metadata(src).map(|m| m.is_dir()).unwrap_or(false) {
        std::os::windows::fs::symlink_dir(&link, dst)
    } else {
        std::os::windows::fs::symlink_file(&link, dst)
    };

    created.with_context(|| format!("Failed to recreate symlink {:?} -> {:?}", dst, link))
}

#[cfg(test)]
mod tests {
    use crate::runtime::{RealRuntime, Runtime};
    use tempfile::tempdir;

    #[test]
    fn test_real_runtime_file_ops() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.txt");

        runtime.write(&file_path, b"hello").unwrap();
        assert!(runtime.exists(&file_path));
        assert!(runtime.is_file(&file_path));
        assert_eq!(runtime.read_to_string(&file_path).unwrap(), "hello");

        let new_path = dir.path().join("renamed.txt");
        runtime.rename(&file_path, &new_path).unwrap();
        assert!(!runtime.exists(&file_path));
        assert!(runtime.exists(&new_path));

        runtime.remove_file(&new_path).unwrap();
        assert!(!runtime.exists(&new_path));
    }

    #[test]
    fn test_read_dir_is_sorted() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        for name in ["zeta", "alpha", "mid"] {
            runtime.create_dir_all(&dir.path().join(name)).unwrap();
        }

        let entries = runtime.read_dir(dir.path()).unwrap();
        let names: Vec<_> = entries
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_copy_dir_all_copies_nested_tree() {
        let runtime = RealRuntime;
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let target = dst.path().join("copy");

        runtime
            .create_dir_all(&src.path().join("pkg/resources"))
            .unwrap();
        runtime
            .write(&src.path().join("pkg/__init__.py"), b"")
            .unwrap();
        runtime
            .write(&src.path().join("pkg/resources/data.txt"), b"data")
            .unwrap();

        runtime.copy_dir_all(src.path(), &target).unwrap();

        assert!(runtime.is_file(&target.join("pkg/__init__.py")));
        assert_eq!(
            runtime
                .read_to_string(&target.join("pkg/resources/data.txt"))
                .unwrap(),
            "data"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_dir_all_keeps_symlinks_as_links() {
        let runtime = RealRuntime;
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let target = dst.path().join("copy");

        // site/pkg/loop -> site, plus a dangling link and a relative one
        let pkg = src.path().join("pkg");
        runtime.create_dir_all(&pkg).unwrap();
        runtime.write(&pkg.join("mod.py"), b"x").unwrap();
        std::os::unix::fs::symlink(src.path(), pkg.join("loop")).unwrap();
        std::os::unix::fs::symlink(src.path().join("gone"), pkg.join("dangling")).unwrap();
        std::os::unix::fs::symlink("mod.py", pkg.join("alias.py")).unwrap();

        runtime.copy_dir_all(src.path(), &target).unwrap();

        let copied = target.join("pkg");
        assert!(runtime.is_file(&copied.join("mod.py")));
        for name in ["loop", "dangling", "alias.py"] {
            assert!(runtime.is_symlink(&copied.join(name)), "{name} was not kept as a link");
        }
        assert_eq!(runtime.read_link(&copied.join("loop")).unwrap(), src.path());
        assert_eq!(
            runtime.read_link(&copied.join("alias.py")).unwrap(),
            std::path::PathBuf::from("mod.py")
        );
    }

    #[test]
    fn test_modified_and_errors() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        assert!(runtime.modified(dir.path()).is_ok());

        let missing = dir.path().join("missing");
        assert!(runtime.modified(&missing).is_err());
        assert!(runtime.read_dir(&missing).is_err());
        assert!(runtime.read_to_string(&missing).is_err());
        assert!(runtime.remove_file(&missing).is_err());
    }
}
