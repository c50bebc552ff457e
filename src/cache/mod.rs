//! On-disk cache of installed packages.
//!
//! Layout:
//!
//! ```text
//! <root>/
//!   <key>/            published install roots, one per CacheKey
//!   .staging/         in-progress installs, renamed into place when complete
//! ```
//!
//! The final `rename` is the only publication point, so a reader sees either no
//! slot or a complete one. Slots carry no metadata file; an empty or unreadable
//! slot is stale and treated as absent.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::runtime::Runtime;
use crate::spec::PackageSpec;

pub const STAGING_DIR: &str = ".staging";
const KEY_LEN: usize = 40;

/// Hex digest identifying a normalized [`PackageSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_spec(spec: &PackageSpec) -> Self {
        let mut hasher = Sha256::new();
        for field in [
            spec.kind().to_string(),
            spec.name(),
            spec.version_constraint().unwrap_or_default(),
            spec.module_override.clone().unwrap_or_default(),
        ] {
            hasher.update(field.as_bytes());
            hasher.update(b"\0");
        }
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(KEY_LEN);
        Self(digest)
    }

    /// Accept an existing slot name; anything that is not a key is rejected.
    pub fn from_slot_name(name: &str) -> Option<Self> {
        (name.len() == KEY_LEN && name.bytes().all(|b| b.is_ascii_hexdigit()))
            .then(|| Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub install_root: PathBuf,
    pub created_at: SystemTime,
}

pub struct CacheStore<'a, R: Runtime> {
    runtime: &'a R,
    root: PathBuf,
}

impl<'a, R: Runtime> CacheStore<'a, R> {
    pub fn new(runtime: &'a R, root: PathBuf) -> Self {
        Self { runtime, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn slot(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    fn unique_staging_path(&self, key: &CacheKey, tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        self.staging_root()
            .join(format!("{}-{}{}-{}", key, tag, std::process::id(), nanos))
    }

    /// Published install root for `key`, or `None` when absent or stale.
    #[tracing::instrument(skip(self))]
    pub fn lookup(&self, key: &CacheKey) -> Option<PathBuf> {
        let slot = self.slot(key);
        if !self.runtime.is_dir(&slot) {
            return None;
        }
        match self.runtime.read_dir(&slot) {
            Ok(children) if !children.is_empty() => Some(slot),
            Ok(_) => {
                debug!("Cache slot {:?} is empty, treating as stale", slot);
                None
            }
            Err(e) => {
                debug!("Cache slot {:?} is unreadable ({}), treating as stale", slot, e);
                None
            }
        }
    }

    /// Create a fresh staging directory for an install of `key`.
    #[tracing::instrument(skip(self))]
    pub fn stage(&self, key: &CacheKey) -> Result<PathBuf> {
        let staged = self.unique_staging_path(key, "");
        self.runtime
            .create_dir_all(&staged)
            .with_context(|| format!("Failed to create staging directory {:?}", staged))?;
        Ok(staged)
    }

    /// Publish a staged install as the slot for `key` and return the slot path.
    ///
    /// An existing slot is replaced, and put back if the new tree cannot be
    /// published. When another process publishes the same key first, the staged
    /// tree is discarded and the winner's slot is returned.
    #[tracing::instrument(skip(self))]
    pub fn store(&self, key: &CacheKey, staged: &Path) -> Result<PathBuf> {
        let slot = self.slot(key);
        self.runtime.create_dir_all(&self.root)?;

        let mut aside = if self.runtime.exists(&slot) {
            let aside = self.unique_staging_path(key, "old-");
            match self.runtime.rename(&slot, &aside) {
                Ok(()) => Some(aside),
                Err(e) => {
                    debug!("Could not move previous slot {:?} aside: {}", slot, e);
                    None
                }
            }
        } else {
            None
        };

        let published = match self.runtime.rename(staged, &slot) {
            Ok(()) => {
                info!("Cached {} at {:?}", key, slot);
                Ok(slot.clone())
            }
            Err(e) => match self.lookup(key) {
                Some(winner) => {
                    debug!("Lost publish race for {}, adopting {:?}", key, winner);
                    if let Err(e) = self.runtime.remove_dir_all(staged) {
                        warn!("Failed to remove staged install {:?}: {}", staged, e);
                    }
                    Ok(winner)
                }
                None => {
                    if let Some(previous) = aside.take() {
                        self.restore(&previous, &slot);
                    }
                    Err(e).with_context(|| {
                        format!("Failed to publish {:?} into cache slot {:?}", staged, slot)
                    })
                }
            },
        };

        if let Some(aside) = aside {
            if let Err(e) = self.runtime.remove_dir_all(&aside) {
                warn!("Failed to remove replaced cache slot {:?}: {}", aside, e);
            }
        }

        published
    }

    /// Move a slot that was set aside back into place. Left in staging if that fails.
    fn restore(&self, previous: &Path, slot: &Path) {
        match self.runtime.rename(previous, slot) {
            Ok(()) => debug!("Restored previous cache slot {:?}", slot),
            Err(e) => warn!(
                "Failed to restore previous cache slot {:?} from {:?}: {}",
                slot, previous, e
            ),
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        let install_root = self.lookup(key)?;
        let created_at = self.runtime.modified(&install_root).ok()?;
        Some(CacheEntry {
            key: key.clone(),
            install_root,
            created_at,
        })
    }

    /// All published entries, sorted by key.
    #[tracing::instrument(skip(self))]
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        if !self.runtime.is_dir(&self.root) {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for path in self.runtime.read_dir(&self.root)? {
            let key = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(CacheKey::from_slot_name);
            if let Some(entry) = key.and_then(|k| self.entry(&k)) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use crate::spec::{PackageSpec, Source, VersionConstraint};
    use std::fs;
    use tempfile::tempdir;

    fn pypi(name: &str, version: Option<&str>) -> PackageSpec {
        PackageSpec {
            source: Source::PyPi {
                name: name.to_string(),
                version: version.map(|v| v.parse::<VersionConstraint>().unwrap()),
            },
            module_override: None,
        }
    }

    fn staged_with_file(store: &CacheStore<RealRuntime>, key: &CacheKey, file: &str) -> PathBuf {
        let staged = store.stage(key).unwrap();
        fs::create_dir_all(staged.join("pkg")).unwrap();
        fs::write(staged.join("pkg").join(file), "x").unwrap();
        staged
    }

    #[test]
    fn test_key_is_stable_and_fixed_width() {
        let a = CacheKey::for_spec(&pypi("toolbelt", Some("==1.0")));
        let b = CacheKey::for_spec(&pypi("toolbelt", Some("==1.0")));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 40);
        assert!(CacheKey::from_slot_name(a.as_str()).is_some());
    }

    #[test]
    fn test_key_changes_with_every_field() {
        let base = pypi("toolbelt", Some("==1.0"));
        let base_key = CacheKey::for_spec(&base);

        let other_name = pypi("toolbelts", Some("==1.0"));
        let other_version = pypi("toolbelt", Some("==1.1"));
        let no_version = pypi("toolbelt", None);
        let with_module = base.clone().with_module_override("tb".to_string());
        let github = PackageSpec {
            source: Source::GitHub {
                owner: "toolbelt".into(),
                repo: "toolbelt".into(),
                reference: Some("==1.0".into()),
            },
            module_override: None,
        };

        for spec in [other_name, other_version, no_version, with_module, github] {
            assert_ne!(CacheKey::for_spec(&spec), base_key, "{spec}");
        }
    }

    #[test]
    fn test_key_fields_do_not_run_together() {
        // "ab" + "c" must not collide with "a" + "bc"
        let a = pypi("ab", None).with_module_override("c".into());
        let b = pypi("a", None).with_module_override("bc".into());
        assert_ne!(CacheKey::for_spec(&a), CacheKey::for_spec(&b));
    }

    #[test]
    fn test_from_slot_name_rejects_non_keys() {
        assert!(CacheKey::from_slot_name(".staging").is_none());
        assert!(CacheKey::from_slot_name("abc").is_none());
        assert!(CacheKey::from_slot_name(&"z".repeat(40)).is_none());
    }

    #[test]
    fn test_store_then_lookup_round_trip() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let store = CacheStore::new(&runtime, dir.path().join("cache"));
        let key = CacheKey::for_spec(&pypi("toolbelt", None));

        assert_eq!(store.lookup(&key), None);

        let staged = staged_with_file(&store, &key, "__init__.py");
        let slot = store.store(&key, &staged).unwrap();

        assert_eq!(slot, store.slot(&key));
        assert_eq!(store.lookup(&key), Some(slot.clone()));
        assert!(slot.join("pkg").join("__init__.py").exists());
        assert!(!staged.exists());
    }

    #[test]
    fn test_deleted_slot_is_absent_not_error() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let store = CacheStore::new(&runtime, dir.path().to_path_buf());
        let key = CacheKey::for_spec(&pypi("toolbelt", None));

        let staged = staged_with_file(&store, &key, "a.txt");
        let slot = store.store(&key, &staged).unwrap();
        fs::remove_dir_all(&slot).unwrap();

        assert_eq!(store.lookup(&key), None);
        assert_eq!(store.entry(&key), None);
    }

    #[test]
    fn test_empty_slot_is_stale() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let store = CacheStore::new(&runtime, dir.path().to_path_buf());
        let key = CacheKey::for_spec(&pypi("toolbelt", None));
        fs::create_dir_all(store.slot(&key)).unwrap();

        assert_eq!(store.lookup(&key), None);
    }

    #[test]
    fn test_store_overwrites_existing_slot() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let store = CacheStore::new(&runtime, dir.path().to_path_buf());
        let key = CacheKey::for_spec(&pypi("toolbelt", None));

        let first = staged_with_file(&store, &key, "old.txt");
        store.store(&key, &first).unwrap();
        let second = staged_with_file(&store, &key, "new.txt");
        let slot = store.store(&key, &second).unwrap();

        assert!(slot.join("pkg").join("new.txt").exists());
        assert!(!slot.join("pkg").join("old.txt").exists());
        // nothing left behind in staging
        assert!(fs::read_dir(dir.path().join(STAGING_DIR)).unwrap().next().is_none());
    }

    #[test]
    fn test_entries_lists_published_slots_only() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let store = CacheStore::new(&runtime, dir.path().to_path_buf());

        let key_a = CacheKey::for_spec(&pypi("alpha", None));
        let key_b = CacheKey::for_spec(&pypi("beta", None));
        let a = staged_with_file(&store, &key_a, "a");
        store.store(&key_a, &a).unwrap();
        let b = staged_with_file(&store, &key_b, "b");
        store.store(&key_b, &b).unwrap();
        // in-flight install is not an entry
        store.stage(&CacheKey::for_spec(&pypi("gamma", None))).unwrap();

        let entries = store.entries().unwrap();
        let mut expected = vec![key_a, key_b];
        expected.sort();
        let keys: Vec<_> = entries.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_entries_on_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let store = CacheStore::new(&runtime, dir.path().join("nope"));
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn test_store_adopts_winner_when_publish_races() {
        let mut runtime = MockRuntime::new();
        let root = PathBuf::from("/cache");
        let key = CacheKey::for_spec(&pypi("toolbelt", None));
        let slot = root.join(key.as_str());
        let staged = root.join(STAGING_DIR).join("mine");

        runtime.expect_create_dir_all().returning(|_| Ok(()));
        // No slot when we start, but another process publishes before our rename.
        runtime.expect_exists().returning(|_| false);
        runtime
            .expect_rename()
            .returning(|_, _| Err(anyhow::anyhow!("Directory not empty")));
        let slot_check = slot.clone();
        runtime
            .expect_is_dir()
            .returning(move |p| p == slot_check.as_path());
        runtime
            .expect_read_dir()
            .returning(|p| Ok(vec![p.join("pkg")]));
        let staged_check = staged.clone();
        runtime
            .expect_remove_dir_all()
            .withf(move |p| p == staged_check.as_path())
            .times(1)
            .returning(|_| Ok(()));

        let store = CacheStore::new(&runtime, root);
        assert_eq!(store.store(&key, &staged).unwrap(), slot);
    }

    #[test]
    fn test_store_fails_when_publish_fails_without_winner() {
        let mut runtime = MockRuntime::new();
        runtime.expect_create_dir_all().returning(|_| Ok(()));
        runtime.expect_exists().returning(|_| false);
        runtime
            .expect_rename()
            .returning(|_, _| Err(anyhow::anyhow!("Permission denied")));
        runtime.expect_is_dir().returning(|_| false);

        let store = CacheStore::new(&runtime, PathBuf::from("/cache"));
        let key = CacheKey::for_spec(&pypi("toolbelt", None));
        let err = store
            .store(&key, Path::new("/cache/.staging/mine"))
            .unwrap_err();
        assert!(format!("{err:#}").contains("Permission denied"));
    }

    #[test]
    fn test_failed_republish_keeps_previous_slot() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let store = CacheStore::new(&runtime, dir.path().to_path_buf());
        let key = CacheKey::for_spec(&pypi("toolbelt", None));

        let first = staged_with_file(&store, &key, "good.txt");
        let slot = store.store(&key, &first).unwrap();

        let missing = dir.path().join(STAGING_DIR).join("never-staged");
        assert!(store.store(&key, &missing).is_err());

        assert_eq!(store.lookup(&key), Some(slot.clone()));
        assert!(slot.join("pkg").join("good.txt").exists());
        assert!(fs::read_dir(dir.path().join(STAGING_DIR)).unwrap().next().is_none());
    }
}
