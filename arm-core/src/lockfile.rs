//! Resolved versions and integrity (`arm-lock.json`)
//!
//! Entries are keyed `registry/package@version`. Each dependency has at most
//! one entry; upserting a new version replaces the old one.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ArmError;
use crate::sink::write_atomic;

pub const LOCKFILE_VERSION: u32 = 1;

fn default_version() -> u32 {
    LOCKFILE_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFile {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencyLock>,
}

impl Default for LockFile {
    fn default() -> Self {
        Self {
            version: LOCKFILE_VERSION,
            dependencies: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyLock {
    #[serde(default)]
    pub integrity: String,
}

/// A parsed lockfile key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedDependency {
    pub registry: String,
    pub package: String,
    pub version: String,
    pub lock: DependencyLock,
}

pub fn lock_key(registry: &str, package: &str, version: &str) -> String {
    format!("{registry}/{package}@{version}")
}

fn lock_prefix(registry: &str, package: &str) -> String {
    format!("{registry}/{package}@")
}

impl LockFile {
    /// The single locked entry for `registry/package`, if any
    pub fn find(&self, registry: &str, package: &str) -> Option<LockedDependency> {
        let prefix = lock_prefix(registry, package);
        self.dependencies.iter().find_map(|(key, lock)| {
            key.strip_prefix(&prefix).map(|version| LockedDependency {
                registry: registry.to_string(),
                package: package.to_string(),
                version: version.to_string(),
                lock: lock.clone(),
            })
        })
    }

    /// Every entry with its key split apart
    pub fn entries(&self) -> Vec<LockedDependency> {
        self.dependencies
            .iter()
            .filter_map(|(key, lock)| {
                let (name, version) = key.rsplit_once('@')?;
                let (registry, package) = name.split_once('/')?;
                Some(LockedDependency {
                    registry: registry.to_string(),
                    package: package.to_string(),
                    version: version.to_string(),
                    lock: lock.clone(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct LockFileManager {
    path: PathBuf,
}

impl LockFileManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file is an empty lockfile
    pub fn get_lock_file(&self) -> Result<LockFile> {
        if !self.path.exists() {
            return Ok(LockFile::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read lockfile: {}", self.path.display()))?;
        serde_json::from_str(&content).map_err(|e| {
            ArmError::parse(format!("lockfile {}", self.path.display()), e.to_string()).into()
        })
    }

    pub fn save(&self, lock_file: &LockFile) -> Result<()> {
        let mut content =
            serde_json::to_string_pretty(lock_file).context("Failed to serialize lockfile")?;
        content.push('\n');
        write_atomic(&self.path, content.as_bytes())
            .with_context(|| format!("Failed to write lockfile: {}", self.path.display()))
    }

    /// Entry for exactly `registry/package@version`
    pub fn get_dependency_lock(
        &self,
        registry: &str,
        package: &str,
        version: &str,
    ) -> Result<Option<DependencyLock>> {
        Ok(self
            .get_lock_file()?
            .dependencies
            .remove(&lock_key(registry, package, version)))
    }

    /// Entry for `registry/package` at whatever version is locked
    pub fn find_dependency_lock(
        &self,
        registry: &str,
        package: &str,
    ) -> Result<Option<LockedDependency>> {
        Ok(self.get_lock_file()?.find(registry, package))
    }

    /// Record `version` as the only locked version of `registry/package`
    pub fn upsert_dependency_lock(
        &self,
        registry: &str,
        package: &str,
        version: &str,
        lock: DependencyLock,
    ) -> Result<()> {
        let mut lock_file = self.get_lock_file()?;
        let prefix = lock_prefix(registry, package);
        lock_file.dependencies.retain(|key, _| !key.starts_with(&prefix));
        lock_file
            .dependencies
            .insert(lock_key(registry, package, version), lock);
        self.save(&lock_file)
    }

    /// Drop every entry for `registry/package`; `false` if there was none
    pub fn remove_dependency_lock(&self, registry: &str, package: &str) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let mut lock_file = self.get_lock_file()?;
        let prefix = lock_prefix(registry, package);
        let before = lock_file.dependencies.len();
        lock_file.dependencies.retain(|key, _| !key.starts_with(&prefix));
        if lock_file.dependencies.len() == before {
            return Ok(false);
        }
        self.save(&lock_file)?;
        Ok(true)
    }

    /// Rekey every `old/…` entry to `new/…`
    pub fn update_registry_name(&self, old: &str, new: &str) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let mut lock_file = self.get_lock_file()?;
        let prefix = format!("{old}/");
        lock_file.dependencies = std::mem::take(&mut lock_file.dependencies)
            .into_iter()
            .map(|(key, lock)| match key.strip_prefix(&prefix) {
                Some(rest) => (format!("{new}/{rest}"), lock),
                None => (key, lock),
            })
            .collect();
        self.save(&lock_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LockFileManager) {
        let temp_dir = TempDir::new().unwrap();
        let manager = LockFileManager::new(temp_dir.path().join("arm-lock.json"));
        (temp_dir, manager)
    }

    fn lock(integrity: &str) -> DependencyLock {
        DependencyLock {
            integrity: integrity.into(),
        }
    }

    #[test]
    fn test_upsert_keeps_single_version() {
        let (_temp, manager) = setup();
        manager.upsert_dependency_lock("reg", "pkg", "1.0.0", lock("sha256-a")).unwrap();
        manager.upsert_dependency_lock("reg", "pkg", "1.1.0", lock("sha256-b")).unwrap();
        manager.upsert_dependency_lock("reg", "pkg-extra", "3.0.0", lock("sha256-c")).unwrap();

        let lock_file = manager.get_lock_file().unwrap();
        let keys: Vec<&str> = lock_file.dependencies.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["reg/pkg-extra@3.0.0", "reg/pkg@1.1.0"]);

        let found = manager.find_dependency_lock("reg", "pkg").unwrap().unwrap();
        assert_eq!(found.version, "1.1.0");
        assert_eq!(found.lock.integrity, "sha256-b");
    }

    #[test]
    fn test_save_replaces_file_without_leftovers() {
        let (temp, manager) = setup();
        std::fs::write(manager.path(), "{ truncated").unwrap();
        assert!(manager.get_lock_file().is_err());

        let mut lock_file = LockFile::default();
        lock_file.dependencies.insert("reg/pkg@1.0.0".into(), lock("sha256-a"));
        manager.save(&lock_file).unwrap();

        assert_eq!(manager.get_lock_file().unwrap(), lock_file);
        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("arm-lock.json")]);
    }

    #[test]
    fn test_get_exact_version() {
        let (_temp, manager) = setup();
        manager.upsert_dependency_lock("reg", "pkg", "1.0.0", lock("sha256-a")).unwrap();
        assert_eq!(
            manager.get_dependency_lock("reg", "pkg", "1.0.0").unwrap(),
            Some(lock("sha256-a"))
        );
        assert_eq!(manager.get_dependency_lock("reg", "pkg", "2.0.0").unwrap(), None);
    }

    #[test]
    fn test_remove() {
        let (_temp, manager) = setup();
        assert!(!manager.remove_dependency_lock("reg", "pkg").unwrap());
        assert!(!manager.path().exists());

        manager.upsert_dependency_lock("reg", "pkg", "1.0.0", lock("x")).unwrap();
        assert!(manager.remove_dependency_lock("reg", "pkg").unwrap());
        assert!(manager.get_lock_file().unwrap().dependencies.is_empty());
    }

    #[test]
    fn test_rename_registry() {
        let (_temp, manager) = setup();
        manager.upsert_dependency_lock("old", "pkg", "1.0.0", lock("x")).unwrap();
        manager.upsert_dependency_lock("older", "pkg", "1.0.0", lock("y")).unwrap();
        manager.update_registry_name("old", "new").unwrap();

        let entries = manager.get_lock_file().unwrap().entries();
        let registries: Vec<&str> = entries.iter().map(|e| e.registry.as_str()).collect();
        assert_eq!(registries, vec!["new", "older"]);
    }

    #[test]
    fn test_json_shape() {
        let (_temp, manager) = setup();
        manager.upsert_dependency_lock("reg", "pkg", "v1.0.0", lock("sha256-a")).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(manager.path()).unwrap()).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["dependencies"]["reg/pkg@v1.0.0"]["integrity"], "sha256-a");
    }
}
