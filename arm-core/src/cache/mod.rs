//! Local storage under `~/.arm/storage`
//!
//! ```text
//! registries/<registryHash>/
//!     metadata.json                      ← registry-identifying fields
//!     repo/                              ← git clone (git registries)
//!     packages/<packageKeyHash>/
//!         metadata.json                  ← package key
//!         v1.2.3/metadata.json           ← timestamps
//!         v1.2.3/files/...               ← cached file bytes
//! ```

mod git_repo;
mod package_cache;

pub use git_repo::GitRepoCache;
pub use package_cache::{RegistryCache, VersionMetadata};

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root of all registry caches
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registries_dir(&self) -> PathBuf {
        self.root.join("registries")
    }

    /// Open (creating if needed) the cache for a registry identified by `key`
    pub fn registry_cache<K: Serialize + ?Sized>(&self, key: &K) -> Result<RegistryCache> {
        RegistryCache::open(&self.registries_dir(), key)
    }

    /// Every registry cache currently on disk
    pub fn registry_caches(&self) -> Result<Vec<RegistryCache>> {
        let dir = self.registries_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut caches = Vec::new();
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to read storage directory: {}", dir.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                caches.push(RegistryCache::from_dir(entry.path()));
            }
        }

        caches.sort_by(|a, b| a.dir().cmp(b.dir()));
        Ok(caches)
    }

    /// Drop cached versions not updated within `max_age`
    pub async fn clean_by_age(&self, max_age: Duration) -> Result<usize> {
        let mut removed = 0;
        for cache in self.registry_caches()? {
            removed += cache.remove_old_versions(max_age).await?;
        }
        Ok(removed)
    }

    /// Drop cached versions not read within `max_idle`
    pub async fn clean_by_last_access(&self, max_idle: Duration) -> Result<usize> {
        let mut removed = 0;
        for cache in self.registry_caches()? {
            removed += cache.remove_unused_versions(max_idle).await?;
        }
        Ok(removed)
    }

    /// Remove every registry cache
    pub fn nuke(&self) -> Result<()> {
        let dir = self.registries_dir();
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to remove storage: {}", dir.display()))?;
        }
        tracing::info!("Removed all cached registries under {}", dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::File;
    use crate::version::Version;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_registry_caches_enumerated_and_nuked() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path());

        let one = storage
            .registry_cache(&json!({"type": "git", "url": "https://a.example/repo.git"}))
            .unwrap();
        let two = storage
            .registry_cache(&json!({"type": "git", "url": "https://b.example/repo.git"}))
            .unwrap();
        assert_ne!(one.dir(), two.dir());

        let version = Version::parse("1.0.0").unwrap();
        one.set_package_version(&json!({"p": 1}), &version, &[File::new("a.yml", "a")])
            .await
            .unwrap();

        assert_eq!(storage.registry_caches().unwrap().len(), 2);

        storage.nuke().unwrap();
        assert!(storage.registry_caches().unwrap().is_empty());
    }

    #[test]
    fn test_same_registry_key_same_dir() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path());

        let one = storage
            .registry_cache(&json!({"url": "https://x", "type": "git"}))
            .unwrap();
        let two = storage
            .registry_cache(&json!({"type": "git", "url": "https://x"}))
            .unwrap();
        assert_eq!(one.dir(), two.dir());
        assert!(one.dir().join("metadata.json").exists());
    }
}
