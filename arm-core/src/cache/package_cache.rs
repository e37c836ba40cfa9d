//! Content cache for one registry
//!
//! Every package subtree is guarded by a [`FileLock`]. Reads take the same
//! lock as writes because a hit refreshes `accessedAt`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

use crate::error::ArmError;
use crate::filelock::FileLock;
use crate::key::generate_key;
use crate::package::File;
use crate::version::Version;

const METADATA_FILE: &str = "metadata.json";
const FILES_DIR: &str = "files";
const PACKAGES_DIR: &str = "packages";

/// Timestamps kept next to each cached version
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMetadata {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
enum Timestamp {
    Updated,
    Accessed,
}

#[derive(Debug, Clone)]
pub struct RegistryCache {
    dir: PathBuf,
}

impl RegistryCache {
    /// Open the cache for `key` under `registries_dir`, recording the key in
    /// `metadata.json`
    pub fn open<K: Serialize + ?Sized>(registries_dir: &Path, key: &K) -> Result<Self> {
        let dir = registries_dir.join(generate_key(key)?);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create registry cache: {}", dir.display()))?;

        let metadata_path = dir.join(METADATA_FILE);
        if !metadata_path.exists() {
            write_json(&metadata_path, key)?;
        }

        Ok(Self { dir })
    }

    /// Wrap an existing cache directory
    pub fn from_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where a git registry keeps its working clone
    pub fn repo_dir(&self) -> PathBuf {
        self.dir.join("repo")
    }

    fn packages_dir(&self) -> PathBuf {
        self.dir.join(PACKAGES_DIR)
    }

    fn package_dir<K: Serialize + ?Sized>(&self, key: &K) -> Result<PathBuf> {
        Ok(self.packages_dir().join(generate_key(key)?))
    }

    fn version_dir(package_dir: &Path, version: &Version) -> Result<PathBuf> {
        let name = version.storage_name().ok_or_else(|| ArmError::Unsupported {
            what: "cache version",
            value: version.raw().to_string(),
        })?;
        Ok(package_dir.join(name))
    }

    /// Cached files for `key` at `version`; fails with `NotFound` on a miss
    pub async fn get_package_version<K: Serialize + ?Sized>(
        &self,
        key: &K,
        version: &Version,
    ) -> Result<Vec<File>> {
        let package_dir = self.package_dir(key)?;
        let version_dir = Self::version_dir(&package_dir, version)?;
        let _guard = FileLock::new(&package_dir).lock().await?;

        if !version_dir.is_dir() {
            anyhow::bail!(ArmError::not_found(
                "cached version",
                version.raw().to_string()
            ));
        }

        let files = read_files(&version_dir.join(FILES_DIR))?;

        if let Err(e) = touch_accessed(&version_dir) {
            tracing::debug!("Failed to refresh accessedAt: {}", e);
        }

        Ok(files)
    }

    /// Store `files` for `key` at `version`, replacing any previous content
    pub async fn set_package_version<K: Serialize + ?Sized>(
        &self,
        key: &K,
        version: &Version,
        files: &[File],
    ) -> Result<()> {
        let package_dir = self.package_dir(key)?;
        let version_dir = Self::version_dir(&package_dir, version)?;
        let _guard = FileLock::new(&package_dir).lock().await?;

        std::fs::create_dir_all(&package_dir)
            .with_context(|| format!("Failed to create package cache: {}", package_dir.display()))?;
        let package_metadata = package_dir.join(METADATA_FILE);
        if !package_metadata.exists() {
            write_json(&package_metadata, key)?;
        }

        if version_dir.exists() {
            std::fs::remove_dir_all(&version_dir).with_context(|| {
                format!("Failed to replace cached version: {}", version_dir.display())
            })?;
        }

        let files_dir = version_dir.join(FILES_DIR);
        std::fs::create_dir_all(&files_dir)?;
        for file in files {
            if file.path.split('/').any(|segment| segment == "..") {
                anyhow::bail!(ArmError::validation(
                    "cached file path",
                    file.path.clone()
                ));
            }
            let target = files_dir.join(&file.path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, &file.content)
                .with_context(|| format!("Failed to write cached file: {}", target.display()))?;
        }

        let now = Utc::now();
        write_json(
            &version_dir.join(METADATA_FILE),
            &VersionMetadata {
                version: version.raw().to_string(),
                created_at: now,
                updated_at: now,
                accessed_at: now,
            },
        )?;

        tracing::debug!(
            "Cached {} files for version {} in {}",
            files.len(),
            version,
            package_dir.display()
        );
        Ok(())
    }

    /// Cached versions of `key`, newest first
    pub fn list_package_versions<K: Serialize + ?Sized>(&self, key: &K) -> Result<Vec<Version>> {
        let package_dir = self.package_dir(key)?;
        let mut versions = version_dirs(&package_dir)?
            .into_iter()
            .filter_map(|(version, _)| version.as_semver().cloned())
            .collect::<Vec<_>>();
        versions.sort_by(|a, b| b.cmp(a));
        Ok(versions.into_iter().map(Version::Semver).collect())
    }

    pub async fn remove_package_version<K: Serialize + ?Sized>(
        &self,
        key: &K,
        version: &Version,
    ) -> Result<()> {
        let package_dir = self.package_dir(key)?;
        let version_dir = Self::version_dir(&package_dir, version)?;
        let _guard = FileLock::new(&package_dir).lock().await?;

        if version_dir.exists() {
            std::fs::remove_dir_all(&version_dir).with_context(|| {
                format!("Failed to remove cached version: {}", version_dir.display())
            })?;
        }
        Ok(())
    }

    pub async fn remove_package<K: Serialize + ?Sized>(&self, key: &K) -> Result<()> {
        let package_dir = self.package_dir(key)?;
        let _guard = FileLock::new(&package_dir).lock().await?;

        if package_dir.exists() {
            std::fs::remove_dir_all(&package_dir).with_context(|| {
                format!("Failed to remove cached package: {}", package_dir.display())
            })?;
        }
        Ok(())
    }

    /// Remove the whole registry cache
    pub fn remove(&self) -> Result<()> {
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)
                .with_context(|| format!("Failed to remove cache: {}", self.dir.display()))?;
        }
        Ok(())
    }

    /// Remove versions whose `updatedAt` is older than `max_age`
    pub async fn remove_old_versions(&self, max_age: Duration) -> Result<usize> {
        self.evict(max_age, Timestamp::Updated).await
    }

    /// Remove versions whose `accessedAt` is older than `max_idle`
    pub async fn remove_unused_versions(&self, max_idle: Duration) -> Result<usize> {
        self.evict(max_idle, Timestamp::Accessed).await
    }

    async fn evict(&self, threshold: Duration, field: Timestamp) -> Result<usize> {
        let packages_dir = self.packages_dir();
        if !packages_dir.exists() {
            return Ok(0);
        }

        let delta = chrono::Duration::from_std(threshold).context("Eviction threshold too large")?;
        let Some(cutoff) = Utc::now().checked_sub_signed(delta) else {
            return Ok(0);
        };

        let mut package_dirs = Vec::new();
        for entry in std::fs::read_dir(&packages_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                package_dirs.push(entry.path());
            }
        }

        let mut removed = 0;
        for package_dir in package_dirs {
            let _guard = FileLock::new(&package_dir).lock().await?;

            let versions = version_dirs(&package_dir)?;
            let mut remaining = versions.len();
            for (version, dir) in versions {
                let metadata: VersionMetadata = match read_json(&dir.join(METADATA_FILE)) {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        tracing::debug!("Skipping {}: {}", dir.display(), e);
                        continue;
                    }
                };

                let stamp = match field {
                    Timestamp::Updated => metadata.updated_at,
                    Timestamp::Accessed => metadata.accessed_at,
                };

                if stamp < cutoff {
                    std::fs::remove_dir_all(&dir).with_context(|| {
                        format!("Failed to evict cached version: {}", dir.display())
                    })?;
                    tracing::debug!("Evicted cached version {} from {}", version, package_dir.display());
                    removed += 1;
                    remaining -= 1;
                }
            }

            if remaining == 0 {
                std::fs::remove_dir_all(&package_dir).with_context(|| {
                    format!("Failed to remove empty package cache: {}", package_dir.display())
                })?;
            }
        }

        Ok(removed)
    }
}

/// `(version, dir)` for each `v<semver>` directory under `package_dir`
fn version_dirs(package_dir: &Path) -> Result<Vec<(Version, PathBuf)>> {
    if !package_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in std::fs::read_dir(package_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('v') {
            continue;
        }
        if let Ok(version @ Version::Semver(_)) = Version::parse(&name) {
            found.push((version, entry.path()));
        }
    }
    Ok(found)
}

fn read_files(files_dir: &Path) -> Result<Vec<File>> {
    let mut files = Vec::new();
    if !files_dir.exists() {
        return Ok(files);
    }

    for entry in WalkDir::new(files_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", files_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(files_dir)
            .context("Cached file outside its directory")?;
        let content = std::fs::read(entry.path())
            .with_context(|| format!("Failed to read cached file: {}", entry.path().display()))?;
        files.push(File::new(relative.to_string_lossy(), content));
    }
    Ok(files)
}

fn touch_accessed(version_dir: &Path) -> Result<()> {
    let path = version_dir.join(METADATA_FILE);
    let mut metadata: VersionMetadata = read_json(&path)?;
    metadata.accessed_at = Utc::now();
    write_json(&path, &metadata)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
