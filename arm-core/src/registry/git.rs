//! Registry backed by a git remote
//!
//! Tags that parse as semver are versions. Branches matching the configured
//! patterns are offered after them. There is no package inventory: a package
//! is whatever the include/exclude filters select from the tree.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{prepare_files, FilterKey};
use crate::cache::{GitRepoCache, RegistryCache, Storage};
use crate::glob;
use crate::package::{Package, PackageMetadata};
use crate::version::Version;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRegistryConfig {
    pub url: String,
    /// Branch name globs offered as versions, in priority order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,
}

#[derive(Debug)]
pub struct GitRegistry {
    name: String,
    config: GitRegistryConfig,
    repo: GitRepoCache,
    cache: RegistryCache,
}

impl GitRegistry {
    pub fn new(name: &str, config: GitRegistryConfig, storage: &Storage) -> Result<Self> {
        let cache = storage.registry_cache(&json!({
            "type": "git",
            "url": config.url,
        }))?;
        let repo = GitRepoCache::new(cache.repo_dir(), config.url.clone());

        Ok(Self {
            name: name.to_string(),
            config,
            repo,
            cache,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn list_packages(&self) -> Result<Vec<PackageMetadata>> {
        Ok(Vec::new())
    }

    /// Semver tags newest first, then matching branches in config order
    pub async fn list_package_versions(&self, _package: &str) -> Result<Vec<Version>> {
        let mut tags: Vec<_> = self
            .repo
            .get_tags()
            .await?
            .iter()
            .filter_map(|tag| match Version::parse(tag) {
                Ok(Version::Semver(v)) => Some(v),
                _ => None,
            })
            .collect();
        tags.sort_by(|a, b| b.cmp(a));

        let mut versions: Vec<Version> = tags.into_iter().map(Version::Semver).collect();

        if !self.config.branches.is_empty() {
            let branches = self.repo.get_branches().await?;
            let mut selected: Vec<&str> = Vec::new();
            for pattern in &self.config.branches {
                for branch in &branches {
                    if glob::matches(pattern, branch) && !selected.contains(&branch.as_str()) {
                        selected.push(branch.as_str());
                    }
                }
            }
            for branch in selected {
                versions.push(Version::parse(branch)?);
            }
        }

        Ok(versions)
    }

    pub async fn get_package(
        &self,
        package: &str,
        version: &Version,
        include: &[String],
        exclude: &[String],
    ) -> Result<Package> {
        let key = FilterKey::new(None, version, include, exclude);
        let metadata = PackageMetadata {
            registry_name: self.name.clone(),
            name: package.to_string(),
            version: version.clone(),
        };

        if version.is_semver() {
            match self.cache.get_package_version(&key, version).await {
                Ok(files) => {
                    tracing::debug!("Cache hit for {}", metadata);
                    return Ok(Package::new(metadata, files));
                }
                Err(e) => tracing::debug!("Cache miss for {}: {}", metadata, e),
            }
        }

        let raw = self.repo.get_files_from_commit(version.raw()).await?;
        let files = prepare_files(raw, include, exclude)?;

        if version.is_semver() {
            if let Err(e) = self.cache.set_package_version(&key, version, &files).await {
                tracing::warn!("Failed to cache {}: {}", metadata, e);
            }
        }

        Ok(Package::new(metadata, files))
    }
}
