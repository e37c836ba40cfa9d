//! Install orchestration
//!
//! [`ArmService`] ties the manifest, lockfile, registries, cache and sinks
//! together. One dependency moves through resolve → fetch → integrity check
//! → manifest write → lockfile write → sink writes, strictly in that order.
//! Batch operations run items one after another and only fail when nothing
//! succeeded.

mod compile;

pub use compile::CompiledFile;

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Storage;
use crate::config::{ArmPaths, Credentials};
use crate::error::ArmError;
use crate::lockfile::{lock_key, DependencyLock, LockFileManager};
use crate::manifest::{
    dependency_key, split_dependency_key, DependencyConfig, Manifest, ManifestManager,
    PromptsetDependency, ResourceType, RulesetDependency,
};
use crate::package::{Package, PackageMetadata};
use crate::registry::Registry;
use crate::sink::{SinkConfig, SinkManager};
use crate::version::{resolve_version, Constraint, Version};

const LATEST: &str = "latest";

/// Result of installing one dependency
#[derive(Debug, Clone)]
pub struct InstalledPackage {
    pub metadata: PackageMetadata,
    pub integrity: String,
    pub sinks: Vec<String>,
    pub files: usize,
}

/// Per-item outcome of a batch operation
#[derive(Debug, Default, Clone, Serialize)]
pub struct BatchReport {
    /// `registry/package` keys that changed
    pub succeeded: Vec<String>,
    /// Keys that were already current
    pub skipped: Vec<String>,
    /// Keys with the error each one hit
    pub failed: Vec<(String, String)>,
}

impl BatchReport {
    fn record(&mut self, key: String, result: Result<bool>, last_error: &mut Option<anyhow::Error>) {
        match result {
            Ok(true) => self.succeeded.push(key),
            Ok(false) => self.skipped.push(key),
            Err(e) => {
                tracing::warn!("{}: {:#}", key, e);
                self.failed.push((key, format!("{e:#}")));
                *last_error = Some(e);
            }
        }
    }

    /// Fails with the last error only if every attempted item failed
    fn finish(self, last_error: Option<anyhow::Error>) -> Result<Self> {
        match last_error {
            Some(e) if self.succeeded.is_empty() && self.skipped.is_empty() => Err(e),
            _ => Ok(self),
        }
    }
}

/// One row of `outdated`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutdatedDependency {
    pub registry: String,
    pub package: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub constraint: String,
    pub current: Option<String>,
    pub wanted: Option<String>,
    pub latest: Option<String>,
}

/// One row of `list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyInfo {
    pub registry: String,
    pub package: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub constraint: String,
    pub locked: Option<String>,
    pub sinks: Vec<String>,
}

/// Fail when a non-empty locked integrity differs from the fetched one
pub fn verify_integrity(key: &str, locked: Option<&DependencyLock>, actual: &str) -> Result<()> {
    match locked {
        Some(lock) if !lock.integrity.is_empty() && lock.integrity != actual => {
            Err(ArmError::Integrity {
                key: key.to_string(),
                expected: lock.integrity.clone(),
                actual: actual.to_string(),
            }
            .into())
        }
        _ => Ok(()),
    }
}

/// Constraint written back after an upgrade
pub fn upgrade_constraint(version: &Version) -> String {
    match version.as_semver() {
        Some(v) => format!("^{}.0.0", v.major),
        None => version.raw().to_string(),
    }
}

pub struct ArmService {
    paths: ArmPaths,
    manifest: ManifestManager,
    lockfile: LockFileManager,
    storage: Storage,
    credentials: Arc<Credentials>,
}

impl ArmService {
    pub fn new(paths: ArmPaths) -> Self {
        Self {
            manifest: ManifestManager::new(paths.manifest_path()),
            lockfile: LockFileManager::new(paths.lockfile_path()),
            storage: paths.storage(),
            credentials: Arc::new(Credentials::new(paths.clone())),
            paths,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Arc::new(credentials);
        self
    }

    pub fn paths(&self) -> &ArmPaths {
        &self.paths
    }

    pub fn manifest(&self) -> &ManifestManager {
        &self.manifest
    }

    pub fn lockfile(&self) -> &LockFileManager {
        &self.lockfile
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn registry(&self, manifest: &Manifest, name: &str) -> Result<Registry> {
        let config = manifest
            .registries
            .get(name)
            .ok_or_else(|| ArmError::not_found("registry", name))?;
        Registry::from_config(name, config, &self.storage, Arc::clone(&self.credentials))
    }

    fn sink_manager(&self, config: &SinkConfig) -> SinkManager {
        SinkManager::new(self.paths.resolve(&config.directory), config.tool)
    }

    fn sinks_for<'a>(&self, manifest: &'a Manifest, names: &[String]) -> Result<Vec<(String, &'a SinkConfig)>> {
        if names.is_empty() {
            anyhow::bail!(ArmError::validation("dependency", "at least one sink is required"));
        }
        names
            .iter()
            .map(|name| {
                manifest
                    .sinks
                    .get(name)
                    .map(|config| (name.clone(), config))
                    .ok_or_else(|| anyhow::Error::from(ArmError::not_found("sink", name.clone())))
            })
            .collect()
    }

    pub async fn install_ruleset(
        &self,
        registry: &str,
        package: &str,
        config: RulesetDependency,
    ) -> Result<InstalledPackage> {
        self.install_dependency(registry, package, DependencyConfig::Ruleset(config), None)
            .await
    }

    pub async fn install_promptset(
        &self,
        registry: &str,
        package: &str,
        config: PromptsetDependency,
    ) -> Result<InstalledPackage> {
        self.install_dependency(registry, package, DependencyConfig::Promptset(config), None)
            .await
    }

    /// Resolve (unless `resolved` is given), fetch, verify and materialise
    async fn install_dependency(
        &self,
        registry_name: &str,
        package_name: &str,
        config: DependencyConfig,
        resolved: Option<Version>,
    ) -> Result<InstalledPackage> {
        let manifest = self.manifest.load()?;
        let registry = self.registry(&manifest, registry_name)?;
        let sinks = self.sinks_for(&manifest, config.sinks())?;

        let version = match resolved {
            Some(version) => version,
            None => {
                let available = registry.list_package_versions(package_name).await?;
                resolve_version(config.version(), &available)?
            }
        };
        tracing::debug!(
            "Resolved {}/{} {} to {}",
            registry_name,
            package_name,
            config.version(),
            version
        );

        let package = registry
            .get_package(package_name, &version, config.include(), config.exclude())
            .await?;

        let key = lock_key(registry_name, package_name, version.raw());
        let locked = self
            .lockfile
            .get_dependency_lock(registry_name, package_name, version.raw())?;
        verify_integrity(&key, locked.as_ref(), &package.integrity)?;

        self.manifest
            .upsert_dependency(registry_name, package_name, config.clone())?;
        self.lockfile.upsert_dependency_lock(
            registry_name,
            package_name,
            version.raw(),
            DependencyLock {
                integrity: package.integrity.clone(),
            },
        )?;

        let mut files = 0;
        for (name, sink_config) in &sinks {
            let written = self
                .install_into_sink(sink_config, &config, &package)
                .await
                .with_context(|| format!("Failed to install {} into sink '{}'", key, name))?;
            files += written;
        }

        tracing::info!("Installed {} into {} sink(s)", key, sinks.len());
        Ok(InstalledPackage {
            metadata: package.metadata.clone(),
            integrity: package.integrity,
            sinks: sinks.into_iter().map(|(name, _)| name).collect(),
            files,
        })
    }

    async fn install_into_sink(
        &self,
        sink_config: &SinkConfig,
        config: &DependencyConfig,
        package: &Package,
    ) -> Result<usize> {
        let sink = self.sink_manager(sink_config);
        let written = match config {
            DependencyConfig::Ruleset(d) => sink.install_ruleset(package, d.priority).await?,
            DependencyConfig::Promptset(_) => sink.install_promptset(package).await?,
        };
        Ok(written.len())
    }

    /// Install every manifest dependency at its constraint
    pub async fn install_all(&self) -> Result<BatchReport> {
        let dependencies = self.manifest.get_dependencies()?;
        let mut report = BatchReport::default();
        let mut last_error = None;

        for (key, config) in dependencies {
            let result = async {
                let (registry, package) = split_dependency_key(&key)?;
                self.install_dependency(registry, package, config, None)
                    .await
                    .with_context(|| format!("Failed to install {key}"))?;
                Ok::<_, anyhow::Error>(true)
            }
            .await;
            report.record(key, result, &mut last_error);
        }

        report.finish(last_error)
    }

    fn targets(&self, keys: &[String]) -> Result<Vec<(String, DependencyConfig)>> {
        let mut dependencies = self.manifest.get_dependencies()?;
        if keys.is_empty() {
            return Ok(dependencies.into_iter().collect());
        }
        keys.iter()
            .map(|key| {
                let (registry, package) = split_dependency_key(key)?;
                let normalized = dependency_key(registry, package);
                dependencies
                    .remove(&normalized)
                    .map(|config| (normalized.clone(), config))
                    .ok_or_else(|| anyhow::Error::from(ArmError::not_found("dependency", normalized)))
            })
            .collect()
    }

    /// Re-resolve the recorded constraints of `keys`
    pub async fn update_packages(&self, keys: &[String]) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let mut last_error = None;
        for (key, config) in self.targets(keys)? {
            let result = self
                .update_dependency(&key, config)
                .await
                .with_context(|| format!("Failed to update {key}"));
            report.record(key, result, &mut last_error);
        }
        report.finish(last_error)
    }

    pub async fn update_all(&self) -> Result<BatchReport> {
        self.update_packages(&[]).await
    }

    async fn update_dependency(&self, key: &str, config: DependencyConfig) -> Result<bool> {
        let (registry_name, package_name) = split_dependency_key(key)?;
        let manifest = self.manifest.load()?;
        let registry = self.registry(&manifest, registry_name)?;

        let available = registry.list_package_versions(package_name).await?;
        let resolved = resolve_version(config.version(), &available)?;

        self.reinstall_if_changed(&manifest, registry_name, package_name, config, resolved)
            .await
    }

    /// Move to the newest available version and widen the constraint to it
    pub async fn upgrade_packages(&self, keys: &[String]) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let mut last_error = None;
        for (key, config) in self.targets(keys)? {
            let result = self
                .upgrade_dependency(&key, config)
                .await
                .with_context(|| format!("Failed to upgrade {key}"));
            report.record(key, result, &mut last_error);
        }
        report.finish(last_error)
    }

    pub async fn upgrade_all(&self) -> Result<BatchReport> {
        self.upgrade_packages(&[]).await
    }

    async fn upgrade_dependency(&self, key: &str, mut config: DependencyConfig) -> Result<bool> {
        let (registry_name, package_name) = split_dependency_key(key)?;
        let manifest = self.manifest.load()?;
        let registry = self.registry(&manifest, registry_name)?;

        let available = registry.list_package_versions(package_name).await?;
        let newest = resolve_version(LATEST, &available)?;
        config.set_version(upgrade_constraint(&newest));

        let changed = self
            .reinstall_if_changed(&manifest, registry_name, package_name, config.clone(), newest)
            .await?;
        if !changed {
            self.manifest
                .update_dependency_version(registry_name, package_name, config.version())?;
        }
        Ok(changed)
    }

    /// `false` when `resolved` is already the locked version
    async fn reinstall_if_changed(
        &self,
        manifest: &Manifest,
        registry_name: &str,
        package_name: &str,
        config: DependencyConfig,
        resolved: Version,
    ) -> Result<bool> {
        let locked = self.lockfile.find_dependency_lock(registry_name, package_name)?;
        if locked.as_ref().map(|l| l.version.as_str()) == Some(resolved.raw()) {
            tracing::debug!(
                "{}/{} already at {}",
                registry_name,
                package_name,
                resolved
            );
            return Ok(false);
        }

        self.uninstall_from_sinks(manifest, registry_name, package_name, config.sinks())
            .await?;
        self.lockfile
            .remove_dependency_lock(registry_name, package_name)?;
        self.install_dependency(registry_name, package_name, config, Some(resolved))
            .await?;
        Ok(true)
    }

    async fn uninstall_from_sinks(
        &self,
        manifest: &Manifest,
        registry_name: &str,
        package_name: &str,
        sinks: &[String],
    ) -> Result<()> {
        for name in sinks {
            let Some(config) = manifest.sinks.get(name) else {
                tracing::warn!("Sink '{}' is not configured; skipping", name);
                continue;
            };
            self.sink_manager(config)
                .uninstall(registry_name, package_name)
                .await
                .with_context(|| format!("Failed to uninstall from sink '{name}'"))?;
        }
        Ok(())
    }

    /// Remove sink output, lock entry and manifest entry for `keys`
    pub async fn uninstall_packages(&self, keys: &[String]) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let mut last_error = None;
        for (key, config) in self.targets(keys)? {
            let result = self
                .uninstall_dependency(&key, &config)
                .await
                .with_context(|| format!("Failed to uninstall {key}"));
            report.record(key, result, &mut last_error);
        }
        report.finish(last_error)
    }

    pub async fn uninstall_all(&self) -> Result<BatchReport> {
        self.uninstall_packages(&[]).await
    }

    async fn uninstall_dependency(&self, key: &str, config: &DependencyConfig) -> Result<bool> {
        let (registry_name, package_name) = split_dependency_key(key)?;
        let manifest = self.manifest.load()?;
        self.uninstall_from_sinks(&manifest, registry_name, package_name, config.sinks())
            .await?;
        self.lockfile
            .remove_dependency_lock(registry_name, package_name)?;
        self.manifest.remove_dependency(registry_name, package_name)?;
        tracing::info!("Uninstalled {}", key);
        Ok(true)
    }

    /// Dependencies whose locked version is behind their constraint or the registry
    pub async fn list_outdated(&self) -> Result<Vec<OutdatedDependency>> {
        let manifest = self.manifest.load()?;
        let lock_file = self.lockfile.get_lock_file()?;
        let mut outdated = Vec::new();
        let mut last_error = None;
        let mut checked = 0;

        for (key, config) in &manifest.dependencies {
            let result = async {
                let (registry_name, package_name) = split_dependency_key(key)?;
                let registry = self.registry(&manifest, registry_name)?;
                let available = registry.list_package_versions(package_name).await?;

                let current = lock_file
                    .find(registry_name, package_name)
                    .map(|l| l.version);
                let wanted = resolve_version(config.version(), &available)
                    .ok()
                    .map(|v| v.raw().to_string());
                let latest = available.first().map(|v| v.raw().to_string());

                Ok::<_, anyhow::Error>(OutdatedDependency {
                    registry: registry_name.to_string(),
                    package: package_name.to_string(),
                    resource_type: config.resource_type(),
                    constraint: config.version().to_string(),
                    current,
                    wanted,
                    latest,
                })
            }
            .await;

            match result {
                Ok(row) => {
                    checked += 1;
                    if row.wanted != row.current || row.latest != row.current {
                        outdated.push(row);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to check {}: {:#}", key, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if checked == 0 => Err(e),
            _ => Ok(outdated),
        }
    }

    /// Manifest dependencies with their locked versions
    pub fn list_dependencies(&self) -> Result<Vec<DependencyInfo>> {
        let manifest = self.manifest.load()?;
        let lock_file = self.lockfile.get_lock_file()?;

        manifest
            .dependencies
            .iter()
            .map(|(key, config)| {
                let (registry, package) = split_dependency_key(key)?;
                Ok(DependencyInfo {
                    registry: registry.to_string(),
                    package: package.to_string(),
                    resource_type: config.resource_type(),
                    constraint: config.version().to_string(),
                    locked: lock_file.find(registry, package).map(|l| l.version),
                    sinks: config.sinks().to_vec(),
                })
            })
            .collect()
    }

    /// Validate constraint text the way installs will interpret it
    pub fn check_constraint(constraint: &str) -> Result<Constraint> {
        Constraint::parse(constraint)
    }

    /// Rename a registry in the manifest and lockfile
    ///
    /// Sink output is namespaced by registry, so entries under the old name
    /// are removed from every sink; the next `install` writes them back
    /// under the new name.
    pub async fn rename_registry(&self, old: &str, new: &str) -> Result<()> {
        let manifest = self.manifest.load()?;
        if !manifest.registries.contains_key(old) {
            anyhow::bail!(ArmError::not_found("registry", old));
        }

        let prefix = format!("{old}/");
        for (key, config) in &manifest.dependencies {
            if let Some(package) = key.strip_prefix(&prefix) {
                self.uninstall_from_sinks(&manifest, old, package, config.sinks())
                    .await?;
            }
        }

        self.manifest.update_registry_config_name(old, new)?;
        self.lockfile.update_registry_name(old, new)?;
        tracing::info!("Renamed registry '{}' to '{}'", old, new);
        Ok(())
    }

    pub async fn clean_cache_by_age(&self, max_age: Duration) -> Result<usize> {
        self.storage.clean_by_age(max_age).await
    }

    pub async fn clean_cache_by_time_since_last_access(&self, max_idle: Duration) -> Result<usize> {
        self.storage.clean_by_last_access(max_idle).await
    }

    pub fn nuke_cache(&self) -> Result<()> {
        self.storage.nuke()
    }

    /// Remove orphaned files from every configured sink
    pub async fn clean_sinks(&self) -> Result<usize> {
        let mut removed = 0;
        for (name, config) in self.manifest.get_sinks()? {
            removed += self
                .sink_manager(&config)
                .clean()
                .await
                .with_context(|| format!("Failed to clean sink '{name}'"))?;
        }
        Ok(removed)
    }

    /// Remove all ARM output from every configured sink
    pub async fn nuke_sinks(&self) -> Result<()> {
        for (name, config) in self.manifest.get_sinks()? {
            self.sink_manager(&config)
                .nuke()
                .await
                .with_context(|| format!("Failed to nuke sink '{name}'"))?;
        }
        Ok(())
    }

    /// Resolve `path` against the working directory
    pub fn resolve_path(&self, path: impl AsRef<std::path::Path>) -> PathBuf {
        self.paths.resolve(path)
    }
}
