//! Project manifest (`arm.json`)
//!
//! Declares registries, sinks and dependencies. Every mutation loads the
//! file, applies the change and writes it back; the file is created on the
//! first write.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ArmError;
use crate::registry::{
    CloudsmithRegistryConfig, GitLabRegistryConfig, GitRegistryConfig, RegistryConfig,
};
use crate::sink::{write_atomic, SinkConfig};

pub const MANIFEST_VERSION: u32 = 1;

/// Ruleset priority when none is given
pub const DEFAULT_PRIORITY: i64 = 100;

fn default_version() -> u32 {
    MANIFEST_VERSION
}

fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub registries: BTreeMap<String, RegistryConfig>,
    #[serde(default)]
    pub sinks: BTreeMap<String, SinkConfig>,
    /// Keyed by `registry/package`
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencyConfig>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            registries: BTreeMap::new(),
            sinks: BTreeMap::new(),
            dependencies: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesetDependency {
    pub version: String,
    #[serde(default)]
    pub sinks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptsetDependency {
    pub version: String,
    #[serde(default)]
    pub sinks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Ruleset,
    Promptset,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ResourceType::Ruleset => "ruleset",
            ResourceType::Promptset => "promptset",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DependencyConfig {
    Ruleset(RulesetDependency),
    Promptset(PromptsetDependency),
}

impl DependencyConfig {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            DependencyConfig::Ruleset(_) => ResourceType::Ruleset,
            DependencyConfig::Promptset(_) => ResourceType::Promptset,
        }
    }

    /// Constraint text
    pub fn version(&self) -> &str {
        match self {
            DependencyConfig::Ruleset(d) => &d.version,
            DependencyConfig::Promptset(d) => &d.version,
        }
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        match self {
            DependencyConfig::Ruleset(d) => d.version = version.into(),
            DependencyConfig::Promptset(d) => d.version = version.into(),
        }
    }

    pub fn sinks(&self) -> &[String] {
        match self {
            DependencyConfig::Ruleset(d) => &d.sinks,
            DependencyConfig::Promptset(d) => &d.sinks,
        }
    }

    fn sinks_mut(&mut self) -> &mut Vec<String> {
        match self {
            DependencyConfig::Ruleset(d) => &mut d.sinks,
            DependencyConfig::Promptset(d) => &mut d.sinks,
        }
    }

    pub fn include(&self) -> &[String] {
        match self {
            DependencyConfig::Ruleset(d) => &d.include,
            DependencyConfig::Promptset(d) => &d.include,
        }
    }

    pub fn exclude(&self) -> &[String] {
        match self {
            DependencyConfig::Ruleset(d) => &d.exclude,
            DependencyConfig::Promptset(d) => &d.exclude,
        }
    }

    pub fn priority(&self) -> Option<i64> {
        match self {
            DependencyConfig::Ruleset(d) => Some(d.priority),
            DependencyConfig::Promptset(_) => None,
        }
    }
}

/// `registry/package`
pub fn dependency_key(registry: &str, package: &str) -> String {
    format!("{registry}/{package}")
}

/// Split `registry/package` at the first `/`
pub fn split_dependency_key(key: &str) -> Result<(&str, &str)> {
    match key.split_once('/') {
        Some((registry, package)) if !registry.is_empty() && !package.is_empty() => {
            Ok((registry, package))
        }
        _ => Err(ArmError::validation(
            "dependency",
            format!("'{key}' is not of the form registry/package"),
        )
        .into()),
    }
}

fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        anyhow::bail!(ArmError::validation(format!("{what} name"), "name is empty"));
    }
    if name.contains('/') {
        anyhow::bail!(ArmError::validation(
            format!("{what} name"),
            format!("'{name}' must not contain '/'")
        ));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ManifestManager {
    path: PathBuf,
}

impl ManifestManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file is an empty manifest
    pub fn load(&self) -> Result<Manifest> {
        if !self.path.exists() {
            return Ok(Manifest::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read manifest: {}", self.path.display()))?;
        serde_json::from_str(&content).map_err(|e| {
            ArmError::parse(format!("manifest {}", self.path.display()), e.to_string()).into()
        })
    }

    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        let mut content =
            serde_json::to_string_pretty(manifest).context("Failed to serialize manifest")?;
        content.push('\n');
        write_atomic(&self.path, content.as_bytes())
            .with_context(|| format!("Failed to write manifest: {}", self.path.display()))
    }

    fn modify<T>(&self, change: impl FnOnce(&mut Manifest) -> Result<T>) -> Result<T> {
        let mut manifest = self.load()?;
        let result = change(&mut manifest)?;
        self.save(&manifest)?;
        Ok(result)
    }

    // Registries

    pub fn get_registries(&self) -> Result<BTreeMap<String, RegistryConfig>> {
        Ok(self.load()?.registries)
    }

    pub fn get_registry(&self, name: &str) -> Result<RegistryConfig> {
        self.load()?
            .registries
            .remove(name)
            .ok_or_else(|| ArmError::not_found("registry", name).into())
    }

    pub fn get_git_registry_config(&self, name: &str) -> Result<GitRegistryConfig> {
        match self.get_registry(name)? {
            RegistryConfig::Git(config) => Ok(config),
            other => Err(wrong_type(name, "git", &other)),
        }
    }

    pub fn get_gitlab_registry_config(&self, name: &str) -> Result<GitLabRegistryConfig> {
        match self.get_registry(name)? {
            RegistryConfig::GitLab(config) => Ok(config),
            other => Err(wrong_type(name, "gitlab", &other)),
        }
    }

    pub fn get_cloudsmith_registry_config(&self, name: &str) -> Result<CloudsmithRegistryConfig> {
        match self.get_registry(name)? {
            RegistryConfig::Cloudsmith(config) => Ok(config),
            other => Err(wrong_type(name, "cloudsmith", &other)),
        }
    }

    /// Add a registry; `force` replaces an existing one
    pub fn add_registry(&self, name: &str, config: RegistryConfig, force: bool) -> Result<()> {
        validate_name("registry", name)?;
        self.modify(|manifest| {
            if manifest.registries.contains_key(name) && !force {
                anyhow::bail!(ArmError::validation(
                    "registry",
                    format!("'{name}' already exists (use --force to replace it)")
                ));
            }
            manifest.registries.insert(name.to_string(), config);
            Ok(())
        })
    }

    pub fn remove_registry(&self, name: &str) -> Result<()> {
        self.modify(|manifest| {
            manifest
                .registries
                .remove(name)
                .ok_or_else(|| ArmError::not_found("registry", name))?;
            Ok(())
        })
    }

    /// Rename a registry and rekey every `old/…` dependency
    pub fn update_registry_config_name(&self, old: &str, new: &str) -> Result<()> {
        validate_name("registry", new)?;
        self.modify(|manifest| {
            if manifest.registries.contains_key(new) {
                anyhow::bail!(ArmError::validation(
                    "registry",
                    format!("'{new}' already exists")
                ));
            }
            let config = manifest
                .registries
                .remove(old)
                .ok_or_else(|| ArmError::not_found("registry", old))?;
            manifest.registries.insert(new.to_string(), config);

            let prefix = format!("{old}/");
            let renamed: Vec<String> = manifest
                .dependencies
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect();
            for key in renamed {
                if let Some(dep) = manifest.dependencies.remove(&key) {
                    let package = &key[prefix.len()..];
                    manifest.dependencies.insert(dependency_key(new, package), dep);
                }
            }
            Ok(())
        })
    }

    // Sinks

    pub fn get_sinks(&self) -> Result<BTreeMap<String, SinkConfig>> {
        Ok(self.load()?.sinks)
    }

    pub fn get_sink(&self, name: &str) -> Result<SinkConfig> {
        self.load()?
            .sinks
            .remove(name)
            .ok_or_else(|| ArmError::not_found("sink", name).into())
    }

    pub fn add_sink(&self, name: &str, config: SinkConfig, force: bool) -> Result<()> {
        validate_name("sink", name)?;
        if config.directory.trim().is_empty() {
            anyhow::bail!(ArmError::validation("sink", "directory is empty"));
        }
        self.modify(|manifest| {
            if manifest.sinks.contains_key(name) && !force {
                anyhow::bail!(ArmError::validation(
                    "sink",
                    format!("'{name}' already exists (use --force to replace it)")
                ));
            }
            manifest.sinks.insert(name.to_string(), config);
            Ok(())
        })
    }

    /// Remove a sink and drop it from every dependency's sink list
    pub fn remove_sink(&self, name: &str) -> Result<()> {
        self.modify(|manifest| {
            manifest
                .sinks
                .remove(name)
                .ok_or_else(|| ArmError::not_found("sink", name))?;
            for dep in manifest.dependencies.values_mut() {
                dep.sinks_mut().retain(|s| s != name);
            }
            Ok(())
        })
    }

    // Dependencies

    pub fn get_dependencies(&self) -> Result<BTreeMap<String, DependencyConfig>> {
        Ok(self.load()?.dependencies)
    }

    pub fn get_dependency(&self, registry: &str, package: &str) -> Result<DependencyConfig> {
        let key = dependency_key(registry, package);
        self.load()?
            .dependencies
            .remove(&key)
            .ok_or_else(|| ArmError::not_found("dependency", key).into())
    }

    pub fn upsert_dependency(
        &self,
        registry: &str,
        package: &str,
        config: DependencyConfig,
    ) -> Result<()> {
        self.modify(|manifest| {
            manifest
                .dependencies
                .insert(dependency_key(registry, package), config);
            Ok(())
        })
    }

    pub fn update_dependency_version(
        &self,
        registry: &str,
        package: &str,
        version: &str,
    ) -> Result<()> {
        let key = dependency_key(registry, package);
        self.modify(|manifest| {
            manifest
                .dependencies
                .get_mut(&key)
                .ok_or_else(|| ArmError::not_found("dependency", key.clone()))?
                .set_version(version);
            Ok(())
        })
    }

    pub fn remove_dependency(&self, registry: &str, package: &str) -> Result<()> {
        let key = dependency_key(registry, package);
        self.modify(|manifest| {
            manifest
                .dependencies
                .remove(&key)
                .ok_or_else(|| ArmError::not_found("dependency", key.clone()))?;
            Ok(())
        })
    }
}

fn wrong_type(name: &str, expected: &str, actual: &RegistryConfig) -> anyhow::Error {
    ArmError::validation(
        "registry",
        format!(
            "'{name}' is a {} registry, not {expected}",
            actual.type_name()
        ),
    )
    .into()
}
