//! Package sources
//!
//! A [`Registry`] is built from a manifest [`RegistryConfig`] and exposes the
//! same three operations for every backend: list packages, list versions of
//! one package, and fetch one version filtered by include/exclude globs.

mod cloudsmith;
mod git;
mod gitlab;
mod http;

pub use cloudsmith::{CloudsmithRegistry, CloudsmithRegistryConfig, DEFAULT_CLOUDSMITH_URL};
pub use git::{GitRegistry, GitRegistryConfig};
pub use gitlab::{GitLabRegistry, GitLabRegistryConfig};
pub use http::HttpClient;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::archive;
use crate::cache::Storage;
use crate::config::Credentials;
use crate::glob;
use crate::key::normalize_patterns;
use crate::package::{File, Package, PackageMetadata};
use crate::version::Version;

/// Applied when neither include nor exclude patterns are configured
pub const DEFAULT_INCLUDE: &[&str] = &["**/*.yml", "**/*.yaml"];

/// Backend configuration as stored in `arm.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RegistryConfig {
    Git(GitRegistryConfig),
    GitLab(GitLabRegistryConfig),
    Cloudsmith(CloudsmithRegistryConfig),
}

impl RegistryConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            RegistryConfig::Git(_) => "git",
            RegistryConfig::GitLab(_) => "gitlab",
            RegistryConfig::Cloudsmith(_) => "cloudsmith",
        }
    }

    pub fn url(&self) -> &str {
        match self {
            RegistryConfig::Git(c) => &c.url,
            RegistryConfig::GitLab(c) => &c.url,
            RegistryConfig::Cloudsmith(c) => &c.url,
        }
    }
}

impl fmt::Display for RegistryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.type_name(), self.url())
    }
}

#[derive(Debug)]
pub enum Registry {
    Git(GitRegistry),
    GitLab(GitLabRegistry),
    Cloudsmith(CloudsmithRegistry),
}

impl Registry {
    /// Build the backend for `config`, opening its cache under `storage`
    pub fn from_config(
        name: &str,
        config: &RegistryConfig,
        storage: &Storage,
        credentials: Arc<Credentials>,
    ) -> Result<Self> {
        Ok(match config {
            RegistryConfig::Git(c) => Registry::Git(GitRegistry::new(name, c.clone(), storage)?),
            RegistryConfig::GitLab(c) => Registry::GitLab(GitLabRegistry::new(
                name,
                c.clone(),
                storage,
                credentials,
            )?),
            RegistryConfig::Cloudsmith(c) => Registry::Cloudsmith(CloudsmithRegistry::new(
                name,
                c.clone(),
                storage,
                credentials,
            )?),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Registry::Git(r) => r.name(),
            Registry::GitLab(r) => r.name(),
            Registry::Cloudsmith(r) => r.name(),
        }
    }

    pub async fn list_packages(&self) -> Result<Vec<PackageMetadata>> {
        match self {
            Registry::Git(r) => r.list_packages().await,
            Registry::GitLab(r) => r.list_packages().await,
            Registry::Cloudsmith(r) => r.list_packages().await,
        }
    }

    /// Available versions, best candidate first
    pub async fn list_package_versions(&self, package: &str) -> Result<Vec<Version>> {
        match self {
            Registry::Git(r) => r.list_package_versions(package).await,
            Registry::GitLab(r) => r.list_package_versions(package).await,
            Registry::Cloudsmith(r) => r.list_package_versions(package).await,
        }
    }

    pub async fn get_package(
        &self,
        package: &str,
        version: &Version,
        include: &[String],
        exclude: &[String],
    ) -> Result<Package> {
        match self {
            Registry::Git(r) => r.get_package(package, version, include, exclude).await,
            Registry::GitLab(r) => r.get_package(package, version, include, exclude).await,
            Registry::Cloudsmith(r) => r.get_package(package, version, include, exclude).await,
        }
    }
}

/// Exclude wins over include; with no patterns at all only YAML is kept
pub fn matches_patterns(path: &str, include: &[String], exclude: &[String]) -> bool {
    if include.is_empty() && exclude.is_empty() {
        return DEFAULT_INCLUDE.iter().any(|p| glob::matches(p, path));
    }

    if glob::matches_any(exclude, path) {
        return false;
    }

    include.is_empty() || glob::matches_any(include, path)
}

/// Expand archives, then apply the include/exclude filter
pub fn prepare_files(files: Vec<File>, include: &[String], exclude: &[String]) -> Result<Vec<File>> {
    let merged = archive::extract_and_merge(files)?;
    Ok(merged
        .into_iter()
        .filter(|f| matches_patterns(&f.path, include, exclude))
        .collect())
}

/// Package cache key shared by backends that do not scope entries by name
#[derive(Debug, Serialize)]
struct FilterKey<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    package: Option<&'a str>,
    version: &'a str,
    include: Vec<String>,
    exclude: Vec<String>,
}

impl<'a> FilterKey<'a> {
    fn new(package: Option<&'a str>, version: &'a Version, include: &[String], exclude: &[String]) -> Self {
        Self {
            package,
            version: version.raw(),
            include: normalize_patterns(include),
            exclude: normalize_patterns(exclude),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_include_keeps_yaml_only() {
        assert!(matches_patterns("rule.yml", &[], &[]));
        assert!(matches_patterns("nested/rule.yaml", &[], &[]));
        assert!(!matches_patterns("readme.md", &[], &[]));
        assert!(!matches_patterns("config.json", &[], &[]));
    }

    #[test]
    fn test_exclude_before_include() {
        let include = patterns(&["rules/**"]);
        let exclude = patterns(&["rules/internal/**"]);
        assert!(matches_patterns("rules/a.yml", &include, &exclude));
        assert!(!matches_patterns("rules/internal/b.yml", &include, &exclude));
        assert!(!matches_patterns("other/c.yml", &include, &exclude));
    }

    #[test]
    fn test_exclude_only_keeps_everything_else() {
        let exclude = patterns(&["**/*.md"]);
        assert!(matches_patterns("config.json", &[], &exclude));
        assert!(!matches_patterns("docs/readme.md", &[], &exclude));
    }

    #[test]
    fn test_registry_config_serde_tags() {
        let json = r#"{"type":"gitlab","url":"gitlab.example.com","projectId":"42"}"#;
        let config: RegistryConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.type_name(), "gitlab");

        let git = RegistryConfig::Git(GitRegistryConfig {
            url: "https://github.com/o/r".into(),
            branches: vec![],
        });
        let value = serde_json::to_value(&git).unwrap();
        assert_eq!(value["type"], "git");
        assert_eq!(value["url"], "https://github.com/o/r");
        assert!(value.get("branches").is_none());
    }

    #[test]
    fn test_filter_key_ignores_pattern_order() {
        let v = Version::parse("1.0.0").unwrap();
        let a = FilterKey::new(None, &v, &patterns(&["b/**", " a/** "]), &[]);
        let b = FilterKey::new(None, &v, &patterns(&["a/**", "b/**"]), &[]);
        assert_eq!(
            crate::key::generate_key(&a).unwrap(),
            crate::key::generate_key(&b).unwrap()
        );
    }
}
