//! Registry backed by Cloudsmith raw packages

use anyhow::{Context, Result};
use reqwest::header::LINK;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cmp::Ordering;
use std::sync::Arc;

use super::http::{ensure_protocol, HttpClient};
use super::prepare_files;
use crate::cache::{RegistryCache, Storage};
use crate::config::Credentials;
use crate::error::ArmError;
use crate::key::normalize_patterns;
use crate::package::{File, Package, PackageMetadata};
use crate::version::Version;

pub const DEFAULT_CLOUDSMITH_URL: &str = "https://api.cloudsmith.io";
const RAW: &str = "raw";

fn default_url() -> String {
    DEFAULT_CLOUDSMITH_URL.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudsmithRegistryConfig {
    #[serde(default = "default_url")]
    pub url: String,
    pub owner: String,
    pub repository: String,
}

impl CloudsmithRegistryConfig {
    pub fn auth_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.url.trim_end_matches('/'),
            self.owner,
            self.repository
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CloudsmithPackage {
    name: String,
    version: String,
    format: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    cdn_url: Option<String>,
}

impl CloudsmithPackage {
    fn belongs_to(&self, package: &str) -> bool {
        self.format == RAW && (self.name == package || self.filename.starts_with(package))
    }
}

#[derive(Debug, Serialize)]
struct CloudsmithKey<'a> {
    registry: String,
    package: &'a str,
    include: Vec<String>,
    exclude: Vec<String>,
}

#[derive(Debug)]
pub struct CloudsmithRegistry {
    name: String,
    config: CloudsmithRegistryConfig,
    base_url: String,
    credentials: Arc<Credentials>,
    cache: RegistryCache,
}

impl CloudsmithRegistry {
    pub fn new(
        name: &str,
        config: CloudsmithRegistryConfig,
        storage: &Storage,
        credentials: Arc<Credentials>,
    ) -> Result<Self> {
        if config.owner.is_empty() || config.repository.is_empty() {
            anyhow::bail!(ArmError::validation(
                "cloudsmith registry",
                "owner and repository are required"
            ));
        }

        let url = if config.url.trim().is_empty() {
            DEFAULT_CLOUDSMITH_URL
        } else {
            config.url.as_str()
        };
        let base_url = ensure_protocol(url);
        let cache = storage.registry_cache(&json!({
            "type": "cloudsmith",
            "url": base_url,
            "owner": config.owner,
            "repository": config.repository,
        }))?;

        Ok(Self {
            name: name.to_string(),
            config,
            base_url,
            credentials,
            cache,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn client(&self) -> Result<HttpClient> {
        let auth_key = self.config.auth_key();
        let token = self.credentials.token(&auth_key)?;
        HttpClient::new(auth_key, token.map(|t| format!("Token {t}")))
    }

    /// Raw packages, following `Link: <…>; rel="next"` pages
    async fn raw_packages(&self, client: &HttpClient, query: Option<&str>) -> Result<Vec<CloudsmithPackage>> {
        let mut url = url::Url::parse(&format!(
            "{}/v1/packages/{}/{}/",
            self.base_url, self.config.owner, self.config.repository
        ))
        .with_context(|| format!("Invalid Cloudsmith URL: {}", self.base_url))?;
        if let Some(query) = query {
            url.query_pairs_mut().append_pair("query", query);
        }

        let mut packages = Vec::new();
        let mut next = Some(url);
        while let Some(current) = next.take() {
            let response = client.get(current.as_str()).await?;
            next = response
                .headers()
                .get(LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(next_link)
                .map(|link| current.join(&link))
                .transpose()
                .context("Invalid pagination link")?;

            let body = response
                .bytes()
                .await
                .with_context(|| format!("Failed to read response from {current}"))?;
            let page: Vec<CloudsmithPackage> = serde_json::from_slice(&body)
                .map_err(|e| ArmError::parse(format!("response from {current}"), e.to_string()))?;
            packages.extend(page.into_iter().filter(|p| p.format == RAW));
        }

        Ok(packages)
    }

    pub async fn list_packages(&self) -> Result<Vec<PackageMetadata>> {
        let client = self.client()?;
        let mut seen = std::collections::HashSet::new();
        let mut result = Vec::new();
        for package in self.raw_packages(&client, None).await? {
            if seen.insert(package.name.clone()) {
                result.push(PackageMetadata {
                    registry_name: self.name.clone(),
                    version: Version::parse(&package.version)?,
                    name: package.name,
                });
            }
        }
        Ok(result)
    }

    /// Semver newest first, then opaque versions alphabetically
    pub async fn list_package_versions(&self, package: &str) -> Result<Vec<Version>> {
        let client = self.client()?;
        let mut versions: Vec<Version> = Vec::new();
        for p in self.raw_packages(&client, Some(package)).await? {
            if !p.belongs_to(package) {
                continue;
            }
            let version = Version::parse(&p.version)?;
            if !versions.iter().any(|v| v.raw() == version.raw()) {
                versions.push(version);
            }
        }

        versions.sort_by(compare_listing);
        Ok(versions)
    }

    pub async fn get_package(
        &self,
        package: &str,
        version: &Version,
        include: &[String],
        exclude: &[String],
    ) -> Result<Package> {
        let key = CloudsmithKey {
            registry: format!("{}/{}", self.config.owner, self.config.repository),
            package,
            include: normalize_patterns(include),
            exclude: normalize_patterns(exclude),
        };
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

        let client = self.client()?;
        let matching: Vec<CloudsmithPackage> = self
            .raw_packages(&client, Some(package))
            .await?
            .into_iter()
            .filter(|p| p.belongs_to(package) && p.version == version.raw())
            .collect();

        if matching.is_empty() {
            anyhow::bail!(ArmError::not_found("package", metadata.to_string()));
        }

        let mut raw = Vec::with_capacity(matching.len());
        for p in matching {
            let Some(cdn_url) = p.cdn_url.as_deref().filter(|u| !u.is_empty()) else {
                tracing::warn!("Skipping {} without a download URL", p.filename);
                continue;
            };
            let content = client.get_bytes(cdn_url).await?;
            let path = if p.filename.is_empty() { p.name.clone() } else { p.filename.clone() };
            raw.push(File::new(path, content));
        }

        let files = prepare_files(raw, include, exclude)?;

        if version.is_semver() {
            if let Err(e) = self.cache.set_package_version(&key, version, &files).await {
                tracing::warn!("Failed to cache {}: {}", metadata, e);
            }
        }

        Ok(Package::new(metadata, files))
    }
}

fn compare_listing(a: &Version, b: &Version) -> Ordering {
    match (a.as_semver(), b.as_semver()) {
        (Some(a), Some(b)) => b.cmp(a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.raw().cmp(b.raw()),
    }
}

/// Target of the `rel="next"` entry in a Link header
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p == r#"rel="next""# || p == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}
