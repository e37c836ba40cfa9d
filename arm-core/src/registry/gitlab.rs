//! Registry backed by GitLab generic packages

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::http::{ensure_protocol, HttpClient};
use super::{prepare_files, FilterKey};
use crate::cache::{RegistryCache, Storage};
use crate::config::Credentials;
use crate::error::ArmError;
use crate::package::{File, Package, PackageMetadata};
use crate::version::Version;

const PER_PAGE: usize = 100;
const DEFAULT_API_VERSION: &str = "v4";
const GENERIC: &str = "generic";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitLabRegistryConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope<'a> {
    Project(&'a str),
    Group(&'a str),
}

impl GitLabRegistryConfig {
    fn scope(&self) -> Result<Scope<'_>> {
        match (self.project_id.as_deref(), self.group_id.as_deref()) {
            (Some(id), _) if !id.is_empty() => Ok(Scope::Project(id)),
            (_, Some(id)) if !id.is_empty() => Ok(Scope::Group(id)),
            _ => Err(ArmError::validation(
                "gitlab registry",
                "either projectId or groupId must be set",
            )
            .into()),
        }
    }

    /// Section suffix under which `.armrc` holds the token
    pub fn auth_key(&self) -> Result<String> {
        let base = ensure_protocol(&self.url);
        let parsed = url::Url::parse(&base)
            .with_context(|| format!("Invalid GitLab URL: {}", self.url))?;
        let mut host = parsed.host_str().unwrap_or_default().to_string();
        if let Some(port) = parsed.port() {
            host = format!("{host}:{port}");
        }

        Ok(match self.scope()? {
            Scope::Project(id) => format!("{host}/project/{id}"),
            Scope::Group(id) => format!("{host}/group/{id}"),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GitLabPackage {
    id: u64,
    name: String,
    version: String,
    package_type: String,
    #[serde(default)]
    project_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct GitLabPackageFile {
    file_name: String,
}

#[derive(Debug)]
pub struct GitLabRegistry {
    name: String,
    config: GitLabRegistryConfig,
    base_url: String,
    credentials: Arc<Credentials>,
    cache: RegistryCache,
}

impl GitLabRegistry {
    pub fn new(
        name: &str,
        config: GitLabRegistryConfig,
        storage: &Storage,
        credentials: Arc<Credentials>,
    ) -> Result<Self> {
        config.scope()?;
        let base_url = ensure_protocol(&config.url);
        let cache = storage.registry_cache(&json!({
            "type": "gitlab",
            "url": base_url,
            "projectId": config.project_id,
            "groupId": config.group_id,
            "apiVersion": config.api_version(),
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

    fn api_base(&self) -> String {
        format!("{}/api/{}", self.base_url, self.config.api_version())
    }

    fn client(&self) -> Result<HttpClient> {
        let auth_key = self.config.auth_key()?;
        let token = self.credentials.token(&auth_key)?;
        HttpClient::new(auth_key, token.map(|t| format!("Bearer {t}")))
    }

    fn packages_url(&self) -> Result<String> {
        Ok(match self.config.scope()? {
            Scope::Project(id) => format!("{}/projects/{}/packages", self.api_base(), encode(id)),
            Scope::Group(id) => format!("{}/groups/{}/packages", self.api_base(), encode(id)),
        })
    }

    async fn generic_packages(&self, client: &HttpClient) -> Result<Vec<GitLabPackage>> {
        let packages: Vec<GitLabPackage> = paginate(client, &self.packages_url()?).await?;
        Ok(packages
            .into_iter()
            .filter(|p| p.package_type == GENERIC)
            .collect())
    }

    /// Each generic package name once, at its first listed version
    pub async fn list_packages(&self) -> Result<Vec<PackageMetadata>> {
        let client = self.client()?;
        let mut seen = std::collections::HashSet::new();
        let mut result = Vec::new();
        for package in self.generic_packages(&client).await? {
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

    /// Versions in API order
    pub async fn list_package_versions(&self, package: &str) -> Result<Vec<Version>> {
        let client = self.client()?;
        self.generic_packages(&client)
            .await?
            .into_iter()
            .filter(|p| p.name == package)
            .map(|p| Version::parse(&p.version))
            .collect()
    }

    pub async fn get_package(
        &self,
        package: &str,
        version: &Version,
        include: &[String],
        exclude: &[String],
    ) -> Result<Package> {
        let key = FilterKey::new(Some(package), version, include, exclude);
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
        let found = self
            .generic_packages(&client)
            .await?
            .into_iter()
            .find(|p| p.name == package && p.version == version.raw())
            .ok_or_else(|| ArmError::not_found("package", metadata.to_string()))?;

        let project_id = match (self.config.scope()?, found.project_id) {
            (_, Some(id)) => id.to_string(),
            (Scope::Project(id), None) => id.to_string(),
            (Scope::Group(_), None) => anyhow::bail!(ArmError::validation(
                "gitlab package",
                format!("{} has no project_id", metadata)
            )),
        };
        let project_base = format!("{}/projects/{}", self.api_base(), encode(&project_id));

        let package_files: Vec<GitLabPackageFile> = paginate(
            &client,
            &format!("{}/packages/{}/package_files", project_base, found.id),
        )
        .await?;

        let mut raw = Vec::with_capacity(package_files.len());
        for file in package_files {
            let url = format!(
                "{}/packages/generic/{}/{}/{}",
                project_base,
                encode(&found.name),
                encode(&found.version),
                encode(&file.file_name)
            );
            let content = client.get_bytes(&url).await?;
            raw.push(File::new(file.file_name, content));
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

impl GitLabRegistryConfig {
    fn api_version(&self) -> &str {
        self.api_version
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_API_VERSION)
    }
}

/// Follow `page=N` until a page comes back short
async fn paginate<T: serde::de::DeserializeOwned>(client: &HttpClient, url: &str) -> Result<Vec<T>> {
    let separator = if url.contains('?') { '&' } else { '?' };
    let mut items = Vec::new();
    let mut page = 1;
    loop {
        let page_url = format!("{url}{separator}page={page}&per_page={PER_PAGE}");
        let batch: Vec<T> = client.get_json(&page_url).await?;
        let len = batch.len();
        items.extend(batch);
        if len < PER_PAGE {
            return Ok(items);
        }
        page += 1;
    }
}

fn encode(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
