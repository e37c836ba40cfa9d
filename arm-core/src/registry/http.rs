//! Shared HTTP plumbing for the API-backed registries

use anyhow::{Context, Result};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Response;
use std::time::Duration;

use crate::error::ArmError;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    authorization: Option<String>,
    target: String,
}

impl HttpClient {
    /// `authorization` is the full header value, e.g. `Bearer <token>`
    pub fn new(target: impl Into<String>, authorization: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("arm/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            authorization,
            target: target.into(),
        })
    }

    /// GET `url`, mapping non-success statuses to [`ArmError`]
    pub async fn get(&self, url: &str) -> Result<Response> {
        let mut request = self.client.get(url);
        if let Some(value) = &self.authorization {
            let mut header =
                HeaderValue::from_str(value).context("Invalid authorization header value")?;
            header.set_sensitive(true);
            request = request.header(AUTHORIZATION, header);
        }

        tracing::debug!("GET {}", url);
        let response = request
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let message = if self.authorization.is_some() {
                format!("HTTP {} from {}", status.as_u16(), url)
            } else {
                format!(
                    "HTTP {} from {}; add a token under [registry {}] in .armrc",
                    status.as_u16(),
                    url,
                    self.target
                )
            };
            anyhow::bail!(ArmError::Auth {
                target: self.target.clone(),
                message,
            });
        }

        anyhow::bail!(ArmError::Http {
            status: status.as_u16(),
            url: url.to_string(),
            body: truncate(&body, 512),
        })
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.get(url).await?;
        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read response from {url}"))?;
        serde_json::from_slice(&body)
            .map_err(|e| ArmError::parse(format!("response from {url}"), e.to_string()).into())
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.get(url).await?;
        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to download {url}"))?;
        Ok(body.to_vec())
    }
}

/// Add `https://` when no scheme is present
pub fn ensure_protocol(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
