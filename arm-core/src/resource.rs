//! Ruleset and promptset documents
//!
//! Both kinds are YAML with `apiVersion`, `kind`, `metadata` and `spec`.
//! A file counts as a resource when it parses *and* validates as one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub const RULESET_KIND: &str = "Ruleset";
pub const PROMPTSET_KIND: &str = "Promptset";

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("invalid ruleset: {0}")]
    InvalidRuleset(String),

    #[error("invalid promptset: {0}")]
    InvalidPromptset(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// How strictly an assistant should apply a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforcement {
    Must,
    Should,
    Could,
    May,
}

impl Enforcement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Enforcement::Must => "must",
            Enforcement::Should => "should",
            Enforcement::Could => "could",
            Enforcement::May => "may",
        }
    }
}

impl fmt::Display for Enforcement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enforcement: Enforcement,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub scope: Vec<Scope>,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesetSpec {
    #[serde(default)]
    pub rules: BTreeMap<String, Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ruleset {
    pub api_version: String,
    pub kind: String,
    pub metadata: ResourceMetadata,
    pub spec: RulesetSpec,
}

impl Ruleset {
    /// Rule IDs in ascending order
    pub fn rule_ids(&self) -> impl Iterator<Item = &str> {
        self.spec.rules.keys().map(String::as_str)
    }

    pub fn validate(&self) -> Result<(), ResourceError> {
        if self.kind != RULESET_KIND {
            return Err(ResourceError::InvalidRuleset(format!(
                "kind must be '{RULESET_KIND}', got '{}'",
                self.kind
            )));
        }
        if self.metadata.id.trim().is_empty() {
            return Err(ResourceError::InvalidRuleset("metadata.id is required".into()));
        }
        if self.spec.rules.is_empty() {
            return Err(ResourceError::InvalidRuleset(
                "spec.rules must contain at least one rule".into(),
            ));
        }
        if let Some(id) = self.spec.rules.keys().find(|id| id.trim().is_empty()) {
            return Err(ResourceError::InvalidRuleset(format!("empty rule id '{id}'")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptsetSpec {
    #[serde(default)]
    pub prompts: BTreeMap<String, Prompt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Promptset {
    pub api_version: String,
    pub kind: String,
    pub metadata: ResourceMetadata,
    pub spec: PromptsetSpec,
}

impl Promptset {
    pub fn prompt_ids(&self) -> impl Iterator<Item = &str> {
        self.spec.prompts.keys().map(String::as_str)
    }

    pub fn validate(&self) -> Result<(), ResourceError> {
        if self.kind != PROMPTSET_KIND {
            return Err(ResourceError::InvalidPromptset(format!(
                "kind must be '{PROMPTSET_KIND}', got '{}'",
                self.kind
            )));
        }
        if self.metadata.id.trim().is_empty() {
            return Err(ResourceError::InvalidPromptset("metadata.id is required".into()));
        }
        if self.spec.prompts.is_empty() {
            return Err(ResourceError::InvalidPromptset(
                "spec.prompts must contain at least one prompt".into(),
            ));
        }
        if let Some(id) = self.spec.prompts.keys().find(|id| id.trim().is_empty()) {
            return Err(ResourceError::InvalidPromptset(format!("empty prompt id '{id}'")));
        }
        Ok(())
    }
}

/// Either kind of resource document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceDocument {
    Ruleset(Ruleset),
    Promptset(Promptset),
}

pub fn parse_ruleset(content: &[u8]) -> Result<Ruleset, ResourceError> {
    let ruleset: Ruleset = serde_yaml_ng::from_slice(content)?;
    ruleset.validate()?;
    Ok(ruleset)
}

pub fn parse_promptset(content: &[u8]) -> Result<Promptset, ResourceError> {
    let promptset: Promptset = serde_yaml_ng::from_slice(content)?;
    promptset.validate()?;
    Ok(promptset)
}

/// `.yml` / `.yaml`, any case
pub fn has_yaml_extension(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".yml") || lower.ends_with(".yaml")
}

/// Classify a file, or `None` when it is neither kind
pub fn parse_resource(path: &str, content: &[u8]) -> Option<ResourceDocument> {
    if !has_yaml_extension(path) {
        return None;
    }
    if let Ok(ruleset) = parse_ruleset(content) {
        return Some(ResourceDocument::Ruleset(ruleset));
    }
    parse_promptset(content).ok().map(ResourceDocument::Promptset)
}

pub fn is_resource_file(path: &str, content: &[u8]) -> bool {
    parse_resource(path, content).is_some()
}
