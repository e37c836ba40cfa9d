//! Version constraints and best-match resolution
//!
//! Surface syntax:
//! - `latest`
//! - `1.2.3` / `v1.2.3` (exact)
//! - `1.2` / `~1.2.3` (same major and minor)
//! - `1` / `^1.2.3` (same major)
//! - any other bare word is a branch name (only via [`Constraint::parse`])

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use super::{SemanticVersion, Version};
use crate::error::ArmError;

static ABBREVIATED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v?(\d+)(?:\.(\d+))?$").expect("abbreviated pattern compiles"));

const LATEST: &str = "latest";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Latest,
    Exact,
    MinorRange,
    MajorRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub kind: ConstraintKind,
    /// Absent for `Latest`
    pub version: Option<SemanticVersion>,
    raw: String,
}

impl Constraint {
    /// Strict parse: rejects branch names
    pub fn new(s: &str) -> Result<Self> {
        match Self::parse_versioned(s.trim()) {
            Some(constraint) => Ok(constraint),
            None => anyhow::bail!(ArmError::parse(
                "constraint",
                format!("'{s}' is not a version constraint")
            )),
        }
    }

    /// Lenient parse: non-numeric words become a `Latest` constraint that
    /// remembers the branch name
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            anyhow::bail!(ArmError::parse("constraint", "empty constraint"));
        }

        if let Some(constraint) = Self::parse_versioned(trimmed) {
            return Ok(constraint);
        }

        if trimmed.starts_with('^') || trimmed.starts_with('~') {
            anyhow::bail!(ArmError::parse(
                "constraint",
                format!("'{trimmed}' has a range operator but no version")
            ));
        }

        Ok(Self {
            kind: ConstraintKind::Latest,
            version: None,
            raw: trimmed.to_string(),
        })
    }

    fn parse_versioned(s: &str) -> Option<Self> {
        if s == LATEST {
            return Some(Self {
                kind: ConstraintKind::Latest,
                version: None,
                raw: s.to_string(),
            });
        }

        let (kind, rest) = if let Some(rest) = s.strip_prefix('^') {
            (Some(ConstraintKind::MajorRange), rest)
        } else if let Some(rest) = s.strip_prefix('~') {
            (Some(ConstraintKind::MinorRange), rest)
        } else {
            (None, s)
        };

        if let Some(version) = SemanticVersion::parse(rest) {
            return Some(Self {
                kind: kind.unwrap_or(ConstraintKind::Exact),
                version: Some(version),
                raw: s.to_string(),
            });
        }

        let caps = ABBREVIATED_RE.captures(rest)?;
        let major: u64 = caps[1].parse().ok()?;
        let minor: Option<u64> = match caps.get(2) {
            Some(m) => Some(m.as_str().parse().ok()?),
            None => None,
        };

        let implied = match minor {
            Some(_) => ConstraintKind::MinorRange,
            None => ConstraintKind::MajorRange,
        };

        Some(Self {
            kind: kind.unwrap_or(implied),
            version: Some(SemanticVersion {
                major,
                minor: minor.unwrap_or(0),
                patch: 0,
                prerelease: String::new(),
                build: String::new(),
                raw: rest.to_string(),
            }),
            raw: s.to_string(),
        })
    }

    /// Branch name carried by a lenient `Latest` constraint
    pub fn branch(&self) -> Option<&str> {
        match self.kind {
            ConstraintKind::Latest if self.raw != LATEST => Some(&self.raw),
            _ => None,
        }
    }

    pub fn satisfies(&self, version: &Version) -> bool {
        if let Some(branch) = self.branch() {
            return version.raw() == branch;
        }

        let Some(candidate) = version.as_semver() else {
            return false;
        };

        let Some(wanted) = &self.version else {
            return true;
        };

        match self.kind {
            ConstraintKind::Latest => true,
            ConstraintKind::Exact => {
                candidate.major == wanted.major
                    && candidate.minor == wanted.minor
                    && candidate.patch == wanted.patch
                    && (wanted.prerelease.is_empty() || candidate.prerelease == wanted.prerelease)
            }
            ConstraintKind::MinorRange => {
                candidate.major == wanted.major && candidate.minor == wanted.minor
            }
            ConstraintKind::MajorRange => candidate.major == wanted.major,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Pick the highest version in `available` that satisfies `constraint`.
///
/// Branch constraints match an opaque version by name. `latest` prefers
/// semantic versions and falls back to the first opaque version listed.
pub fn resolve_version(constraint: &str, available: &[Version]) -> Result<Version> {
    let parsed = Constraint::parse(constraint)?;

    if parsed.branch().is_some() {
        if let Some(found) = available.iter().find(|v| parsed.satisfies(v)) {
            return Ok(found.clone());
        }
        return Err(no_match(constraint, available));
    }

    let mut candidates: Vec<&SemanticVersion> = available
        .iter()
        .filter(|v| parsed.satisfies(v))
        .filter_map(Version::as_semver)
        .collect();
    candidates.sort_by(|a, b| b.cmp(a));

    if let Some(best) = candidates.first() {
        return Ok(Version::Semver((*best).clone()));
    }

    if parsed.kind == ConstraintKind::Latest {
        if let Some(opaque) = available.iter().find(|v| !v.is_semver()) {
            return Ok(opaque.clone());
        }
    }

    Err(no_match(constraint, available))
}

fn no_match(constraint: &str, available: &[Version]) -> anyhow::Error {
    let listed: Vec<&str> = available.iter().map(Version::raw).collect();
    ArmError::NoMatchingVersion {
        constraint: constraint.to_string(),
        available: if listed.is_empty() {
            "none".to_string()
        } else {
            listed.join(", ")
        },
    }
    .into()
}
