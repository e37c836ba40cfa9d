//! Version parsing and ordering
//!
//! A version is either semantic (`[v]MAJOR.MINOR.PATCH[-PRE][+BUILD]`) or an
//! opaque string such as a branch name. Opaque versions are never ordered.

mod constraint;

pub use constraint::{resolve_version, Constraint, ConstraintKind};

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::ArmError;

static SEMVER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)(?:-([.\w-]+))?(?:\+([\w.-]+))?$")
        .expect("semver pattern compiles")
});

/// Semantic version components, with the original text kept in `raw`.
///
/// Equality and hashing follow precedence, so `v1.0.0` equals
/// `1.0.0+build`.
#[derive(Debug, Clone)]
pub struct SemanticVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: String,
    pub build: String,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    Semver(SemanticVersion),
    Opaque(String),
}

impl Version {
    /// Parse a version string. Fails only on empty input; anything that is not
    /// semantic becomes an opaque version.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            anyhow::bail!(ArmError::parse("version", "empty version string"));
        }

        match SemanticVersion::parse(s) {
            Some(semver) => Ok(Version::Semver(semver)),
            None => Ok(Version::Opaque(s.to_string())),
        }
    }

    /// The string this version was parsed from
    pub fn raw(&self) -> &str {
        match self {
            Version::Semver(v) => &v.raw,
            Version::Opaque(raw) => raw,
        }
    }

    pub fn is_semver(&self) -> bool {
        matches!(self, Version::Semver(_))
    }

    pub fn as_semver(&self) -> Option<&SemanticVersion> {
        match self {
            Version::Semver(v) => Some(v),
            Version::Opaque(_) => None,
        }
    }

    /// Compare two versions; fails when either side is opaque
    pub fn compare_to(&self, other: &Version) -> Result<Ordering> {
        match (self, other) {
            (Version::Semver(a), Version::Semver(b)) => Ok(a.cmp(b)),
            _ => anyhow::bail!(ArmError::validation(
                "version comparison",
                format!("cannot compare '{}' with '{}'", self.raw(), other.raw())
            )),
        }
    }

    /// Directory name used by the package cache (`v<M>.<m>.<p>[-pre][+build]`)
    pub fn storage_name(&self) -> Option<String> {
        self.as_semver().map(|v| format!("v{}", v.canonical()))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.raw())
    }
}

impl SemanticVersion {
    pub fn parse(s: &str) -> Option<Self> {
        let caps = SEMVER_RE.captures(s)?;

        Some(Self {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            patch: caps[3].parse().ok()?,
            prerelease: caps.get(4).map(|m| m.as_str().to_string()).unwrap_or_default(),
            build: caps.get(5).map(|m| m.as_str().to_string()).unwrap_or_default(),
            raw: s.to_string(),
        })
    }

    /// `M.m.p[-pre][+build]` without any `v` prefix
    pub fn canonical(&self) -> String {
        let mut out = format!("{}.{}.{}", self.major, self.minor, self.patch);
        if !self.prerelease.is_empty() {
            out.push('-');
            out.push_str(&self.prerelease);
        }
        if !self.build.is_empty() {
            out.push('+');
            out.push_str(&self.build);
        }
        out
    }

    pub fn has_v_prefix(&self) -> bool {
        self.raw.starts_with('v')
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| compare_prerelease(&self.prerelease, &other.prerelease))
    }
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SemanticVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SemanticVersion {}

impl Hash for SemanticVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.prerelease.hash(state);
    }
}

/// SemVer 2.0 §11 precedence for pre-release strings. Build metadata is
/// ignored entirely.
fn compare_prerelease(a: &str, b: &str) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (false, false) => {}
    }

    let left: Vec<&str> = a.split('.').collect();
    let right: Vec<&str> = b.split('.').collect();

    for (l, r) in left.iter().zip(right.iter()) {
        let ordering = match (numeric_identifier(l), numeric_identifier(r)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => l.cmp(r),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    left.len().cmp(&right.len())
}

/// Digits only, with no leading zero unless the identifier is exactly "0"
fn numeric_identifier(ident: &str) -> Option<u128> {
    if ident.is_empty() || !ident.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if ident.len() > 1 && ident.starts_with('0') {
        return None;
    }
    ident.parse().ok()
}
