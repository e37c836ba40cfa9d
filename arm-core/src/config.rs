//! Paths and user configuration
//!
//! Nothing here reads the environment when the crate loads. Callers build an
//! [`ArmPaths`] (discovered or explicit) and everything else derives from it.

use anyhow::{Context, Result};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cache::Storage;

pub const MANIFEST_FILE: &str = "arm.json";
pub const LOCKFILE_FILE: &str = "arm-lock.json";
pub const RC_FILE: &str = ".armrc";

/// Overrides the home directory used for storage and the user `.armrc`
pub const ARM_HOME_ENV: &str = "ARM_HOME";

static ENV_VAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern compiles")
});

/// File locations for one invocation
#[derive(Debug, Clone)]
pub struct ArmPaths {
    working_dir: PathBuf,
    home_dir: PathBuf,
    manifest_path: PathBuf,
    lockfile_path: PathBuf,
}

impl ArmPaths {
    pub fn new(working_dir: impl Into<PathBuf>, home_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        Self {
            manifest_path: working_dir.join(MANIFEST_FILE),
            lockfile_path: working_dir.join(LOCKFILE_FILE),
            home_dir: home_dir.into(),
            working_dir,
        }
    }

    /// Current directory plus `$ARM_HOME` or the user's home directory
    pub fn discover() -> Result<Self> {
        let working_dir =
            std::env::current_dir().context("Failed to determine current directory")?;
        let home_dir = match std::env::var_os(ARM_HOME_ENV) {
            Some(home) if !home.is_empty() => PathBuf::from(home),
            _ => dirs::home_dir().context("Could not determine home directory")?,
        };
        Ok(Self::new(working_dir, home_dir))
    }

    pub fn with_manifest_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest_path = path.into();
        self
    }

    pub fn with_lockfile_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lockfile_path = path.into();
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn lockfile_path(&self) -> &Path {
        &self.lockfile_path
    }

    pub fn project_rc_path(&self) -> PathBuf {
        self.working_dir.join(RC_FILE)
    }

    pub fn user_rc_path(&self) -> PathBuf {
        self.home_dir.join(RC_FILE)
    }

    pub fn storage_root(&self) -> PathBuf {
        self.home_dir.join(".arm").join("storage")
    }

    pub fn storage(&self) -> Storage {
        Storage::new(self.storage_root())
    }

    /// Relative paths resolve against the working directory
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }
}

/// Parsed `.armrc`: `[section]` → `key` → value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RcFile {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl RcFile {
    /// Parse INI text, expanding `${VAR}` from the process environment
    pub fn parse(content: &str) -> Self {
        Self::parse_with(content, |name| std::env::var(name).ok())
    }

    pub fn parse_with(content: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut current: Option<String> = None;

        for raw_line in content.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_string();
                sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                tracing::debug!("Ignoring malformed .armrc line: {}", line);
                continue;
            };
            let Some(section) = &current else {
                tracing::debug!("Ignoring .armrc key outside a section: {}", key.trim());
                continue;
            };

            let value = expand_env(unquote(value.trim()), &lookup);
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.trim().to_string(), value);
        }

        Self { sections }
    }

    /// Read one file; a missing file is empty
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self::parse(&content))
    }

    /// User file first, then the project file on top
    pub fn load_layered(paths: &ArmPaths) -> Result<Self> {
        let mut rc = Self::load(&paths.user_rc_path())?;
        rc.merge(Self::load(&paths.project_rc_path())?);
        Ok(rc)
    }

    /// Keys in `other` win
    pub fn merge(&mut self, other: RcFile) {
        for (section, values) in other.sections {
            self.sections.entry(section).or_default().extend(values);
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|values| values.get(key))
            .map(String::as_str)
    }

    /// `token` under `[registry <auth_key>]`
    pub fn registry_token(&self, auth_key: &str) -> Option<&str> {
        self.get(&format!("registry {auth_key}"), "token")
            .filter(|token| !token.is_empty())
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn expand_env(value: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    ENV_VAR_RE
        .replace_all(value, |caps: &regex::Captures| {
            lookup(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Registry tokens, read from `.armrc` the first time one is needed
#[derive(Debug)]
pub struct Credentials {
    paths: Option<ArmPaths>,
    rc: OnceCell<RcFile>,
}

impl Credentials {
    pub fn new(paths: ArmPaths) -> Self {
        Self {
            paths: Some(paths),
            rc: OnceCell::new(),
        }
    }

    /// Fixed configuration, for tests and embedding
    pub fn from_rc(rc: RcFile) -> Self {
        Self {
            paths: None,
            rc: OnceCell::with_value(rc),
        }
    }

    pub fn token(&self, auth_key: &str) -> Result<Option<String>> {
        let rc = self.rc.get_or_try_init(|| match &self.paths {
            Some(paths) => RcFile::load_layered(paths),
            None => Ok(RcFile::default()),
        })?;
        Ok(rc.registry_token(auth_key).map(str::to_string))
    }
}
