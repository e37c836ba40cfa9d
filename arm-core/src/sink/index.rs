//! On-disk record of what a sink owns

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkIndex {
    /// `registry/package` → installed entry
    #[serde(default)]
    pub packages: BTreeMap<String, IndexEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub version: String,
    pub integrity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    /// Paths relative to the sink directory
    #[serde(default)]
    pub files: Vec<String>,
}

impl SinkIndex {
    /// Missing file is an empty index
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sink index: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse sink index: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut content =
            serde_json::to_vec_pretty(self).context("Failed to serialize sink index")?;
        content.push(b'\n');
        write_atomic(path, &content)
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Every file owned by any package
    pub fn owned_files(&self) -> BTreeSet<&str> {
        self.packages
            .values()
            .flat_map(|entry| entry.files.iter().map(String::as_str))
            .collect()
    }
}

/// Write through a sibling temp file and rename over `path`
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
        Some(parent) => parent,
        None => anyhow::bail!("No parent directory for {}", path.display()),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    temp.write_all(content)?;
    temp.flush()?;
    temp.persist(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_index_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let index = SinkIndex::load(&temp_dir.path().join("arm-index.json")).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("arm").join("index.json");

        let mut index = SinkIndex::default();
        index.packages.insert(
            "reg/pkg".into(),
            IndexEntry {
                version: "1.0.0".into(),
                integrity: "sha256-abc".into(),
                priority: Some(100),
                files: vec!["arm/reg/pkg/a.md".into()],
            },
        );
        index.save(&path).unwrap();

        let loaded = SinkIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.owned_files().into_iter().collect::<Vec<_>>(), vec!["arm/reg/pkg/a.md"]);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"packages\""));
    }
}
