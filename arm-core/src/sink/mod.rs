//! Sink installation
//!
//! A sink is a directory owned by one [`Tool`]. Everything ARM writes into it
//! is recorded in the sink index, and only indexed files are ever removed
//! by uninstall. `clean` removes unindexed files inside the ARM scope.

mod compiler;
mod index;

pub use compiler::{Layout, Tool};
pub use index::{write_atomic, IndexEntry, SinkIndex};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::ArmError;
use crate::filelock::FileLock;
use crate::package::Package;
use crate::resource::{has_yaml_extension, parse_promptset, parse_ruleset};

const ARM_DIR: &str = "arm";
const HIERARCHICAL_INDEX: &str = "index.json";
const FLAT_INDEX: &str = "arm-index.json";
const FLAT_PREFIX: &str = "arm_";

/// Sink as stored in `arm.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    pub directory: String,
    pub tool: Tool,
}

#[derive(Debug, Clone)]
pub struct SinkManager {
    directory: PathBuf,
    tool: Tool,
}

impl SinkManager {
    pub fn new(directory: impl Into<PathBuf>, tool: Tool) -> Self {
        Self {
            directory: directory.into(),
            tool,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn index_path(&self) -> PathBuf {
        match self.tool.layout() {
            Layout::Hierarchical => self.directory.join(ARM_DIR).join(HIERARCHICAL_INDEX),
            Layout::Flat => self.directory.join(FLAT_INDEX),
        }
    }

    fn lock(&self) -> FileLock {
        match self.tool.layout() {
            Layout::Hierarchical => FileLock::new(self.directory.join(ARM_DIR)),
            Layout::Flat => FileLock::new(self.directory.join(FLAT_INDEX)),
        }
    }

    /// Sink-relative path for one compiled file
    fn relative_path(&self, registry: &str, package: &str, filename: &str) -> Result<String> {
        for (what, value) in [("registry", registry), ("package", package)] {
            if value.is_empty() || value.split('/').any(|s| s == ".." || s == "." || s.is_empty()) {
                anyhow::bail!(ArmError::validation(
                    format!("{what} name"),
                    format!("'{value}' cannot be used as a sink path")
                ));
            }
        }
        if !compiler::is_filename_safe(filename) {
            anyhow::bail!(ArmError::validation(
                "sink filename",
                format!("'{filename}' cannot be used as a sink path")
            ));
        }

        Ok(match self.tool.layout() {
            Layout::Hierarchical => format!("{ARM_DIR}/{registry}/{package}/{filename}"),
            Layout::Flat => format!(
                "{FLAT_PREFIX}{registry}_{}_{filename}",
                package.replace('/', "_")
            ),
        })
    }

    /// Compile every rule of every ruleset in `package` into the sink
    pub async fn install_ruleset(&self, package: &Package, priority: i64) -> Result<Vec<String>> {
        let meta = &package.metadata;
        let mut outputs = BTreeMap::new();

        for file in &package.files {
            if !has_yaml_extension(&file.path) {
                continue;
            }
            let ruleset = match parse_ruleset(&file.content) {
                Ok(ruleset) => ruleset,
                Err(e) => {
                    tracing::debug!("Skipping {} in {}: {}", file.path, meta, e);
                    continue;
                }
            };

            for rule_id in ruleset.rule_ids() {
                let filename = self.tool.rule_filename(&ruleset.metadata.id, rule_id)?;
                let content = self.tool.generate_rule(&meta.registry_name, &ruleset, rule_id)?;
                let path = self.relative_path(&meta.registry_name, &meta.name, &filename)?;
                outputs.insert(path, content);
            }
        }

        self.write_package(package, Some(priority), outputs).await
    }

    /// Compile every prompt of every promptset in `package` into the sink
    pub async fn install_promptset(&self, package: &Package) -> Result<Vec<String>> {
        let meta = &package.metadata;
        let mut outputs = BTreeMap::new();

        for file in &package.files {
            if !has_yaml_extension(&file.path) {
                continue;
            }
            let promptset = match parse_promptset(&file.content) {
                Ok(promptset) => promptset,
                Err(e) => {
                    tracing::debug!("Skipping {} in {}: {}", file.path, meta, e);
                    continue;
                }
            };

            for prompt_id in promptset.prompt_ids() {
                let filename = self.tool.prompt_filename(&promptset.metadata.id, prompt_id)?;
                let content =
                    self.tool
                        .generate_prompt(&meta.registry_name, &promptset, prompt_id)?;
                let path = self.relative_path(&meta.registry_name, &meta.name, &filename)?;
                outputs.insert(path, content);
            }
        }

        self.write_package(package, None, outputs).await
    }

    async fn write_package(
        &self,
        package: &Package,
        priority: Option<i64>,
        outputs: BTreeMap<String, String>,
    ) -> Result<Vec<String>> {
        let meta = &package.metadata;
        let key = meta.dependency_key();
        if outputs.is_empty() {
            tracing::warn!("{} contains no installable resources", meta);
        }

        let _guard = self.lock().lock().await?;
        let index_path = self.index_path();
        let mut index = SinkIndex::load(&index_path)?;

        for (relative, content) in &outputs {
            let target = self.directory.join(relative);
            if std::fs::read(&target).ok().as_deref() == Some(content.as_bytes()) {
                continue;
            }
            write_atomic(&target, content.as_bytes())?;
        }

        let files: Vec<String> = outputs.into_keys().collect();
        if let Some(previous) = index.packages.get(&key) {
            for stale in previous.files.iter().filter(|f| !files.contains(f)) {
                self.remove_owned(stale)?;
            }
        }

        index.packages.insert(
            key,
            IndexEntry {
                version: meta.version.to_string(),
                integrity: package.integrity.clone(),
                priority,
                files: files.clone(),
            },
        );
        index.save(&index_path)?;

        tracing::info!(
            "Installed {} ({} files) into {}",
            meta,
            files.len(),
            self.directory.display()
        );
        Ok(files)
    }

    /// Remove a package's files and index entry; `false` if it was not installed
    pub async fn uninstall(&self, registry: &str, package: &str) -> Result<bool> {
        let _guard = self.lock().lock().await?;
        let index_path = self.index_path();
        let mut index = SinkIndex::load(&index_path)?;

        let key = format!("{registry}/{package}");
        let Some(entry) = index.packages.remove(&key) else {
            return Ok(false);
        };

        for file in &entry.files {
            self.remove_owned(file)?;
        }
        self.save_or_remove_index(&index)?;

        tracing::info!("Uninstalled {} from {}", key, self.directory.display());
        Ok(true)
    }

    /// Delete unindexed files in the ARM scope; returns how many were removed
    pub async fn clean(&self) -> Result<usize> {
        let _guard = self.lock().lock().await?;
        let index_path = self.index_path();
        let index = SinkIndex::load(&index_path)?;
        let owned = index.owned_files();

        let mut removed = 0;
        for relative in self.scope_files()? {
            if !owned.contains(relative.as_str()) {
                tracing::debug!("Removing orphan {}", relative);
                self.remove_owned(&relative)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove the whole ARM scope, index included
    pub async fn nuke(&self) -> Result<()> {
        let _guard = self.lock().lock().await?;
        match self.tool.layout() {
            Layout::Hierarchical => {
                let arm_dir = self.directory.join(ARM_DIR);
                if arm_dir.exists() {
                    std::fs::remove_dir_all(&arm_dir)
                        .with_context(|| format!("Failed to remove {}", arm_dir.display()))?;
                }
            }
            Layout::Flat => {
                for relative in self.scope_files()? {
                    self.remove_owned(&relative)?;
                }
                let index_path = self.index_path();
                if index_path.exists() {
                    std::fs::remove_file(&index_path)?;
                }
            }
        }
        Ok(())
    }

    pub fn list_installed(&self) -> Result<SinkIndex> {
        SinkIndex::load(&self.index_path())
    }

    /// Sink-relative paths of every ARM-scoped file except the index
    fn scope_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        match self.tool.layout() {
            Layout::Hierarchical => {
                let arm_dir = self.directory.join(ARM_DIR);
                if !arm_dir.exists() {
                    return Ok(files);
                }
                for entry in WalkDir::new(&arm_dir).sort_by_file_name() {
                    let entry = entry?;
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let relative = entry
                        .path()
                        .strip_prefix(&self.directory)
                        .context("Sink file outside sink directory")?
                        .to_string_lossy()
                        .replace('\\', "/");
                    if relative != format!("{ARM_DIR}/{HIERARCHICAL_INDEX}") {
                        files.push(relative);
                    }
                }
            }
            Layout::Flat => {
                if !self.directory.exists() {
                    return Ok(files);
                }
                for entry in std::fs::read_dir(&self.directory)? {
                    let entry = entry?;
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if entry.file_type()?.is_file() && name.starts_with(FLAT_PREFIX) {
                        files.push(name);
                    }
                }
                files.sort();
            }
        }
        Ok(files)
    }

    /// Remove one sink-relative file, then any directories it leaves empty
    fn remove_owned(&self, relative: &str) -> Result<()> {
        let path = self.directory.join(relative);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove {}", path.display()));
            }
        }

        if self.tool.layout() == Layout::Hierarchical {
            let arm_dir = self.directory.join(ARM_DIR);
            let mut dir = path.parent();
            while let Some(current) = dir {
                if !current.starts_with(&arm_dir) || current == arm_dir {
                    break;
                }
                if std::fs::remove_dir(current).is_err() {
                    break;
                }
                dir = current.parent();
            }
        }
        Ok(())
    }

    fn save_or_remove_index(&self, index: &SinkIndex) -> Result<()> {
        let index_path = self.index_path();
        if !index.is_empty() {
            return index.save(&index_path);
        }

        if index_path.exists() {
            std::fs::remove_file(&index_path)
                .with_context(|| format!("Failed to remove {}", index_path.display()))?;
        }
        if self.tool.layout() == Layout::Hierarchical {
            let arm_dir = self.directory.join(ARM_DIR);
            // Leaves the directory in place if anything unindexed remains.
            let _ = std::fs::remove_dir(&arm_dir);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{File, PackageMetadata};
    use crate::version::Version;
    use tempfile::TempDir;

    const RULESET: &str = r#"
apiVersion: v1
kind: Ruleset
metadata:
  id: style
  name: Style
spec:
  rules:
    naming:
      name: Naming
      enforcement: must
      body: Name things well.
    errors:
      name: Errors
      enforcement: should
      body: Propagate errors.
"#;

    const PROMPTSET: &str = r#"
apiVersion: v1
kind: Promptset
metadata:
  id: review
  name: Review
spec:
  prompts:
    summary:
      name: Summary
      body: Summarise.
"#;

    fn package(version: &str, files: Vec<File>) -> Package {
        Package::new(
            PackageMetadata {
                registry_name: "reg".into(),
                name: "pkg".into(),
                version: Version::parse(version).unwrap(),
            },
            files,
        )
    }

    fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
        let mut entries: Vec<_> = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .map(|e| e.unwrap())
            .filter(|e| e.path() != dir)
            .map(|e| {
                let rel = e.path().strip_prefix(dir).unwrap().to_string_lossy().into_owned();
                let content = if e.file_type().is_file() {
                    std::fs::read(e.path()).unwrap()
                } else {
                    Vec::new()
                };
                (rel, content)
            })
            .collect();
        entries.sort();
        entries
    }

    #[tokio::test]
    async fn test_hierarchical_install_layout() {
        let temp_dir = TempDir::new().unwrap();
        let sink = SinkManager::new(temp_dir.path(), Tool::Cursor);

        let files = sink
            .install_ruleset(&package("1.0.0", vec![File::new("rules/style.yml", RULESET)]), 100)
            .await
            .unwrap();

        assert_eq!(
            files,
            vec!["arm/reg/pkg/style_errors.mdc", "arm/reg/pkg/style_naming.mdc"]
        );
        assert!(temp_dir.path().join("arm/reg/pkg/style_naming.mdc").exists());

        let index = sink.list_installed().unwrap();
        let entry = &index.packages["reg/pkg"];
        assert_eq!(entry.version, "1.0.0");
        assert_eq!(entry.priority, Some(100));
        assert!(entry.integrity.starts_with("sha256-"));
        assert!(!temp_dir.path().join("arm.lock").exists());
    }

    #[tokio::test]
    async fn test_flat_install_layout() {
        let temp_dir = TempDir::new().unwrap();
        let sink = SinkManager::new(temp_dir.path(), Tool::Copilot);

        let files = sink
            .install_promptset(&package("1.0.0", vec![File::new("review.yaml", PROMPTSET)]))
            .await
            .unwrap();

        assert_eq!(files, vec!["arm_reg_pkg_review_summary.md"]);
        assert_eq!(
            std::fs::read_to_string(temp_dir.path().join("arm_reg_pkg_review_summary.md")).unwrap(),
            "Summarise."
        );
        assert!(temp_dir.path().join("arm-index.json").exists());
        assert_eq!(sink.list_installed().unwrap().packages["reg/pkg"].priority, None);
    }

    #[tokio::test]
    async fn test_reinstall_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let sink = SinkManager::new(temp_dir.path(), Tool::Markdown);
        let pkg = package("1.0.0", vec![File::new("style.yml", RULESET)]);

        sink.install_ruleset(&pkg, 0).await.unwrap();
        let first = snapshot(temp_dir.path());
        sink.install_ruleset(&pkg, 0).await.unwrap();
        assert_eq!(snapshot(temp_dir.path()), first);
    }

    #[tokio::test]
    async fn test_reinstall_removes_stale_files() {
        let temp_dir = TempDir::new().unwrap();
        let sink = SinkManager::new(temp_dir.path(), Tool::AmazonQ);

        sink.install_ruleset(&package("1.0.0", vec![File::new("style.yml", RULESET)]), 0)
            .await
            .unwrap();

        let trimmed = RULESET.replace(
            "    errors:\n      name: Errors\n      enforcement: should\n      body: Propagate errors.\n",
            "",
        );
        let files = sink
            .install_ruleset(&package("1.1.0", vec![File::new("style.yml", trimmed)]), 0)
            .await
            .unwrap();

        assert_eq!(files, vec!["arm/reg/pkg/style_naming.md"]);
        assert!(!temp_dir.path().join("arm/reg/pkg/style_errors.md").exists());
        assert_eq!(sink.list_installed().unwrap().packages["reg/pkg"].version, "1.1.0");
    }

    #[tokio::test]
    async fn test_install_then_uninstall_restores_directory() {
        for tool in Tool::ALL {
            let temp_dir = TempDir::new().unwrap();
            std::fs::write(temp_dir.path().join("user-notes.md"), "mine").unwrap();
            let before = snapshot(temp_dir.path());

            let sink = SinkManager::new(temp_dir.path(), tool);
            let pkg = package(
                "1.0.0",
                vec![File::new("style.yml", RULESET), File::new("review.yml", PROMPTSET)],
            );
            sink.install_ruleset(&pkg, 0).await.unwrap();
            assert!(sink.uninstall("reg", "pkg").await.unwrap());

            assert_eq!(snapshot(temp_dir.path()), before, "tool {tool}");
        }
    }

    #[tokio::test]
    async fn test_uninstall_unknown_package() {
        let temp_dir = TempDir::new().unwrap();
        let sink = SinkManager::new(temp_dir.path(), Tool::Cursor);
        assert!(!sink.uninstall("reg", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_clean_removes_orphans_only() {
        let temp_dir = TempDir::new().unwrap();
        let sink = SinkManager::new(temp_dir.path(), Tool::Copilot);
        sink.install_ruleset(&package("1.0.0", vec![File::new("style.yml", RULESET)]), 0)
            .await
            .unwrap();

        std::fs::write(temp_dir.path().join("arm_old_leftover.md"), "x").unwrap();
        std::fs::write(temp_dir.path().join("unrelated.md"), "keep").unwrap();

        assert_eq!(sink.clean().await.unwrap(), 1);
        assert!(!temp_dir.path().join("arm_old_leftover.md").exists());
        assert!(temp_dir.path().join("unrelated.md").exists());
        assert!(temp_dir
            .path()
            .join("arm_reg_pkg_style_naming.instructions.md")
            .exists());
    }

    #[tokio::test]
    async fn test_clean_hierarchical_orphans() {
        let temp_dir = TempDir::new().unwrap();
        let sink = SinkManager::new(temp_dir.path(), Tool::Markdown);
        sink.install_ruleset(&package("1.0.0", vec![File::new("style.yml", RULESET)]), 0)
            .await
            .unwrap();
        std::fs::create_dir_all(temp_dir.path().join("arm/gone/pkg")).unwrap();
        std::fs::write(temp_dir.path().join("arm/gone/pkg/x.md"), "x").unwrap();

        assert_eq!(sink.clean().await.unwrap(), 1);
        assert!(!temp_dir.path().join("arm/gone").exists());
        assert!(temp_dir.path().join("arm/index.json").exists());
    }

    #[tokio::test]
    async fn test_nuke() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("keep.md"), "keep").unwrap();

        let flat = SinkManager::new(temp_dir.path(), Tool::Copilot);
        flat.install_ruleset(&package("1.0.0", vec![File::new("style.yml", RULESET)]), 0)
            .await
            .unwrap();
        flat.nuke().await.unwrap();
        assert!(!temp_dir.path().join("arm-index.json").exists());
        assert!(temp_dir.path().join("keep.md").exists());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);

        let nested = SinkManager::new(temp_dir.path(), Tool::Cursor);
        nested.install_ruleset(&package("1.0.0", vec![File::new("style.yml", RULESET)]), 0)
            .await
            .unwrap();
        nested.nuke().await.unwrap();
        assert!(!temp_dir.path().join("arm").exists());
    }

    #[tokio::test]
    async fn test_rejects_traversal_in_names() {
        let temp_dir = TempDir::new().unwrap();
        let sink = SinkManager::new(temp_dir.path(), Tool::Markdown);
        let mut pkg = package("1.0.0", vec![File::new("style.yml", RULESET)]);
        pkg.metadata.name = "../escape".into();
        assert!(sink.install_ruleset(&pkg, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_traversal_in_resource_ids() {
        let temp_dir = TempDir::new().unwrap();
        let sink_dir = temp_dir.path().join("sink");

        let evil_set = RULESET.replace("id: style", "id: ../../../escaped");
        let evil_rule = RULESET.replace("    naming:", "    ../../../../escaped2:");
        assert_ne!(evil_set, RULESET);
        assert_ne!(evil_rule, RULESET);

        for (tool, yaml) in [
            (Tool::Copilot, &evil_set),
            (Tool::Cursor, &evil_set),
            (Tool::Cursor, &evil_rule),
            (Tool::Copilot, &evil_rule),
        ] {
            let sink = SinkManager::new(&sink_dir, tool);
            let pkg = package("1.0.0", vec![File::new("style.yml", yaml.as_str())]);
            assert!(sink.install_ruleset(&pkg, 0).await.is_err(), "tool {tool}");
        }

        let evil_prompt = PROMPTSET.replace("id: review", "id: ../escaped3");
        assert_ne!(evil_prompt, PROMPTSET);
        let sink = SinkManager::new(&sink_dir, Tool::Markdown);
        let pkg = package("1.0.0", vec![File::new("review.yml", evil_prompt.as_str())]);
        assert!(sink.install_promptset(&pkg).await.is_err());

        let outside: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .filter(|name| name != "sink")
            .collect();
        assert!(outside.is_empty(), "{outside:?}");
    }
}
