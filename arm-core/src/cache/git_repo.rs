//! Working clone of one git remote

use anyhow::{Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::error::ArmError;
use crate::filelock::FileLock;
use crate::package::File;

const REMOTE_PREFIX: &str = "refs/remotes/origin/";

/// Clone of `url` kept at `repo_dir`
///
/// Every public method takes the clone lock, brings the clone up to date and
/// releases the lock before returning.
#[derive(Debug, Clone)]
pub struct GitRepoCache {
    repo_dir: PathBuf,
    url: String,
}

impl GitRepoCache {
    pub fn new(repo_dir: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            url: url.into(),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Tag names in the remote
    pub async fn get_tags(&self) -> Result<Vec<String>> {
        let _guard = FileLock::new(&self.repo_dir).lock().await?;
        self.ensure_cloned().await?;

        let output = self.git(&["tag", "--list"]).await?;
        Ok(lines(&output))
    }

    /// Remote branch short names, without the `HEAD` symbolic ref
    pub async fn get_branches(&self) -> Result<Vec<String>> {
        let _guard = FileLock::new(&self.repo_dir).lock().await?;
        self.ensure_cloned().await?;

        let output = self
            .git(&["for-each-ref", "--format=%(refname)", "refs/remotes/origin"])
            .await?;
        Ok(lines(&output)
            .into_iter()
            .filter_map(|r| r.strip_prefix(REMOTE_PREFIX).map(str::to_string))
            .filter(|name| name != "HEAD")
            .collect())
    }

    pub async fn get_tag_commit_hash(&self, tag: &str) -> Result<String> {
        let _guard = FileLock::new(&self.repo_dir).lock().await?;
        self.ensure_cloned().await?;

        let output = self
            .git(&["rev-list", "-n", "1", &format!("refs/tags/{tag}")])
            .await?;
        Ok(output.trim().to_string())
    }

    pub async fn get_branch_head_commit_hash(&self, branch: &str) -> Result<String> {
        let _guard = FileLock::new(&self.repo_dir).lock().await?;
        self.ensure_cloned().await?;

        let output = self
            .git(&["rev-parse", &format!("{REMOTE_PREFIX}{branch}")])
            .await?;
        Ok(output.trim().to_string())
    }

    /// Every tracked file at `reference` (tag, remote branch or commit)
    pub async fn get_files_from_commit(&self, reference: &str) -> Result<Vec<File>> {
        let _guard = FileLock::new(&self.repo_dir).lock().await?;
        self.ensure_cloned().await?;

        let commit = self.resolve_ref(reference).await?;
        let archive = self
            .git_bytes(&["archive", "--format=tar", &commit])
            .await?;

        let mut files = Vec::new();
        let mut tar = tar::Archive::new(archive.as_slice());
        for entry in tar.entries().context("Failed to read git archive")? {
            let mut entry = entry.context("Failed to read git archive entry")?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry.path()?.to_string_lossy().into_owned();
            let mut content = Vec::new();
            entry
                .read_to_end(&mut content)
                .with_context(|| format!("Failed to read {path} from git archive"))?;
            files.push(File::new(path, content));
        }

        tracing::debug!(
            "Read {} files from {}@{}",
            files.len(),
            self.url,
            reference
        );
        Ok(files)
    }

    async fn resolve_ref(&self, reference: &str) -> Result<String> {
        let candidates = [
            format!("refs/tags/{reference}"),
            format!("{REMOTE_PREFIX}{reference}"),
            reference.to_string(),
        ];

        for candidate in &candidates {
            let spec = format!("{candidate}^{{commit}}");
            if let Ok(hash) = self.git(&["rev-parse", "--verify", "--quiet", &spec]).await {
                let hash = hash.trim();
                if !hash.is_empty() {
                    return Ok(hash.to_string());
                }
            }
        }

        anyhow::bail!(ArmError::not_found("git ref", reference))
    }

    async fn ensure_cloned(&self) -> Result<()> {
        if self.repo_dir.join(".git").exists() {
            tracing::debug!("Fetching {} into {}", self.url, self.repo_dir.display());
            self.git(&["fetch", "--all", "--tags", "--prune", "--force"]).await?;
            return Ok(());
        }

        if self.repo_dir.exists() {
            std::fs::remove_dir_all(&self.repo_dir).with_context(|| {
                format!("Failed to remove incomplete clone: {}", self.repo_dir.display())
            })?;
        }
        if let Some(parent) = self.repo_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::debug!("Cloning {} into {}", self.url, self.repo_dir.display());
        let dir = self.repo_dir.to_string_lossy().into_owned();
        run_git(None, &["clone", "--quiet", "--", &self.url, &dir]).await?;
        Ok(())
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let stdout = self.git_bytes(args).await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    async fn git_bytes(&self, args: &[&str]) -> Result<Vec<u8>> {
        run_git(Some(&self.repo_dir), args).await
    }
}

async fn run_git(cwd: Option<&Path>, args: &[&str]) -> Result<Vec<u8>> {
    let mut command = Command::new("git");
    command.args(args).env("GIT_TERMINAL_PROMPT", "0");
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = command
        .output()
        .await
        .with_context(|| format!("Failed to run git {}", args.join(" ")))?;

    if !output.status.success() {
        anyhow::bail!(ArmError::Git {
            command: args.first().copied().unwrap_or_default().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output.stdout)
}

fn lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
