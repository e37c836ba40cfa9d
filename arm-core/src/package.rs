//! Resolved packages and their integrity hash

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::version::Version;

/// Identifies one resolved package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    pub registry_name: String,
    pub name: String,
    pub version: Version,
}

impl PackageMetadata {
    /// `registry/package`
    pub fn dependency_key(&self) -> String {
        format!("{}/{}", self.registry_name, self.name)
    }
}

impl fmt::Display for PackageMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.registry_name, self.name, self.version)
    }
}

/// A file inside a package; `path` is relative and uses `/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub path: String,
    pub content: Vec<u8>,
    pub size: u64,
}

impl File {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        Self {
            path: normalize_path(&path.into()),
            size: content.len() as u64,
            content,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Package {
    pub metadata: PackageMetadata,
    pub files: Vec<File>,
    pub integrity: String,
}

impl Package {
    /// Build a package, computing its integrity from `files`
    pub fn new(metadata: PackageMetadata, files: Vec<File>) -> Self {
        let integrity = calculate_integrity(&files);
        Self {
            metadata,
            files,
            integrity,
        }
    }
}

/// `sha256-<base64>` over files sorted by path, each contributing
/// `path NUL content NUL`
pub fn calculate_integrity(files: &[File]) -> String {
    let mut sorted: Vec<&File> = files.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    for file in sorted {
        hasher.update(file.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(&file.content);
        hasher.update([0u8]);
    }

    let digest = hasher.finalize();
    format!(
        "sha256-{}",
        base64::engine::general_purpose::STANDARD.encode(digest)
    )
}

/// Forward slashes, no leading `./` or `/`
pub fn normalize_path(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    let mut trimmed = replaced.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed.trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_is_order_independent() {
        let a = File::new("a.yml", "alpha");
        let b = File::new("dir/b.yml", "beta");

        let forward = calculate_integrity(&[a.clone(), b.clone()]);
        let reverse = calculate_integrity(&[b, a]);

        assert_eq!(forward, reverse);
        assert!(forward.starts_with("sha256-"));
    }

    #[test]
    fn test_integrity_separates_path_and_content() {
        // Moving a byte between path and content must change the hash
        let one = calculate_integrity(&[File::new("ab", "c")]);
        let two = calculate_integrity(&[File::new("a", "bc")]);
        assert_ne!(one, two);
    }

    #[test]
    fn test_integrity_of_empty_set() {
        // SHA-256 of the empty input
        assert_eq!(
            calculate_integrity(&[]),
            "sha256-47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn test_file_path_normalized() {
        let file = File::new(".\\rules\\a.yml", "x");
        assert_eq!(file.path, "rules/a.yml");
        assert_eq!(file.size, 1);
    }
}
