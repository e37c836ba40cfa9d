//! Archive expansion for fetched package files
//!
//! `.zip` and `.tar.gz` files are unpacked in memory and merged with the
//! loose files. Archive entries win over loose files with the same path and
//! later archives win over earlier ones. Entry paths are kept verbatim
//! (no archive-name prefix).

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use crate::error::ArmError;
use crate::package::File;

/// Upper bound on the buffer reserved from a zip entry's declared size
const MAX_PREALLOCATION: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    fn detect(path: &str) -> Option<Self> {
        if path.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if path.ends_with(".tar.gz") {
            Some(ArchiveFormat::TarGz)
        } else {
            None
        }
    }
}

/// True when `path` names an archive this module can expand
pub fn is_archive(path: &str) -> bool {
    ArchiveFormat::detect(path).is_some()
}

/// Expand every archive in `files` and merge the results with the loose files
pub fn extract_and_merge(files: Vec<File>) -> Result<Vec<File>> {
    let (archives, loose): (Vec<File>, Vec<File>) =
        files.into_iter().partition(|f| is_archive(&f.path));

    let mut merged: BTreeMap<String, File> = loose
        .into_iter()
        .map(|file| (file.path.clone(), file))
        .collect();

    for archive in archives {
        for entry in extract(&archive)? {
            merged.insert(entry.path.clone(), entry);
        }
    }

    Ok(merged.into_values().collect())
}

/// Expand a single archive file
pub fn extract(archive: &File) -> Result<Vec<File>> {
    let format = ArchiveFormat::detect(&archive.path).ok_or_else(|| {
        ArmError::Unsupported {
            what: "archive format",
            value: archive.path.clone(),
        }
    })?;

    if archive.content.is_empty() {
        anyhow::bail!(ArmError::parse(
            "archive",
            format!("{} is empty", archive.path)
        ));
    }

    let entries = match format {
        ArchiveFormat::Zip => extract_zip(&archive.content),
        ArchiveFormat::TarGz => extract_tar_gz(&archive.content),
    }
    .with_context(|| format!("Failed to extract archive {}", archive.path))?;

    tracing::debug!("Extracted {} entries from {}", entries.len(), archive.path);
    Ok(entries)
}

fn extract_zip(bytes: &[u8]) -> Result<Vec<File>> {
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ArmError::parse("zip archive", e.to_string()))?;

    let mut files = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| ArmError::parse("zip entry", e.to_string()))?;
        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        let Some(path) = clean_entry_path(&name) else {
            tracing::warn!("Skipping unsafe archive entry: {}", name);
            continue;
        };

        let mut content = Vec::with_capacity(entry.size().min(MAX_PREALLOCATION) as usize);
        entry
            .read_to_end(&mut content)
            .with_context(|| format!("Failed to read zip entry {name}"))?;
        files.push(File::new(path, content));
    }

    Ok(files)
}

fn extract_tar_gz(bytes: &[u8]) -> Result<Vec<File>> {
    let decoder = flate2::read::GzDecoder::new(Cursor::new(bytes));
    let mut archive = tar::Archive::new(decoder);

    let mut files = Vec::new();
    let entries = archive
        .entries()
        .map_err(|e| ArmError::parse("tar.gz archive", e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| ArmError::parse("tar.gz entry", e.to_string()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = entry
            .path()
            .map_err(|e| ArmError::parse("tar.gz entry path", e.to_string()))?
            .to_string_lossy()
            .into_owned();
        let Some(path) = clean_entry_path(&name) else {
            tracing::warn!("Skipping unsafe archive entry: {}", name);
            continue;
        };

        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .with_context(|| format!("Failed to read tar entry {name}"))?;
        files.push(File::new(path, content));
    }

    Ok(files)
}

/// Lexically clean an entry path. Returns `None` for `.`, absolute paths and
/// anything that escapes the archive root.
fn clean_entry_path(name: &str) -> Option<String> {
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return None;
    }

    let mut parts: Vec<&str> = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
