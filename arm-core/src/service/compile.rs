//! Compile local resource files without touching any sink index

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::ArmService;
use crate::error::ArmError;
use crate::resource::{has_yaml_extension, parse_resource, ResourceDocument};
use crate::sink::{write_atomic, Tool};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledFile {
    pub source: PathBuf,
    pub output: PathBuf,
}

impl ArmService {
    /// Render every rule and prompt found in `inputs` into `output_dir`
    ///
    /// Directories are searched recursively for YAML files. A file named
    /// directly must be a valid resource; files found by the search that
    /// are not resources are skipped.
    pub fn compile_files(
        &self,
        tool: Tool,
        inputs: &[PathBuf],
        output_dir: &Path,
        namespace: &str,
    ) -> Result<Vec<CompiledFile>> {
        let output_dir = self.resolve_path(output_dir);
        let mut compiled = Vec::new();

        for input in inputs {
            let input = self.resolve_path(input);
            if input.is_dir() {
                for entry in WalkDir::new(&input).sort_by_file_name() {
                    let entry =
                        entry.with_context(|| format!("Failed to walk {}", input.display()))?;
                    let path = entry.path();
                    if entry.file_type().is_file() && has_yaml_extension(&path.to_string_lossy()) {
                        compile_one(tool, path, &output_dir, namespace, false, &mut compiled)?;
                    }
                }
            } else {
                compile_one(tool, &input, &output_dir, namespace, true, &mut compiled)?;
            }
        }

        tracing::info!(
            "Compiled {} file(s) into {}",
            compiled.len(),
            output_dir.display()
        );
        Ok(compiled)
    }
}

fn compile_one(
    tool: Tool,
    source: &Path,
    output_dir: &Path,
    namespace: &str,
    explicit: bool,
    compiled: &mut Vec<CompiledFile>,
) -> Result<()> {
    let content =
        std::fs::read(source).with_context(|| format!("Failed to read {}", source.display()))?;

    let rendered: Vec<(String, String)> = match parse_resource(&source.to_string_lossy(), &content)
    {
        Some(ResourceDocument::Ruleset(ruleset)) => ruleset
            .rule_ids()
            .map(|id| {
                Ok((
                    tool.rule_filename(&ruleset.metadata.id, id)?,
                    tool.generate_rule(namespace, &ruleset, id)?,
                ))
            })
            .collect::<Result<_>>()?,
        Some(ResourceDocument::Promptset(promptset)) => promptset
            .prompt_ids()
            .map(|id| {
                Ok((
                    tool.prompt_filename(&promptset.metadata.id, id)?,
                    tool.generate_prompt(namespace, &promptset, id)?,
                ))
            })
            .collect::<Result<_>>()?,
        None if explicit => anyhow::bail!(ArmError::validation(
            "resource",
            format!("{} is not a ruleset or promptset", source.display())
        )),
        None => {
            tracing::debug!("Skipping non-resource {}", source.display());
            return Ok(());
        }
    };

    for (filename, text) in rendered {
        let output = output_dir.join(filename);
        write_atomic(&output, text.as_bytes())?;
        compiled.push(CompiledFile {
            source: source.to_path_buf(),
            output,
        });
    }
    Ok(())
}
