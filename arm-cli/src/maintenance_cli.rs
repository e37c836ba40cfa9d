//! Cache and sink housekeeping, plus local compilation

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use arm_core::service::ArmService;

use crate::sink_cli::ToolArg;

const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Subcommand, Debug)]
pub enum CleanTarget {
    /// Evict cached package versions
    Cache {
        /// Evict versions not refreshed within this duration (e.g. 7d, 12h)
        #[clap(long, value_parser = parse_duration, conflicts_with = "max_idle")]
        max_age: Option<Duration>,

        /// Evict versions not read within this duration
        #[clap(long, value_parser = parse_duration)]
        max_idle: Option<Duration>,
    },

    /// Remove sink files no longer tracked by the sink index
    Sinks,
}

#[derive(Subcommand, Debug)]
pub enum NukeTarget {
    /// Delete the whole package cache
    Cache,

    /// Delete all ARM output from every sink
    Sinks,
}

#[derive(Parser, Debug)]
pub struct CompileCommand {
    /// Ruleset/promptset files or directories
    #[clap(required = true)]
    inputs: Vec<PathBuf>,

    /// Tool format to compile to
    #[clap(long, value_enum)]
    tool: ToolArg,

    /// Output directory
    #[clap(long, short)]
    output: PathBuf,

    /// Namespace written into rule metadata
    #[clap(long, default_value = "local")]
    namespace: String,
}

pub async fn execute_clean(service: &ArmService, target: CleanTarget) -> Result<()> {
    match target {
        CleanTarget::Cache { max_age, max_idle } => {
            let removed = match max_idle {
                Some(idle) => service.clean_cache_by_time_since_last_access(idle).await?,
                None => {
                    service
                        .clean_cache_by_age(max_age.unwrap_or(DEFAULT_MAX_AGE))
                        .await?
                }
            };
            println!("Removed {removed} cached version(s)");
        }
        CleanTarget::Sinks => {
            let removed = service.clean_sinks().await?;
            println!("Removed {removed} orphaned file(s)");
        }
    }
    Ok(())
}

pub async fn execute_nuke(service: &ArmService, target: NukeTarget) -> Result<()> {
    match target {
        NukeTarget::Cache => {
            service.nuke_cache()?;
            println!("Cache removed: {}", service.paths().storage_root().display());
        }
        NukeTarget::Sinks => {
            service.nuke_sinks().await?;
            println!("Removed ARM output from all sinks");
        }
    }
    Ok(())
}

impl CompileCommand {
    pub fn execute(self, service: &ArmService) -> Result<()> {
        let compiled =
            service.compile_files(self.tool.into(), &self.inputs, &self.output, &self.namespace)?;

        for file in &compiled {
            println!("{} -> {}", file.source.display(), file.output.display());
        }
        println!("Compiled {} file(s)", compiled.len());
        Ok(())
    }
}

/// Parse `<N>s`, `<N>m`, `<N>h` or `<N>d`
fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let Some(unit) = s.chars().last() else {
        bail!("empty duration");
    };
    let digits = &s[..s.len() - unit.len_utf8()];
    let value: u64 = digits
        .parse()
        .with_context(|| format!("invalid duration '{s}', expected e.g. 30m, 12h or 7d"))?;

    let seconds = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        _ => bail!("invalid duration unit '{unit}' in '{s}', expected s, m, h or d"),
    };
    value
        .checked_mul(seconds)
        .map(Duration::from_secs)
        .with_context(|| format!("duration '{s}' is too large"))
}
