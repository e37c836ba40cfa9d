//! ARM - AI Rules Manager
//!
//! Command-line entry point. Logs go to stderr so stdout stays usable for
//! `--json` output.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use arm_core::config::ArmPaths;
use arm_core::service::ArmService;

mod maintenance_cli;
mod package_cli;
mod registry_cli;
mod sink_cli;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "arm",
    about = "Package manager for AI coding-assistant rulesets and promptsets",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Shortcut for --log-level debug
    #[clap(long, short, global = true)]
    verbose: bool,

    /// Manifest path (defaults to ./arm.json)
    #[clap(long, global = true)]
    manifest: Option<PathBuf>,

    /// Lockfile path (defaults to ./arm-lock.json)
    #[clap(long, global = true)]
    lockfile: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install one package, or everything in the manifest
    Install(package_cli::InstallCommand),

    /// Remove packages from sinks, lockfile and manifest
    Uninstall {
        /// registry/package keys (all when omitted)
        packages: Vec<String>,
    },

    /// Re-resolve packages within their recorded constraints
    Update {
        /// registry/package keys (all when omitted)
        packages: Vec<String>,
    },

    /// Move packages to their newest version and widen the constraint
    Upgrade {
        /// registry/package keys (all when omitted)
        packages: Vec<String>,
    },

    /// List manifest dependencies
    List {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Show dependencies with newer versions available
    Outdated {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Remove stale cache entries or orphaned sink files
    Clean {
        #[clap(subcommand)]
        target: maintenance_cli::CleanTarget,
    },

    /// Remove the whole cache or all ARM output from sinks
    Nuke {
        #[clap(subcommand)]
        target: maintenance_cli::NukeTarget,
    },

    /// Manage registries
    Registry(registry_cli::RegistryCommand),

    /// Manage sinks
    Sink(sink_cli::SinkCommand),

    /// Compile local ruleset/promptset files for a tool
    Compile(maintenance_cli::CompileCommand),
}

fn initialize_tracing(log_level: &LogLevel, verbose: bool) {
    let directive = if verbose {
        "debug"
    } else {
        log_level.to_filter_directive()
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_service(cli: &Cli) -> Result<ArmService> {
    let mut paths = ArmPaths::discover()?;
    if let Some(manifest) = &cli.manifest {
        let manifest = paths.resolve(manifest);
        paths = paths.with_manifest_path(manifest);
    }
    if let Some(lockfile) = &cli.lockfile {
        let lockfile = paths.resolve(lockfile);
        paths = paths.with_lockfile_path(lockfile);
    }
    tracing::debug!(
        "Using manifest {} and lockfile {}",
        paths.manifest_path().display(),
        paths.lockfile_path().display()
    );
    Ok(ArmService::new(paths))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level, cli.verbose);

    let service = build_service(&cli)?;

    match cli.command {
        Command::Install(command) => command.execute(&service).await,
        Command::Uninstall { packages } => package_cli::execute_uninstall(&service, &packages).await,
        Command::Update { packages } => package_cli::execute_update(&service, &packages).await,
        Command::Upgrade { packages } => package_cli::execute_upgrade(&service, &packages).await,
        Command::List { json } => package_cli::execute_list(&service, json),
        Command::Outdated { json } => package_cli::execute_outdated(&service, json).await,
        Command::Clean { target } => maintenance_cli::execute_clean(&service, target).await,
        Command::Nuke { target } => maintenance_cli::execute_nuke(&service, target).await,
        Command::Registry(command) => command.execute(&service).await,
        Command::Sink(command) => command.execute(&service),
        Command::Compile(command) => command.execute(&service),
    }
}
