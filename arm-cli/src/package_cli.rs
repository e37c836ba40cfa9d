//! Package lifecycle commands: install, uninstall, update, upgrade, list, outdated

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use arm_core::manifest::{
    split_dependency_key, PromptsetDependency, RulesetDependency, DEFAULT_PRIORITY,
};
use arm_core::service::{ArmService, BatchReport};

const DEFAULT_CONSTRAINT: &str = "latest";

#[derive(Parser, Debug)]
pub struct InstallCommand {
    #[clap(subcommand)]
    target: Option<InstallTarget>,
}

#[derive(Subcommand, Debug)]
enum InstallTarget {
    /// Install a ruleset
    Ruleset {
        /// registry/package[@constraint]
        package: String,

        #[clap(flatten)]
        options: InstallOptions,

        /// Priority of this ruleset relative to others (higher wins)
        #[clap(long, default_value_t = DEFAULT_PRIORITY)]
        priority: i64,
    },

    /// Install a promptset
    Promptset {
        /// registry/package[@constraint]
        package: String,

        #[clap(flatten)]
        options: InstallOptions,
    },
}

#[derive(Args, Debug)]
struct InstallOptions {
    /// Sinks to install into
    #[clap(long, required = true, num_args = 1.., value_delimiter = ',')]
    sinks: Vec<String>,

    /// Glob patterns of files to keep
    #[clap(long, value_delimiter = ',')]
    include: Vec<String>,

    /// Glob patterns of files to drop
    #[clap(long, value_delimiter = ',')]
    exclude: Vec<String>,
}

/// `registry/package[@constraint]` as typed on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
struct PackageRef {
    registry: String,
    package: String,
    constraint: String,
}

impl PackageRef {
    fn parse(s: &str) -> Result<Self> {
        let (key, constraint) = match s.rsplit_once('@') {
            Some((key, constraint)) if !constraint.is_empty() => (key, constraint),
            Some((key, _)) => (key, DEFAULT_CONSTRAINT),
            None => (s, DEFAULT_CONSTRAINT),
        };
        let (registry, package) = split_dependency_key(key).with_context(|| {
            format!("Invalid package reference '{s}', expected registry/package[@constraint]")
        })?;

        Ok(Self {
            registry: registry.to_string(),
            package: package.to_string(),
            constraint: constraint.to_string(),
        })
    }
}

impl InstallCommand {
    pub async fn execute(self, service: &ArmService) -> Result<()> {
        match self.target {
            None => {
                let report = service.install_all().await?;
                print_report("Installed", &report);
                Ok(())
            }
            Some(InstallTarget::Ruleset {
                package,
                options,
                priority,
            }) => {
                let reference = PackageRef::parse(&package)?;
                ArmService::check_constraint(&reference.constraint)?;
                let installed = service
                    .install_ruleset(
                        &reference.registry,
                        &reference.package,
                        RulesetDependency {
                            version: reference.constraint.clone(),
                            sinks: options.sinks,
                            include: options.include,
                            exclude: options.exclude,
                            priority,
                        },
                    )
                    .await?;
                println!(
                    "Installed ruleset {}/{}@{} into {}",
                    reference.registry,
                    reference.package,
                    installed.metadata.version,
                    installed.sinks.join(", ")
                );
                Ok(())
            }
            Some(InstallTarget::Promptset { package, options }) => {
                let reference = PackageRef::parse(&package)?;
                ArmService::check_constraint(&reference.constraint)?;
                let installed = service
                    .install_promptset(
                        &reference.registry,
                        &reference.package,
                        PromptsetDependency {
                            version: reference.constraint.clone(),
                            sinks: options.sinks,
                            include: options.include,
                            exclude: options.exclude,
                        },
                    )
                    .await?;
                println!(
                    "Installed promptset {}/{}@{} into {}",
                    reference.registry,
                    reference.package,
                    installed.metadata.version,
                    installed.sinks.join(", ")
                );
                Ok(())
            }
        }
    }
}

pub async fn execute_uninstall(service: &ArmService, packages: &[String]) -> Result<()> {
    let report = if packages.is_empty() {
        service.uninstall_all().await?
    } else {
        service.uninstall_packages(packages).await?
    };
    print_report("Uninstalled", &report);
    Ok(())
}

pub async fn execute_update(service: &ArmService, packages: &[String]) -> Result<()> {
    let report = if packages.is_empty() {
        service.update_all().await?
    } else {
        service.update_packages(packages).await?
    };
    print_report("Updated", &report);
    Ok(())
}

pub async fn execute_upgrade(service: &ArmService, packages: &[String]) -> Result<()> {
    let report = if packages.is_empty() {
        service.upgrade_all().await?
    } else {
        service.upgrade_packages(packages).await?
    };
    print_report("Upgraded", &report);
    Ok(())
}

fn print_report(verb: &str, report: &BatchReport) {
    for key in &report.succeeded {
        println!("{verb} {key}");
    }
    for key in &report.skipped {
        println!("Up to date: {key}");
    }
    for (key, error) in &report.failed {
        eprintln!("Failed: {key}: {error}");
    }
    if report.succeeded.is_empty() && report.skipped.is_empty() && report.failed.is_empty() {
        println!("Nothing to do.");
    }
}

#[derive(Tabled)]
struct DependencyRow {
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Constraint")]
    constraint: String,
    #[tabled(rename = "Locked")]
    locked: String,
    #[tabled(rename = "Sinks")]
    sinks: String,
}

pub fn execute_list(service: &ArmService, json: bool) -> Result<()> {
    let dependencies = service.list_dependencies()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&dependencies)?);
        return Ok(());
    }

    if dependencies.is_empty() {
        println!("No dependencies in manifest.");
        return Ok(());
    }

    let rows: Vec<DependencyRow> = dependencies
        .into_iter()
        .map(|d| DependencyRow {
            package: format!("{}/{}", d.registry, d.package),
            resource_type: d.resource_type.to_string(),
            constraint: d.constraint,
            locked: d.locked.unwrap_or_else(|| "-".to_string()),
            sinks: d.sinks.join(", "),
        })
        .collect();

    println!("{}", render_table(&rows));
    Ok(())
}

#[derive(Tabled)]
struct OutdatedRow {
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Constraint")]
    constraint: String,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Wanted")]
    wanted: String,
    #[tabled(rename = "Latest")]
    latest: String,
}

pub async fn execute_outdated(service: &ArmService, json: bool) -> Result<()> {
    let outdated = service.list_outdated().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outdated)?);
        return Ok(());
    }

    if outdated.is_empty() {
        println!("All dependencies are up to date.");
        return Ok(());
    }

    let dash = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
    let rows: Vec<OutdatedRow> = outdated
        .into_iter()
        .map(|o| OutdatedRow {
            package: format!("{}/{}", o.registry, o.package),
            resource_type: o.resource_type.to_string(),
            constraint: o.constraint,
            current: dash(o.current),
            wanted: dash(o.wanted),
            latest: dash(o.latest),
        })
        .collect();

    println!("{}", render_table(&rows));
    Ok(())
}

pub(crate) fn render_table<T: Tabled>(rows: &[T]) -> String {
    Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string()
}
