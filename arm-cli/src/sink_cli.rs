//! Sink management commands

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tabled::Tabled;

use arm_core::service::ArmService;
use arm_core::sink::{SinkConfig, Tool};

use crate::package_cli::render_table;

/// Tools a sink can compile for
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ToolArg {
    Cursor,
    Markdown,
    #[value(name = "amazonq")]
    AmazonQ,
    Copilot,
}

impl From<ToolArg> for Tool {
    fn from(arg: ToolArg) -> Self {
        match arg {
            ToolArg::Cursor => Tool::Cursor,
            ToolArg::Markdown => Tool::Markdown,
            ToolArg::AmazonQ => Tool::AmazonQ,
            ToolArg::Copilot => Tool::Copilot,
        }
    }
}

#[derive(Parser, Debug)]
pub struct SinkCommand {
    #[clap(subcommand)]
    command: SinkSubcommand,
}

#[derive(Subcommand, Debug)]
enum SinkSubcommand {
    /// Add an output directory for a tool
    Add {
        /// Sink name
        name: String,
        /// Output directory, relative to the project
        directory: String,
        /// Tool whose format is written
        #[clap(long, value_enum)]
        tool: ToolArg,
        /// Overwrite an existing sink
        #[clap(long)]
        force: bool,
    },

    /// Remove a sink and drop it from every dependency
    Remove {
        /// Sink name
        name: String,
    },

    /// List configured sinks
    List {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },
}

impl SinkCommand {
    pub fn execute(self, service: &ArmService) -> Result<()> {
        match self.command {
            SinkSubcommand::Add {
                name,
                directory,
                tool,
                force,
            } => {
                let tool = Tool::from(tool);
                service.manifest().add_sink(
                    &name,
                    SinkConfig {
                        directory: directory.clone(),
                        tool,
                    },
                    force,
                )?;
                println!("Added sink '{name}' -> {directory} ({tool})");
                Ok(())
            }
            SinkSubcommand::Remove { name } => {
                service.manifest().remove_sink(&name)?;
                println!("Removed sink '{name}'");
                Ok(())
            }
            SinkSubcommand::List { json } => execute_list(service, json),
        }
    }
}

#[derive(Tabled)]
struct SinkRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Tool")]
    tool: String,
    #[tabled(rename = "Directory")]
    directory: String,
}

fn execute_list(service: &ArmService, json: bool) -> Result<()> {
    let sinks = service.manifest().get_sinks()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sinks)?);
        return Ok(());
    }

    if sinks.is_empty() {
        println!("No sinks configured.");
        println!("Add one with: arm sink add <name> <directory> --tool <tool>");
        return Ok(());
    }

    let rows: Vec<SinkRow> = sinks
        .iter()
        .map(|(name, config)| SinkRow {
            name: name.clone(),
            tool: config.tool.to_string(),
            directory: config.directory.clone(),
        })
        .collect();

    println!("{}", render_table(&rows));
    Ok(())
}
