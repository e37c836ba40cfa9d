//! Registry management commands

use anyhow::Result;
use clap::{Parser, Subcommand};
use tabled::Tabled;

use arm_core::registry::{
    CloudsmithRegistryConfig, GitLabRegistryConfig, GitRegistryConfig, RegistryConfig,
    DEFAULT_CLOUDSMITH_URL,
};
use arm_core::service::ArmService;

use crate::package_cli::render_table;

#[derive(Parser, Debug)]
pub struct RegistryCommand {
    #[clap(subcommand)]
    command: RegistrySubcommand,
}

#[derive(Subcommand, Debug)]
enum RegistrySubcommand {
    /// Add a registry to the manifest
    Add {
        #[clap(subcommand)]
        kind: AddRegistry,
    },

    /// Remove a registry from the manifest
    Remove {
        /// Registry name
        name: String,
    },

    /// Rename a registry, rewriting dependency and lockfile keys
    Rename {
        /// Current name
        old: String,
        /// New name
        new: String,
    },

    /// List configured registries
    List {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum AddRegistry {
    /// A git repository whose tags and branches are versions
    Git {
        /// Registry name
        name: String,
        /// Repository URL
        url: String,
        /// Branch globs offered as versions
        #[clap(long, value_delimiter = ',')]
        branches: Vec<String>,
        /// Overwrite an existing registry
        #[clap(long)]
        force: bool,
    },

    /// A GitLab generic package registry
    Gitlab {
        /// Registry name
        name: String,
        /// GitLab base URL
        url: String,
        /// Project ID
        #[clap(long, conflicts_with = "group_id")]
        project_id: Option<String>,
        /// Group ID
        #[clap(long)]
        group_id: Option<String>,
        /// API version (default v4)
        #[clap(long)]
        api_version: Option<String>,
        /// Overwrite an existing registry
        #[clap(long)]
        force: bool,
    },

    /// A Cloudsmith raw package repository
    Cloudsmith {
        /// Registry name
        name: String,
        /// Repository owner
        #[clap(long)]
        owner: String,
        /// Repository name
        #[clap(long)]
        repository: String,
        /// API base URL
        #[clap(long, default_value = DEFAULT_CLOUDSMITH_URL)]
        url: String,
        /// Overwrite an existing registry
        #[clap(long)]
        force: bool,
    },
}

impl RegistryCommand {
    pub async fn execute(self, service: &ArmService) -> Result<()> {
        match self.command {
            RegistrySubcommand::Add { kind } => execute_add(service, kind),
            RegistrySubcommand::Remove { name } => {
                service.manifest().remove_registry(&name)?;
                println!("Removed registry '{name}'");
                Ok(())
            }
            RegistrySubcommand::Rename { old, new } => {
                service.rename_registry(&old, &new).await?;
                println!("Renamed registry '{old}' -> '{new}'");
                println!("Run 'arm install' to reinstall its packages into sinks.");
                Ok(())
            }
            RegistrySubcommand::List { json } => execute_list(service, json),
        }
    }
}

fn execute_add(service: &ArmService, kind: AddRegistry) -> Result<()> {
    let (name, config, force) = match kind {
        AddRegistry::Git {
            name,
            url,
            branches,
            force,
        } => (name, RegistryConfig::Git(GitRegistryConfig { url, branches }), force),
        AddRegistry::Gitlab {
            name,
            url,
            project_id,
            group_id,
            api_version,
            force,
        } => (
            name,
            RegistryConfig::GitLab(GitLabRegistryConfig {
                url,
                project_id,
                group_id,
                api_version,
            }),
            force,
        ),
        AddRegistry::Cloudsmith {
            name,
            owner,
            repository,
            url,
            force,
        } => (
            name,
            RegistryConfig::Cloudsmith(CloudsmithRegistryConfig {
                url,
                owner,
                repository,
            }),
            force,
        ),
    };

    let url = config.url().to_string();
    service.manifest().add_registry(&name, config, force)?;
    println!("Added registry '{name}' -> {url}");
    Ok(())
}

#[derive(Tabled)]
struct RegistryRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "URL")]
    url: String,
}

fn execute_list(service: &ArmService, json: bool) -> Result<()> {
    let registries = service.manifest().get_registries()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&registries)?);
        return Ok(());
    }

    if registries.is_empty() {
        println!("No registries configured.");
        println!("Add one with: arm registry add git <name> <url>");
        return Ok(());
    }

    let rows: Vec<RegistryRow> = registries
        .iter()
        .map(|(name, config)| RegistryRow {
            name: name.clone(),
            kind: config.type_name().to_string(),
            url: config.url().to_string(),
        })
        .collect();

    println!("{}", render_table(&rows));
    Ok(())
}
