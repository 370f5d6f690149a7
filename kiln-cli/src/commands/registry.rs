//! Registry command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use kiln_core::domain::registry::RegistryEntry;
use kiln_core::domain::version;

use crate::config::Config;

/// Registry subcommands
#[derive(Subcommand)]
pub enum RegistryCommands {
    /// List templates with published images
    List,
    /// List published versions of a template
    Versions {
        template: String,

        /// Only versions at or above this one
        #[arg(long)]
        min: Option<String>,
    },
    /// Show the entry for a template version
    Show {
        template: String,
        version: String,

        /// Print the raw entry as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the newest image for a region and architecture
    Latest {
        template: String,

        #[arg(short, long)]
        region: Option<String>,

        #[arg(short, long)]
        arch: Option<String>,
    },
}

pub async fn handle_registry_command(command: RegistryCommands, config: &Config) -> Result<()> {
    let registry = config.open_registry().await?;

    match command {
        RegistryCommands::List => {
            let templates = registry.list_templates().await?;
            if templates.is_empty() {
                println!("{}", "No published images.".yellow());
            } else {
                println!(
                    "{}",
                    format!("Found {} template(s):", templates.len()).bold()
                );
                for template in templates {
                    println!("  {}", template.cyan());
                }
            }
        }
        RegistryCommands::Versions { template, min } => {
            let mut versions = registry.list_versions(&template).await?;
            if let Some(floor) = min {
                versions = version::filter_at_least(&versions, &floor)?;
            }

            if versions.is_empty() {
                println!("{}", format!("No versions of {}.", template).yellow());
            } else {
                println!("{}", format!("Versions of {}:", template).bold());
                for v in versions {
                    println!("  {}", v);
                }
            }
        }
        RegistryCommands::Show {
            template,
            version,
            json,
        } => {
            let entry = registry.get_entry(&template, &version).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                print_entry(&entry);
                let regional: Vec<RegistryEntry> = registry
                    .entries(&template)
                    .await?
                    .into_iter()
                    .filter(|e| e.version == version && e.key() != entry.key())
                    .collect();
                for copy in regional {
                    println!(
                        "    {} {} {}",
                        format!("{}:", copy.region).dimmed(),
                        copy.image_id,
                        copy.architecture.dimmed()
                    );
                }
            }
        }
        RegistryCommands::Latest {
            template,
            region,
            arch,
        } => {
            let region = region.unwrap_or_else(|| config.builder.default_region.clone());
            let arch = arch.unwrap_or_else(|| config.builder.default_architecture.clone());

            match registry.latest(&template, &region, &arch).await? {
                Some(entry) => print_entry(&entry),
                None => println!(
                    "{}",
                    format!("No image of {} for {}/{}.", template, region, arch).yellow()
                ),
            }
        }
    }

    Ok(())
}

fn print_entry(entry: &RegistryEntry) {
    println!(
        "{} {}",
        entry.template_name.bold(),
        entry.version.cyan()
    );
    println!("  Image:        {}", entry.image_id.green());
    println!("  Target:       {}/{}", entry.region, entry.architecture);
    println!("  Build ID:     {}", entry.build_id);
    println!(
        "  Built:        {}",
        entry.built_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "  Published:    {} by {}",
        entry.published_at.format("%Y-%m-%d %H:%M:%S UTC"),
        entry.published_by
    );
    if let Some(source) = &entry.copied_from {
        println!("  Copied from:  {}", source);
    }
    if !entry.description.is_empty() {
        println!("  Description:  {}", entry.description.dimmed());
    }
}
