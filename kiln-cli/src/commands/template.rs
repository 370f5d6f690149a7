//! Template command handlers

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use kiln_core::domain::registry::SharedTemplate;
use kiln_template::{TemplateCatalog, parse_template, resolve_plan, to_document};

use crate::config::Config;

/// Template subcommands
#[derive(Subcommand)]
pub enum TemplateCommands {
    /// Parse and validate a template document
    Validate {
        /// Path to the template file
        file: String,
    },
    /// Show the build order for a template
    Resolve {
        /// Template name
        name: String,
    },
    /// List every template in the templates directory
    List,
    /// Share a template from the templates directory through the registry
    Share {
        /// Template name
        name: String,

        /// Version to share under (default: the template's version or 1.0.0)
        #[arg(long)]
        version: Option<String>,
    },
    /// List shared templates, or show one
    Shared {
        /// Template name; lists every shared template when omitted
        name: Option<String>,

        /// Version to show (default: latest)
        #[arg(long)]
        version: Option<String>,

        /// Save the document into the templates directory
        #[arg(long)]
        save: bool,
    },
    /// Stop sharing a template
    Unshare {
        name: String,

        /// Only this version (default: every version)
        #[arg(long)]
        version: Option<String>,
    },
}

pub async fn handle_template_command(command: TemplateCommands, config: &Config) -> Result<()> {
    match command {
        TemplateCommands::Validate { file } => validate_template(&file),
        TemplateCommands::Resolve { name } => resolve_template(config, &name),
        TemplateCommands::List => list_templates(config),
        TemplateCommands::Share { name, version } => {
            share_template(config, &name, version.as_deref()).await
        }
        TemplateCommands::Shared {
            name,
            version,
            save,
        } => match name {
            Some(name) => show_shared(config, &name, version.as_deref(), save).await,
            None => list_shared(config).await,
        },
        TemplateCommands::Unshare { name, version } => {
            let registry = config.open_registry().await?;
            let removed = registry.unshare_template(&name, version.as_deref()).await?;
            println!(
                "{} {} ({} version(s))",
                "✓ Unshared".green(),
                name.bold(),
                removed
            );
            Ok(())
        }
    }
}

fn validate_template(path: &str) -> Result<()> {
    let document = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read template file: {}", path))?;

    let template =
        parse_template(&document).with_context(|| format!("Invalid template: {}", path))?;

    println!("{}", "✓ Template is valid".green().bold());
    println!("  Name:         {}", template.name.bold());
    println!("  Base:         {}", template.base.cyan());
    if let Some(version) = &template.version {
        println!("  Version:      {}", version);
    }
    println!("  Build steps:  {}", template.build_steps.len());
    println!("  Validation:   {}", template.validation.len());
    if !template.dependencies.is_empty() {
        println!(
            "  Depends on:   {}",
            template.dependency_names().collect::<Vec<_>>().join(", ").dimmed()
        );
    }
    if !template.parameters.is_empty() {
        println!("  Parameters:");
        for (name, default) in &template.parameters {
            println!("    - {} = {}", name.cyan(), default.dimmed());
        }
    }

    Ok(())
}

fn resolve_template(config: &Config, name: &str) -> Result<()> {
    let catalog = TemplateCatalog::load_dir(&config.templates_dir)?;
    let plan = resolve_plan(name, &catalog)?;

    println!("{}", format!("Build order for {}:", name).bold());
    for (i, template) in plan.iter().enumerate() {
        let version = template.version.as_deref().unwrap_or("-");
        println!(
            "  {}. {} {}",
            i + 1,
            template.name.bold(),
            version.dimmed()
        );
    }

    Ok(())
}

fn list_templates(config: &Config) -> Result<()> {
    let catalog = TemplateCatalog::load_dir(&config.templates_dir)?;

    if catalog.is_empty() {
        println!(
            "{}",
            format!("No templates found in {}.", config.templates_dir.display()).yellow()
        );
        return Ok(());
    }

    println!("{}", format!("Found {} template(s):", catalog.len()).bold());
    for name in catalog.names() {
        if let Some(template) = catalog.get(name) {
            println!("  {} {}", name.cyan(), template.description.dimmed());
        }
    }

    Ok(())
}

async fn share_template(config: &Config, name: &str, version: Option<&str>) -> Result<()> {
    let catalog = TemplateCatalog::load_dir(&config.templates_dir)?;
    let template = catalog
        .get(name)
        .with_context(|| format!("Template '{}' not found in {}", name, config.templates_dir.display()))?;
    let document = to_document(template)?;

    let registry = config.open_registry().await?;
    let shared = registry.share_template(template, &document, version).await?;

    println!(
        "{} {} {}",
        "✓ Shared".green(),
        shared.name.bold(),
        shared.version.cyan()
    );
    Ok(())
}

async fn list_shared(config: &Config) -> Result<()> {
    let registry = config.open_registry().await?;
    let shared = registry.list_shared_templates().await?;

    if shared.is_empty() {
        println!("{}", "No shared templates.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} shared template(s):", shared.len()).bold());
    for template in shared {
        println!(
            "  {} {} {}",
            template.name.cyan(),
            template.version,
            template.description.dimmed()
        );
    }
    Ok(())
}

async fn show_shared(config: &Config, name: &str, version: Option<&str>, save: bool) -> Result<()> {
    let registry = config.open_registry().await?;
    let shared = registry.get_shared_template(name, version).await?;
    let versions = registry.list_shared_versions(name).await?;

    print_shared(&shared, &versions);

    if save {
        // Refuse documents that would not load back into the catalog
        let template = parse_template(&shared.document)
            .with_context(|| format!("Shared document for {} is not a valid template", name))?;
        std::fs::create_dir_all(&config.templates_dir).with_context(|| {
            format!(
                "Failed to create templates directory: {}",
                config.templates_dir.display()
            )
        })?;
        let path = config
            .templates_dir
            .join(format!("{}.{}", template.name, shared.format));
        std::fs::write(&path, &shared.document)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("  Saved:        {}", path.display().to_string().dimmed());
    } else {
        println!();
        println!("{}", shared.document);
    }
    Ok(())
}

fn print_shared(shared: &SharedTemplate, versions: &[String]) {
    println!("{} {}", shared.name.bold(), shared.version.cyan());
    println!(
        "  Shared:       {} by {}",
        shared.published_at.format("%Y-%m-%d %H:%M:%S UTC"),
        shared.published_by
    );
    if let Some(arch) = &shared.architecture {
        println!("  Architecture: {}", arch);
    }
    if !shared.description.is_empty() {
        println!("  Description:  {}", shared.description.dimmed());
    }
    println!("  Versions:     {}", versions.join(", "));
}
