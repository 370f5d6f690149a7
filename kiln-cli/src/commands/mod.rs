//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod build;
mod capture;
mod registry;
mod template;

pub use build::BuildArgs;
pub use capture::CaptureArgs;
pub use registry::RegistryCommands;
pub use template::TemplateCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Template validation, dependency resolution and sharing
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },
    /// Build a template and everything it depends on
    Build(BuildArgs),
    /// Turn a running instance into a new image
    Capture(CaptureArgs),
    /// Query published images
    Registry {
        #[command(subcommand)]
        command: RegistryCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Template { command } => {
            template::handle_template_command(command, config).await
        }
        Commands::Build(args) => build::handle_build_command(args, config).await,
        Commands::Capture(args) => capture::handle_capture_command(args, config).await,
        Commands::Registry { command } => {
            registry::handle_registry_command(command, config).await
        }
    }
}

/// Parse a single key=value pair
pub(crate) fn parse_key_val(s: &str) -> Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}
