//! Kiln CLI
//!
//! Command-line front end: validates and resolves templates, builds images
//! with the podman provider, captures running instances and queries the
//! image registry.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Machine image builds, versions and distribution", long_about = None)]
struct Cli {
    /// Directory holding template documents
    #[arg(long, env = "KILN_TEMPLATES_DIR", default_value = "templates")]
    templates_dir: PathBuf,

    /// Postgres URL of the image registry
    #[arg(long, env = "KILN_DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kiln_cli=info,kiln_builder=info,kiln_registry=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.templates_dir, cli.database_url)?;

    handle_command(cli.command, &config).await
}
