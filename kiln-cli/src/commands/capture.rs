//! Capture command handler

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use kiln_builder::podman::{PodmanProvider, check_podman_available};
use kiln_builder::{CaptureService, render_definition};
use kiln_core::dto::capture::CaptureRequest;
use kiln_template::catalog::SAVED_DEFINITION_SUFFIX;
use std::sync::Arc;

use super::parse_key_val;
use crate::config::Config;

#[derive(Args)]
pub struct CaptureArgs {
    /// Running instance to capture
    instance: String,

    /// Name to record the new image under
    name: String,

    #[arg(short, long, default_value = "")]
    description: String,

    /// Region the instance runs in (default: KILN_REGION or us-east-1)
    #[arg(short, long)]
    region: Option<String>,

    /// Regions to copy the new image to (comma-separated)
    #[arg(long, value_delimiter = ',')]
    copy_to_regions: Vec<String>,

    /// Version tag for the image (default: the build id)
    #[arg(long)]
    version: Option<String>,

    /// Extra tags as key=value pairs
    #[arg(short, long, value_parser = parse_key_val)]
    tag: Vec<(String, String)>,

    /// Record the captured image in the registry
    #[arg(long)]
    publish: bool,
}

pub async fn handle_capture_command(args: CaptureArgs, config: &Config) -> Result<()> {
    let region = args
        .region
        .unwrap_or_else(|| config.builder.default_region.clone());

    let mut request = CaptureRequest::new(args.instance, args.name, region);
    request.description = args.description;
    request.copy_to_regions = args.copy_to_regions;
    request.version = args.version;
    request.tags = args.tag.into_iter().collect();

    check_podman_available().await?;

    println!(
        "{}",
        format!(
            "⚠ Instance {} will be stopped while the image is created. If this command is interrupted, start it again by hand.",
            request.instance_id
        )
        .yellow()
    );

    let provider = Arc::new(PodmanProvider::default());
    let service =
        CaptureService::new(config.builder.clone(), provider.clone()).with_copier(provider);

    let result = service.capture_from_running(request.clone()).await;

    if let Some(window) = &result.stop_window {
        match window.restarted_at {
            Some(_) => println!(
                "  Instance was stopped for {:.1}s",
                window.elapsed_ms as f64 / 1000.0
            ),
            None => println!(
                "{}",
                format!("  Instance {} is still stopped", request.instance_id)
                    .red()
                    .bold()
            ),
        }
    }

    if !result.is_success() {
        anyhow::bail!(
            "Capture of {} failed: {}",
            request.instance_id,
            result.error_message.as_deref().unwrap_or("unknown error")
        );
    }

    println!("{}", "✓ Instance captured".green().bold());
    println!("  Name:    {}", result.template_name.bold());
    println!("  Version: {}", result.version);
    if let Some(image_id) = &result.image_id {
        println!("  Image:   {}", image_id.green());
    }
    for (region, image_id) in &result.copied_images {
        println!("    {} {}", format!("{}:", region).dimmed(), image_id);
    }
    for (region, reason) in &result.copy_failures {
        println!(
            "    {} {}",
            format!("{}:", region).dimmed(),
            format!("copy failed: {}", reason).red()
        );
    }

    let definition = render_definition(&request, &result)?;
    std::fs::create_dir_all(&config.templates_dir).with_context(|| {
        format!(
            "Failed to create templates directory: {}",
            config.templates_dir.display()
        )
    })?;
    let path = config
        .templates_dir
        .join(format!("{}{}", result.template_name, SAVED_DEFINITION_SUFFIX));
    std::fs::write(&path, definition)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("  Definition: {}", path.display().to_string().dimmed());

    if args.publish {
        let registry = config.open_registry().await?;
        let entry = registry.publish(&result).await?;
        println!(
            "{} {} {}",
            "✓ Published".green(),
            entry.template_name.bold(),
            entry.version.cyan()
        );
    }

    Ok(())
}
