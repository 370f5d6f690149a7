//! Build command handler
//!
//! Resolves the template's dependencies, builds the plan in order with the
//! podman provider and optionally publishes the results. When publishing,
//! dependencies already published at their pinned version are not rebuilt.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use kiln_builder::Orchestrator;
use kiln_builder::podman::{PodmanProvider, check_podman_available};
use kiln_core::domain::build::{BuildRequest, BuildResult, BuildType, NetworkPlacement};
use kiln_core::domain::registry::{RegistryEntry, RegistryKey};
use kiln_registry::{Registry, RegistryError};
use kiln_template::{Template, TemplateCatalog, resolve_plan};
use std::sync::Arc;

use super::parse_key_val;
use crate::config::Config;

#[derive(Args)]
pub struct BuildArgs {
    /// Template name
    template: String,

    /// Target region (default: KILN_REGION or us-east-1)
    #[arg(short, long)]
    region: Option<String>,

    /// Target architecture (default: KILN_ARCH or x86_64)
    #[arg(short, long)]
    arch: Option<String>,

    /// Log every stage without touching any compute
    #[arg(long)]
    dry_run: bool,

    /// Network (VPC) for the build target
    #[arg(long)]
    vpc: Option<String>,

    #[arg(long)]
    subnet: Option<String>,

    #[arg(long)]
    security_group: Option<String>,

    /// Version tag for the image (default: the build id)
    #[arg(long)]
    version: Option<String>,

    /// Parameter overrides as key=value pairs
    #[arg(short, long, value_parser = parse_key_val)]
    param: Vec<(String, String)>,

    /// Regions to copy the finished image to (comma-separated)
    #[arg(long, value_delimiter = ',')]
    copy_to_regions: Vec<String>,

    /// Record successful images in the registry
    #[arg(long)]
    publish: bool,

    /// Mark the build as scheduled rather than manual
    #[arg(long)]
    scheduled: bool,
}

pub async fn handle_build_command(args: BuildArgs, config: &Config) -> Result<()> {
    let catalog = TemplateCatalog::load_dir(&config.templates_dir)?;
    let plan = resolve_plan(&args.template, &catalog)?;
    let target = plan
        .last()
        .cloned()
        .context("Resolved build plan is empty")?;

    if plan.len() > 1 {
        println!(
            "{}",
            format!(
                "Build order: {}",
                plan.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(" → ")
            )
            .dimmed()
        );
    }

    let region = args
        .region
        .unwrap_or_else(|| config.builder.default_region.clone());
    let arch = args
        .arch
        .unwrap_or_else(|| config.builder.default_architecture.clone());

    let registry = if args.publish && !args.dry_run {
        Some(config.open_registry().await?)
    } else {
        None
    };
    let plan = match &registry {
        Some(registry) => {
            let (remaining, reused) = unpublished_plan(&plan, registry, &region, &arch).await?;
            for entry in &reused {
                println!(
                    "{}",
                    format!(
                        "Using published {} {} ({})",
                        entry.template_name, entry.version, entry.image_id
                    )
                    .dimmed()
                );
            }
            remaining
        }
        None => plan,
    };

    let mut request = BuildRequest::new(target, region, arch)
        .with_dry_run(args.dry_run)
        .with_network(NetworkPlacement {
            vpc_id: args.vpc,
            subnet_id: args.subnet,
            security_group: args.security_group,
        })
        .with_copy_to_regions(args.copy_to_regions);
    if let Some(version) = args.version {
        request = request.with_version(version);
    }
    if args.scheduled {
        request = request.with_build_type(BuildType::Scheduled);
    }
    for (name, value) in args.param {
        request = request.with_parameter(name, value);
    }

    if !args.dry_run {
        check_podman_available().await?;
    }

    let provider = Arc::new(PodmanProvider::default());
    let orchestrator =
        Orchestrator::new(config.builder.clone(), provider.clone()).with_copier(provider);

    let results = orchestrator.build_plan(&plan, &request).await;

    for result in &results {
        print_result(result);
        write_log_file(result)?;
    }

    let failed = results.iter().filter(|r| !r.is_success()).count();
    let skipped = plan.len() - results.len();

    if let Some(registry) = registry.filter(|_| failed == 0) {
        let (published, errors) = publish_results(&registry, &results).await;
        for entry in &published {
            println!(
                "{} {} {} ({}/{})",
                "✓ Published".green(),
                entry.template_name.bold(),
                entry.version.cyan(),
                entry.region,
                entry.architecture
            );
        }
        for error in &errors {
            println!("{} {}", "✗ Not published:".red(), error);
        }
        if !errors.is_empty() {
            anyhow::bail!("{} result(s) could not be published", errors.len());
        }
    }

    if failed > 0 {
        anyhow::bail!(
            "{} build(s) failed{}",
            failed,
            if skipped > 0 {
                format!("; {} not attempted", skipped)
            } else {
                String::new()
            }
        );
    }

    Ok(())
}

/// Splits off dependencies already published at their pinned version for
/// `region` and `architecture`
///
/// Returns the templates still to build, always ending with the plan's
/// target, and the entries being reused instead of rebuilt.
async fn unpublished_plan(
    plan: &[Template],
    registry: &Registry,
    region: &str,
    architecture: &str,
) -> Result<(Vec<Template>, Vec<RegistryEntry>)> {
    let Some((target, dependencies)) = plan.split_last() else {
        return Ok((Vec::new(), Vec::new()));
    };

    let mut remaining = Vec::with_capacity(plan.len());
    let mut reused = Vec::new();
    for template in dependencies {
        if let Some(version) = &template.version {
            let key = RegistryKey::new(&template.name, region, architecture, version);
            match registry.lookup(&key).await {
                Ok(entry) => {
                    reused.push(entry);
                    continue;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        remaining.push(template.clone());
    }
    remaining.push(target.clone());

    Ok((remaining, reused))
}

/// Publishes every publishable result; a rejected result does not stop the rest
async fn publish_results(
    registry: &Registry,
    results: &[BuildResult],
) -> (Vec<RegistryEntry>, Vec<RegistryError>) {
    let mut published = Vec::new();
    let mut errors = Vec::new();

    for result in results.iter().filter(|r| r.is_publishable()) {
        match registry.publish(result).await {
            Ok(entry) => published.push(entry),
            Err(e) => errors.push(e),
        }
    }

    (published, errors)
}

/// Writes `<template>-build.log` when the build produced any log output
fn write_log_file(result: &BuildResult) -> Result<()> {
    if result.logs.trim().is_empty() {
        return Ok(());
    }

    let path = format!("{}-build.log", result.template_name);
    std::fs::write(&path, &result.logs)
        .with_context(|| format!("Failed to write build log: {}", path))?;
    println!("  Log:      {}", path.dimmed());
    Ok(())
}

fn print_result(result: &BuildResult) {
    if result.is_success() {
        let headline = if result.dry_run {
            "✓ Dry run complete"
        } else {
            "✓ Build succeeded"
        };
        println!("{} {}", headline.green().bold(), result.template_name.bold());
    } else {
        println!(
            "{} {}",
            "✗ Build failed".red().bold(),
            result.template_name.bold()
        );
    }

    println!("  Build ID: {}", result.build_id.cyan());
    println!("  Version:  {}", result.version);
    println!("  Target:   {}/{}", result.region, result.architecture);
    println!("  State:    {}", result.state);
    println!("  Duration: {:.1}s", result.duration().as_secs_f64());

    if let Some(image_id) = &result.image_id {
        println!("  Image:    {}", image_id.green());
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
    if let Some(error) = &result.error_message {
        println!("  Error:    {}", error.red());
    }
    if let Some(target) = &result.preserved_target {
        println!(
            "  {}",
            format!(
                "Target {} was kept for inspection; remove it when done (podman rm -f {})",
                target.id, target.id
            )
            .yellow()
        );
    }
}
