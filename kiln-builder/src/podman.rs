//! Podman provider
//!
//! Implements the provider traits with local containers so builds can run
//! without a cloud account:
//! - A provisioning target is a detached container started from the base image
//! - Build steps run through `podman exec ... /bin/sh -c <script>`
//! - Image capture is `podman commit`
//! - Regions are image namespaces: copying tags the image into
//!   `<namespace>/<region>/<name>` under the source image's name
//! - VPCs and subnets map onto podman networks
//! - Long-running instances are existing containers (`inspect`/`stop`/`start`)

use anyhow::{Context, Result};
use async_trait::async_trait;
use kiln_core::domain::build::{NetworkPlacement, TargetRef};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::provider::{
    ImageCopier, InstanceControl, InstanceDescription, InstanceState, ProvisioningTarget,
    ScriptOutput,
};

/// Delay between readiness probes
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Checks if podman is installed and available
pub async fn check_podman_available() -> Result<()> {
    let output = Command::new("podman")
        .arg("--version")
        .output()
        .await
        .context("Failed to execute 'podman --version'. Is podman installed?")?;

    if !output.status.success() {
        anyhow::bail!("Podman is not working correctly");
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("Podman is available: {}", version.trim());

    Ok(())
}

/// Captured result of one podman invocation
struct PodmanOutput {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

impl PodmanOutput {
    fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs podman with `args`, logging stdout/stderr at debug level
async fn podman(args: &[&str]) -> Result<PodmanOutput> {
    let subcommand = args.first().copied().unwrap_or_default();

    let output = Command::new("podman")
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to execute podman {} command", subcommand))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !stdout.trim().is_empty() {
        debug!("podman {} stdout: {}", subcommand, stdout.trim());
    }
    if !stderr.trim().is_empty() {
        debug!("podman {} stderr: {}", subcommand, stderr.trim());
    }

    Ok(PodmanOutput {
        stdout,
        stderr,
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Runs podman and fails unless it exits successfully; returns trimmed stdout
async fn podman_checked(args: &[&str]) -> Result<String> {
    let output = podman(args).await?;

    if !output.success() {
        let error_msg = format!(
            "podman {} failed: exit_code={}, stderr='{}'",
            args.first().copied().unwrap_or_default(),
            output.exit_code,
            output.stderr.trim()
        );
        error!("{}", error_msg);
        anyhow::bail!("{}", error_msg);
    }

    Ok(output.stdout.trim().to_string())
}

/// Podman-backed provider
pub struct PodmanProvider {
    /// Image namespace; regional images live under `<namespace>/<region>/`
    namespace: String,
}

impl PodmanProvider {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    fn image_ref(&self, region: &str, name: &str) -> String {
        format!("{}/{}/{}", self.namespace, region, sanitize(name))
    }

    fn container_name() -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("kiln-build-{}", &id[..12])
    }
}

impl Default for PodmanProvider {
    fn default() -> Self {
        Self::new("localhost/kiln")
    }
}

/// Image references only allow lowercase names
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '.' | '_' | '-' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '-',
        })
        .collect()
}

/// Maps machine architecture names onto podman's platform names
fn podman_arch(architecture: &str) -> &str {
    match architecture {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// Final path segment of an image reference, without its tag
fn image_name_of(reference: &str) -> Option<&str> {
    let last = reference.rsplit('/').next()?;
    let name = last.split_once(':').map_or(last, |(name, _)| name);
    (!name.is_empty()).then_some(name)
}

/// Podman flags placing a container on the requested network
///
/// The VPC names the podman network; without one the subnet does. Both ids
/// and the security group are kept as labels.
fn network_args(network: &NetworkPlacement) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(name) = network.vpc_id.as_ref().or(network.subnet_id.as_ref()) {
        args.push("--network".to_string());
        args.push(name.clone());
    }
    for (label, value) in [
        ("kiln.vpc", &network.vpc_id),
        ("kiln.subnet", &network.subnet_id),
        ("kiln.security-group", &network.security_group),
    ] {
        if let Some(value) = value {
            args.push("--label".to_string());
            args.push(format!("{}={}", label, value));
        }
    }
    args
}

/// Whether a container in `status` is ready; an error once it never will be
fn is_ready(status: &str) -> Result<bool> {
    match parse_state(status) {
        InstanceState::Running => Ok(true),
        InstanceState::Stopped | InstanceState::Terminated => {
            anyhow::bail!("container is {}", status)
        }
        _ => Ok(false),
    }
}

fn parse_state(state: &str) -> InstanceState {
    match state {
        "created" | "configured" | "initialized" => InstanceState::Pending,
        "running" => InstanceState::Running,
        "stopping" => InstanceState::Stopping,
        "stopped" | "exited" => InstanceState::Stopped,
        "removing" | "dead" => InstanceState::Terminated,
        other => InstanceState::Other(other.to_string()),
    }
}

#[async_trait]
impl ProvisioningTarget for PodmanProvider {
    async fn allocate(
        &self,
        base_image: &str,
        region: &str,
        architecture: &str,
        network: &NetworkPlacement,
    ) -> Result<TargetRef> {
        let name = Self::container_name();
        info!(
            "Creating build container {} from {} ({}/{})",
            name, base_image, region, architecture
        );

        let region_label = format!("kiln.region={}", region);
        let placement = network_args(network);
        let mut args: Vec<&str> = vec![
            "run",
            "-d",
            "--name",
            name.as_str(),
            "--arch",
            podman_arch(architecture),
            "--label",
            region_label.as_str(),
            "--entrypoint",
            "/bin/sh",
        ];
        args.extend(placement.iter().map(String::as_str));
        args.extend([base_image, "-c", "sleep infinity"]);

        let container_id = podman_checked(&args)
            .await
            .with_context(|| format!("Failed to start build container from {}", base_image))?;
        debug!("Container {} started with ID {}", name, container_id);

        Ok(TargetRef {
            id: name,
            region: region.to_string(),
            architecture: architecture.to_string(),
        })
    }

    async fn wait_ready(&self, target: &TargetRef) -> Result<()> {
        loop {
            let status =
                podman_checked(&["inspect", "--format", "{{.State.Status}}", &target.id]).await?;
            if is_ready(&status)
                .with_context(|| format!("Container {} will not become ready", target.id))?
            {
                return Ok(());
            }
            debug!("Container {} not running yet ({})", target.id, status);
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn run_script(
        &self,
        target: &TargetRef,
        script: &str,
        timeout: Duration,
    ) -> Result<ScriptOutput> {
        debug!(
            "Executing in container {} (timeout {}s)",
            target.id,
            timeout.as_secs()
        );

        // Dropping the exec future kills the podman client
        let output = tokio::time::timeout(
            timeout,
            podman(&["exec", &target.id, "/bin/sh", "-c", script]),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "Script in container {} timed out after {}s",
                target.id,
                timeout.as_secs()
            )
        })??;

        let mut combined = output.stdout;
        if !output.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&output.stderr);
        }

        Ok(ScriptOutput {
            exit_code: output.exit_code,
            output: combined,
        })
    }

    async fn capture_image(&self, target: &TargetRef, image_name: &str) -> Result<String> {
        let reference = self.image_ref(&target.region, image_name);
        info!("Committing container {} as {}", target.id, reference);

        let image_id = podman_checked(&["commit", &target.id, &reference])
            .await
            .with_context(|| format!("Failed to commit container {}", target.id))?;

        Ok(image_id)
    }

    async fn release(&self, target: &TargetRef) -> Result<()> {
        debug!("Removing container {}", target.id);
        podman_checked(&["rm", "-f", &target.id])
            .await
            .with_context(|| format!("Failed to remove container {}", target.id))?;
        Ok(())
    }
}

#[async_trait]
impl InstanceControl for PodmanProvider {
    async fn describe(&self, instance_id: &str) -> Result<InstanceDescription> {
        let raw = podman_checked(&[
            "inspect",
            "--format",
            "{{.State.Status}}|{{.ImageName}}",
            instance_id,
        ])
        .await
        .with_context(|| format!("Failed to describe container {}", instance_id))?;

        let (state, image) = raw
            .split_once('|')
            .ok_or_else(|| anyhow::anyhow!("Unexpected inspect output: '{}'", raw))?;

        let architecture = podman_checked(&["image", "inspect", "--format", "{{.Architecture}}", image])
            .await
            .unwrap_or_else(|e| {
                warn!("Could not read architecture of {}: {:#}", image, e);
                String::new()
            });

        Ok(InstanceDescription {
            id: instance_id.to_string(),
            state: parse_state(state),
            architecture,
            source_image: image.to_string(),
        })
    }

    async fn stop(&self, instance_id: &str) -> Result<()> {
        info!("Stopping container {}", instance_id);
        podman_checked(&["stop", instance_id])
            .await
            .with_context(|| format!("Failed to stop container {}", instance_id))?;
        Ok(())
    }

    async fn start(&self, instance_id: &str) -> Result<()> {
        info!("Starting container {}", instance_id);
        podman_checked(&["start", instance_id])
            .await
            .with_context(|| format!("Failed to start container {}", instance_id))?;
        Ok(())
    }

    async fn create_image(
        &self,
        instance_id: &str,
        image_name: &str,
        description: &str,
    ) -> Result<String> {
        let region = podman_checked(&[
            "inspect",
            "--format",
            "{{index .Config.Labels \"kiln.region\"}}",
            instance_id,
        ])
        .await
        .unwrap_or_default();
        let region = if region.is_empty() || region == "<no value>" {
            "local".to_string()
        } else {
            region
        };

        let reference = self.image_ref(&region, image_name);
        let message = format!("--message={}", description);
        podman_checked(&["commit", &message, instance_id, &reference])
            .await
            .with_context(|| format!("Failed to commit container {}", instance_id))
    }
}

#[async_trait]
impl ImageCopier for PodmanProvider {
    async fn copy_image(
        &self,
        image_id: &str,
        source_region: &str,
        target_region: &str,
    ) -> Result<String> {
        // Commits return bare ids; reuse the name of the tag they were committed under
        let tagged = podman_checked(&[
            "image",
            "inspect",
            "--format",
            "{{range .RepoTags}}{{.}} {{end}}",
            image_id,
        ])
        .await
        .with_context(|| format!("Failed to inspect image {}", image_id))?;
        let name = tagged
            .split_whitespace()
            .find_map(image_name_of)
            .unwrap_or(image_id);

        let reference = self.image_ref(target_region, name);
        debug!(
            "Tagging {} from {} into {} as {}",
            image_id, source_region, target_region, reference
        );
        podman_checked(&["tag", image_id, &reference])
            .await
            .with_context(|| format!("Failed to copy image {} to {}", image_id, target_region))?;
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Python-ML_1.2.0-x86_64"), "python-ml_1.2.0-x86_64");
        assert_eq!(sanitize("a b/c:d"), "a-b-c-d");
    }

    #[test]
    fn test_image_ref() {
        let provider = PodmanProvider::default();
        assert_eq!(
            provider.image_ref("eu-west-1", "R-Base"),
            "localhost/kiln/eu-west-1/r-base"
        );
    }

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state("running"), InstanceState::Running);
        assert_eq!(parse_state("exited"), InstanceState::Stopped);
        assert_eq!(parse_state("created"), InstanceState::Pending);
        assert_eq!(
            parse_state("paused"),
            InstanceState::Other("paused".to_string())
        );
    }

    #[test]
    fn test_image_name_of() {
        assert_eq!(
            image_name_of("localhost/kiln/us-east-1/python-ml-1.0.0-x86_64:latest"),
            Some("python-ml-1.0.0-x86_64")
        );
        assert_eq!(image_name_of("r-base"), Some("r-base"));
        assert_eq!(image_name_of("localhost:5000/kiln/r-base"), Some("r-base"));
        assert_eq!(image_name_of("localhost/kiln/"), None);
    }

    #[test]
    fn test_network_args() {
        let args = network_args(&NetworkPlacement {
            vpc_id: None,
            subnet_id: Some("build-net".to_string()),
            security_group: Some("sg-1".to_string()),
        });
        assert_eq!(
            args,
            vec![
                "--network",
                "build-net",
                "--label",
                "kiln.subnet=build-net",
                "--label",
                "kiln.security-group=sg-1",
            ]
        );

        let args = network_args(&NetworkPlacement {
            vpc_id: Some("vpc-net".to_string()),
            subnet_id: Some("subnet-1".to_string()),
            security_group: None,
        });
        assert_eq!(&args[..2], ["--network", "vpc-net"]);
        assert!(args.contains(&"kiln.subnet=subnet-1".to_string()));

        assert!(network_args(&NetworkPlacement::default()).is_empty());
    }

    #[test]
    fn test_is_ready() {
        assert!(is_ready("running").unwrap());
        assert!(!is_ready("created").unwrap());
        assert!(is_ready("exited").is_err());
        assert!(is_ready("dead").is_err());
    }

    #[test]
    fn test_podman_arch() {
        assert_eq!(podman_arch("x86_64"), "amd64");
        assert_eq!(podman_arch("arm64"), "arm64");
    }

    #[test]
    fn test_container_names_are_unique() {
        assert_ne!(
            PodmanProvider::container_name(),
            PodmanProvider::container_name()
        );
    }
}
