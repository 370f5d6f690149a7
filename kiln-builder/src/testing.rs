//! Scripted in-memory provider for service tests
//!
//! Records every call and answers from a script table instead of touching
//! real compute.

use anyhow::Result;
use async_trait::async_trait;
use kiln_core::domain::build::{NetworkPlacement, TargetRef};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::provider::{
    ImageCopier, InstanceControl, InstanceDescription, InstanceState, ProvisioningTarget,
    ScriptOutput,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Allocate { base: String, region: String },
    WaitReady(String),
    RunScript(String),
    CaptureImage(String),
    Release(String),
    Describe(String),
    Stop(String),
    Start(String),
    CreateImage(String),
    CopyImage { image: String, to: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailOp {
    Allocate,
    WaitReady,
    Capture,
    Release,
    Stop,
    Start,
    CreateImage,
}

pub struct FakeProvider {
    calls: Mutex<Vec<Call>>,
    scripts: HashMap<String, ScriptOutput>,
    hanging: HashSet<String>,
    failing: HashSet<FailOp>,
    failing_regions: HashSet<String>,
    instance_state: Mutex<InstanceState>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            scripts: HashMap::new(),
            hanging: HashSet::new(),
            failing: HashSet::new(),
            failing_regions: HashSet::new(),
            instance_state: Mutex::new(InstanceState::Running),
        }
    }

    /// Scripts not listed here exit 0 with output "ok"
    pub fn with_script(mut self, script: &str, exit_code: i32, output: &str) -> Self {
        self.scripts.insert(
            script.to_string(),
            ScriptOutput {
                exit_code,
                output: output.to_string(),
            },
        );
        self
    }

    /// The script never finishes
    pub fn hanging_script(mut self, script: &str) -> Self {
        self.hanging.insert(script.to_string());
        self
    }

    pub fn failing(mut self, op: FailOp) -> Self {
        self.failing.insert(op);
        self
    }

    pub fn failing_region(mut self, region: &str) -> Self {
        self.failing_regions.insert(region.to_string());
        self
    }

    pub fn with_instance_state(self, state: InstanceState) -> Self {
        *self.instance_state.lock().unwrap() = state;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn scripts_run(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::RunScript(script) => Some(script),
                _ => None,
            })
            .collect()
    }

    pub fn released(&self) -> bool {
        self.calls().iter().any(|c| matches!(c, Call::Release(_)))
    }

    pub fn instance_state(&self) -> InstanceState {
        self.instance_state.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, op: FailOp) -> Result<()> {
        if self.failing.contains(&op) {
            anyhow::bail!("scripted {:?} failure", op);
        }
        Ok(())
    }
}

#[async_trait]
impl ProvisioningTarget for FakeProvider {
    async fn allocate(
        &self,
        base_image: &str,
        region: &str,
        architecture: &str,
        _network: &NetworkPlacement,
    ) -> Result<TargetRef> {
        self.record(Call::Allocate {
            base: base_image.to_string(),
            region: region.to_string(),
        });
        self.check(FailOp::Allocate)?;
        Ok(TargetRef {
            id: "target-1".to_string(),
            region: region.to_string(),
            architecture: architecture.to_string(),
        })
    }

    async fn wait_ready(&self, target: &TargetRef) -> Result<()> {
        self.record(Call::WaitReady(target.id.clone()));
        self.check(FailOp::WaitReady)
    }

    async fn run_script(
        &self,
        _target: &TargetRef,
        script: &str,
        _timeout: Duration,
    ) -> Result<ScriptOutput> {
        self.record(Call::RunScript(script.to_string()));
        if self.hanging.contains(script) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(self.scripts.get(script).cloned().unwrap_or(ScriptOutput {
            exit_code: 0,
            output: "ok".to_string(),
        }))
    }

    async fn capture_image(&self, target: &TargetRef, _image_name: &str) -> Result<String> {
        self.record(Call::CaptureImage(target.id.clone()));
        self.check(FailOp::Capture)?;
        Ok(format!("img-{}", target.id))
    }

    async fn release(&self, target: &TargetRef) -> Result<()> {
        self.record(Call::Release(target.id.clone()));
        self.check(FailOp::Release)
    }
}

#[async_trait]
impl InstanceControl for FakeProvider {
    async fn describe(&self, instance_id: &str) -> Result<InstanceDescription> {
        self.record(Call::Describe(instance_id.to_string()));
        Ok(InstanceDescription {
            id: instance_id.to_string(),
            state: self.instance_state(),
            architecture: "x86_64".to_string(),
            source_image: "ubuntu-22.04".to_string(),
        })
    }

    async fn stop(&self, instance_id: &str) -> Result<()> {
        self.record(Call::Stop(instance_id.to_string()));
        self.check(FailOp::Stop)?;
        *self.instance_state.lock().unwrap() = InstanceState::Stopped;
        Ok(())
    }

    async fn start(&self, instance_id: &str) -> Result<()> {
        self.record(Call::Start(instance_id.to_string()));
        self.check(FailOp::Start)?;
        *self.instance_state.lock().unwrap() = InstanceState::Running;
        Ok(())
    }

    async fn create_image(
        &self,
        instance_id: &str,
        _image_name: &str,
        _description: &str,
    ) -> Result<String> {
        self.record(Call::CreateImage(instance_id.to_string()));
        self.check(FailOp::CreateImage)?;
        Ok(format!("img-{}", instance_id))
    }
}

#[async_trait]
impl ImageCopier for FakeProvider {
    async fn copy_image(
        &self,
        image_id: &str,
        _source_region: &str,
        target_region: &str,
    ) -> Result<String> {
        self.record(Call::CopyImage {
            image: image_id.to_string(),
            to: target_region.to_string(),
        });
        if self.failing_regions.contains(target_region) {
            anyhow::bail!("copy to {} rejected", target_region);
        }
        Ok(format!("{}-{}", image_id, target_region))
    }
}
