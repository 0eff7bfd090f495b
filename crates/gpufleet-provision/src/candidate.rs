//! A single speculative rental in the race, grounded on
//! `provisioner.py`'s `GPUCandidate`/`ProvisionResult` dataclasses.

use gpufleet_core::model::{InstanceId, MachineId, OfferId};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct GPUCandidate {
    pub instance_id: InstanceId,
    pub offer_id: OfferId,
    pub machine_id: MachineId,
    pub gpu_name: String,
    pub ssh_host: Option<String>,
    pub ssh_port: Option<u16>,
    pub connected: bool,
    pub failed: bool,
    pub provision_start: Instant,
    pub ssh_ready_after: Option<Duration>,
    pub ssh_attempts: u32,
}

impl GPUCandidate {
    pub fn new(instance_id: InstanceId, offer_id: OfferId, machine_id: MachineId, gpu_name: String) -> Self {
        Self {
            instance_id,
            offer_id,
            machine_id,
            gpu_name,
            ssh_host: None,
            ssh_port: None,
            connected: false,
            failed: false,
            provision_start: Instant::now(),
            ssh_ready_after: None,
            ssh_attempts: 0,
        }
    }

    pub fn has_ssh_endpoint(&self) -> bool {
        self.ssh_host.is_some() && self.ssh_port.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProvisionResult {
    pub success: bool,
    pub instance_id: Option<InstanceId>,
    pub ssh_host: Option<String>,
    pub ssh_port: Option<u16>,
    pub gpu_name: Option<String>,
    pub rounds_attempted: u32,
    pub total_time_ms: u64,
    pub gpus_tried: u32,
    pub ssh_ready_after: Option<Duration>,
    pub error: Option<String>,
}
