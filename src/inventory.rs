//! Worker registry and VM inventory.
//!
//! The inventory is read-only to the engine. It is built either from an
//! explicit VM list or by placing VMs round-robin across the workers.

use std::collections::HashMap;

use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::alloc::MAX_IFNAME_LEN;
use crate::config::{Config, PlacementConfig, VmConfig, WorkerConfig};

/// MAC prefix for placed VMs; the last octet is random.
const MAC_PREFIX: &str = "20:19:37:33:ee";

/// A worker host that runs VMs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub name: String,
    pub address: String,
    pub ssh_port: u16,
    pub cpus: u32,
    pub ram_mb: u64,
}

impl From<&WorkerConfig> for Worker {
    fn from(config: &WorkerConfig) -> Self {
        Worker {
            name: config.name.clone(),
            address: config.address.clone(),
            ssh_port: config.ssh_port,
            cpus: config.cpus,
            ram_mb: config.ram_mb,
        }
    }
}

/// A VM as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    pub name: String,
    pub worker: String,
    pub cpus: u32,
    pub ram_mb: u64,
    pub disk_gb: u64,
    /// Tap devices for this VM are named `{tap_base}{slot}`
    pub tap_base: String,
    pub vnc_port: u16,
    pub mac: String,
}

/// Default tap base name for a VM on a bridge.
///
/// The bridge prefix is dropped when it leaves no room for a slot digit
/// within the interface name limit.
pub fn default_tap_base(bridge: &str, vm: &str) -> String {
    let base = format!("{}-{}-tap", bridge, vm);
    if base.len() < MAX_IFNAME_LEN {
        base
    } else {
        format!("{}-tap", vm)
    }
}

fn random_mac() -> String {
    let suffix: u8 = rand::thread_rng().gen();
    format!("{}:{:02x}", MAC_PREFIX, suffix)
}

/// Workers plus the VMs placed on them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    workers: Vec<Worker>,
    vms: Vec<Vm>,
}

impl Inventory {
    pub fn new(workers: Vec<Worker>, vms: Vec<Vm>) -> Self {
        Inventory { workers, vms }
    }

    /// Builds the inventory described by a validated configuration
    pub fn from_config(config: &Config) -> Self {
        let workers: Vec<Worker> = config.workers.iter().map(Worker::from).collect();
        let bridge = &config.general.bridge;

        let vms = match &config.placement {
            Some(placement) if config.vms.is_empty() => place_round_robin(&workers, placement, bridge, 1),
            _ => config
                .vms
                .iter()
                .enumerate()
                .map(|(i, vm)| vm_from_config(vm, bridge, i + 1))
                .collect(),
        };

        let inventory = Inventory::new(workers, vms);
        inventory.warn_overcommit();
        info!(
            "Inventory: {} VMs across {} workers",
            inventory.vms.len(),
            inventory.workers.len()
        );
        inventory
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn vms(&self) -> &[Vm] {
        &self.vms
    }

    pub fn vm(&self, name: &str) -> Option<&Vm> {
        self.vms.iter().find(|vm| vm.name == name)
    }

    pub fn worker(&self, name: &str) -> Option<&Worker> {
        self.workers.iter().find(|w| w.name == name)
    }

    pub fn contains(&self, vm: &str) -> bool {
        self.vm(vm).is_some()
    }

    /// First name in `names` that is not in the inventory
    pub fn first_unknown<'a>(&self, names: &'a [String]) -> Option<&'a String> {
        names.iter().find(|name| !self.contains(name))
    }

    /// Removes a VM from the inventory; topology records are not touched
    pub fn remove(&mut self, name: &str) -> Option<Vm> {
        let index = self.vms.iter().position(|vm| vm.name == name)?;
        Some(self.vms.remove(index))
    }

    /// CPUs and RAM committed on each worker
    pub fn commitments(&self) -> HashMap<&str, (u32, u64)> {
        let mut usage: HashMap<&str, (u32, u64)> = HashMap::new();
        for vm in &self.vms {
            let entry = usage.entry(vm.worker.as_str()).or_default();
            entry.0 += vm.cpus;
            entry.1 += vm.ram_mb;
        }
        usage
    }

    fn warn_overcommit(&self) {
        let usage = self.commitments();
        for worker in &self.workers {
            let Some(&(cpus, ram_mb)) = usage.get(worker.name.as_str()) else {
                continue;
            };
            if worker.cpus > 0 && cpus > worker.cpus {
                warn!("Worker {} overcommitted: {} vCPUs on {} CPUs", worker.name, cpus, worker.cpus);
            }
            if worker.ram_mb > 0 && ram_mb > worker.ram_mb {
                warn!("Worker {} overcommitted: {} MB RAM on {} MB", worker.name, ram_mb, worker.ram_mb);
            }
        }
    }
}

fn vm_from_config(config: &VmConfig, bridge: &str, index: usize) -> Vm {
    Vm {
        name: config.name.clone(),
        worker: config.worker.clone(),
        cpus: config.cpus,
        ram_mb: config.ram_mb,
        disk_gb: config.disk_gb,
        tap_base: config
            .tap
            .clone()
            .unwrap_or_else(|| default_tap_base(bridge, &config.name)),
        vnc_port: config.vnc_port.unwrap_or(index as u16),
        mac: config.mac.clone().unwrap_or_else(random_mac),
    }
}

/// Places `placement.count` VMs over the workers in round-robin order.
///
/// VMs are named `VM{n}` starting at `first_index`; the VNC display number
/// matches `n`.
pub fn place_round_robin(
    workers: &[Worker],
    placement: &PlacementConfig,
    bridge: &str,
    first_index: usize,
) -> Vec<Vm> {
    if workers.is_empty() {
        return Vec::new();
    }

    (0..placement.count)
        .map(|i| {
            let index = first_index + i;
            let worker = &workers[i % workers.len()];
            let name = format!("VM{}", index);
            Vm {
                tap_base: default_tap_base(bridge, &name),
                name,
                worker: worker.name.clone(),
                cpus: placement.cpus,
                ram_mb: placement.ram_mb,
                disk_gb: placement.disk_gb,
                vnc_port: index as u16,
                mac: random_mac(),
            }
        })
        .collect()
}
