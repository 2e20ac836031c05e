use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::alloc::{VlanId, DEFAULT_VLAN_START, MAX_VLAN_ID};
use crate::topology::planner::DEFAULT_TREE_DEPTH;
use crate::topology::{CompositeRequest, MemberOrder, PlannerOptions};

/// Cluster configuration: workers, VM inventory and an optional topology plan
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    pub workers: Vec<WorkerConfig>,
    /// Explicit VM inventory
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vms: Vec<VmConfig>,
    /// Round-robin placement, used when `vms` is empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<PlacementConfig>,
    /// Composite topology requests applied by `vtopo apply`, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topologies: Vec<String>,
    /// Interconnections applied after the topologies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interconnects: Vec<InterconnectConfig>,
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_general()?;
        self.validate_ssh()?;
        self.validate_workers()?;
        self.validate_inventory()?;

        for text in &self.topologies {
            text.parse::<CompositeRequest>()
                .map_err(|e| ConfigError::InvalidPlan(format!("topology '{}': {}", text, e)))?;
        }
        for link in &self.interconnects {
            if link.a == link.b {
                return Err(ConfigError::InvalidPlan(format!(
                    "interconnect {} <-> {} links a VM to itself",
                    link.a, link.b
                )));
            }
        }

        Ok(())
    }

    fn validate_general(&self) -> Result<(), ConfigError> {
        let general = &self.general;
        if general.vlan_start == 0 || general.vlan_start > MAX_VLAN_ID {
            return Err(ConfigError::InvalidGeneral(format!(
                "vlan_start must be between 1 and {}, got {}",
                MAX_VLAN_ID, general.vlan_start
            )));
        }
        if !(1..=6).contains(&general.tree_depth) {
            return Err(ConfigError::InvalidGeneral(format!(
                "tree_depth must be between 1 and 6, got {}",
                general.tree_depth
            )));
        }
        if general.bridge.trim().is_empty() {
            return Err(ConfigError::InvalidGeneral("bridge cannot be empty".to_string()));
        }
        if let (Some(level), None) = (&general.log_level, general.log_filter()) {
            return Err(ConfigError::InvalidGeneral(format!(
                "log_level must be off, error, warn, info, debug or trace, got '{}'",
                level
            )));
        }
        Ok(())
    }

    fn validate_ssh(&self) -> Result<(), ConfigError> {
        if self.ssh.user.trim().is_empty() {
            return Err(ConfigError::InvalidSsh("user cannot be empty".to_string()));
        }
        if self.ssh.timeout.is_zero() {
            return Err(ConfigError::InvalidSsh("timeout must be greater than zero".to_string()));
        }
        Ok(())
    }

    fn validate_workers(&self) -> Result<(), ConfigError> {
        if self.workers.is_empty() {
            return Err(ConfigError::InvalidWorker("at least one worker is required".to_string()));
        }

        let mut names = HashSet::new();
        for worker in &self.workers {
            if worker.name.trim().is_empty() {
                return Err(ConfigError::InvalidWorker("worker name cannot be empty".to_string()));
            }
            if !names.insert(worker.name.as_str()) {
                return Err(ConfigError::InvalidWorker(format!(
                    "duplicate worker name '{}'",
                    worker.name
                )));
            }
            if worker.address.trim().is_empty() {
                return Err(ConfigError::InvalidWorker(format!(
                    "worker '{}' has no address",
                    worker.name
                )));
            }
            if worker.ssh_port == 0 {
                return Err(ConfigError::InvalidWorker(format!(
                    "worker '{}' has ssh_port 0",
                    worker.name
                )));
            }
        }
        Ok(())
    }

    fn validate_inventory(&self) -> Result<(), ConfigError> {
        if !self.vms.is_empty() && self.placement.is_some() {
            return Err(ConfigError::InvalidVm(
                "use either an explicit vms list or placement, not both".to_string(),
            ));
        }

        let workers: HashSet<&str> = self.workers.iter().map(|w| w.name.as_str()).collect();
        let mut names = HashSet::new();
        for vm in &self.vms {
            if vm.name.trim().is_empty() {
                return Err(ConfigError::InvalidVm("VM name cannot be empty".to_string()));
            }
            if !names.insert(vm.name.as_str()) {
                return Err(ConfigError::InvalidVm(format!("duplicate VM name '{}'", vm.name)));
            }
            if !workers.contains(vm.worker.as_str()) {
                return Err(ConfigError::InvalidVm(format!(
                    "VM '{}' references unknown worker '{}'",
                    vm.name, vm.worker
                )));
            }
            if vm.cpus == 0 || vm.ram_mb == 0 {
                return Err(ConfigError::InvalidVm(format!(
                    "VM '{}' needs at least one CPU and some RAM",
                    vm.name
                )));
            }
        }

        if let Some(placement) = &self.placement {
            if placement.count == 0 {
                return Err(ConfigError::InvalidVm("placement.count must be greater than zero".to_string()));
            }
            if placement.cpus == 0 || placement.ram_mb == 0 {
                return Err(ConfigError::InvalidVm(
                    "placement needs at least one CPU and some RAM per VM".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Planner settings derived from the general section
    pub fn planner_options(&self) -> PlannerOptions {
        PlannerOptions {
            order: self.general.member_order,
            tree_depth: self.general.tree_depth,
        }
    }
}

/// General engine settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default = "default_vlan_start")]
    pub vlan_start: VlanId,
    #[serde(default = "default_tree_depth")]
    pub tree_depth: u32,
    #[serde(default)]
    pub member_order: MemberOrder,
    /// Apply per-worker batches concurrently
    #[serde(default = "default_true")]
    pub parallel: bool,
    /// Open vSwitch bridge the taps are attached to
    #[serde(default = "default_bridge")]
    pub bridge: String,
}

/// SSH access to the workers
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SshConfig {
    /// Gateway host forwarding `ssh_port` to each worker; workers are
    /// contacted directly on their address when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default = "default_user")]
    pub user: String,
    /// Environment variable holding the password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Prefix privileged commands with `sudo -n`
    #[serde(default = "default_true")]
    pub sudo: bool,
}

/// A worker host
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkerConfig {
    pub name: String,
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default)]
    pub cpus: u32,
    #[serde(default)]
    pub ram_mb: u64,
}

/// A VM placed by the allocation collaborator
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VmConfig {
    pub name: String,
    pub worker: String,
    #[serde(default = "default_vm_cpus")]
    pub cpus: u32,
    #[serde(default = "default_vm_ram")]
    pub ram_mb: u64,
    #[serde(default = "default_vm_disk")]
    pub disk_gb: u64,
    /// Tap base name; `{bridge}-{name}-tap` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tap: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vnc_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

/// Round-robin placement of `count` identical VMs
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlacementConfig {
    pub count: usize,
    #[serde(default = "default_vm_cpus")]
    pub cpus: u32,
    #[serde(default = "default_vm_ram")]
    pub ram_mb: u64,
    #[serde(default = "default_vm_disk")]
    pub disk_gb: u64,
}

/// An interconnection to apply after the topologies
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InterconnectConfig {
    pub a: String,
    pub b: String,
    /// Allow linking two members of the same group
    #[serde(default)]
    pub force: bool,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid general configuration: {0}")]
    InvalidGeneral(String),
    #[error("Invalid ssh configuration: {0}")]
    InvalidSsh(String),
    #[error("Invalid worker configuration: {0}")]
    InvalidWorker(String),
    #[error("Invalid VM configuration: {0}")]
    InvalidVm(String),
    #[error("Invalid topology plan: {0}")]
    InvalidPlan(String),
}

impl GeneralConfig {
    /// `log_level` as a filter, if set and valid
    pub fn log_filter(&self) -> Option<LevelFilter> {
        self.log_level.as_deref().and_then(|level| level.parse().ok())
    }
}

fn default_vlan_start() -> VlanId {
    DEFAULT_VLAN_START
}

fn default_tree_depth() -> u32 {
    DEFAULT_TREE_DEPTH
}

fn default_true() -> bool {
    true
}

fn default_bridge() -> String {
    "br-int".to_string()
}

fn default_user() -> String {
    "ubuntu".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_ssh_port() -> u16 {
    22
}

fn default_vm_cpus() -> u32 {
    1
}

fn default_vm_ram() -> u64 {
    512
}

fn default_vm_disk() -> u64 {
    1
}

/// Default implementations
impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            vlan_start: default_vlan_start(),
            tree_depth: default_tree_depth(),
            member_order: MemberOrder::default(),
            parallel: true,
            bridge: default_bridge(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            gateway: None,
            user: default_user(),
            password_env: None,
            identity_file: None,
            timeout: default_timeout(),
            sudo: true,
        }
    }
}
