//! Connector that logs commands instead of running them.

use log::info;

use crate::alloc::VlanId;
use crate::inventory::Worker;
use super::commands::CommandSet;
use super::{HostConnector, RemoteConfigExecutor, RemoteError};

/// Every step succeeds; the commands that would run are logged at info.
#[derive(Debug, Clone)]
pub struct DryRunConnector {
    commands: CommandSet,
}

impl DryRunConnector {
    pub fn new(commands: CommandSet) -> Self {
        DryRunConnector { commands }
    }
}

impl HostConnector for DryRunConnector {
    fn connect(&self, worker: &Worker) -> Result<Box<dyn RemoteConfigExecutor + '_>, RemoteError> {
        Ok(Box::new(DryRunExecutor {
            worker: worker.name.clone(),
            commands: &self.commands,
        }))
    }
}

struct DryRunExecutor<'a> {
    worker: String,
    commands: &'a CommandSet,
}

impl RemoteConfigExecutor for DryRunExecutor<'_> {
    fn ensure_tap_exists(&mut self, _vm: &str, tap: &str) -> Result<bool, RemoteError> {
        info!(
            "[dry-run] {}: {} || {}",
            self.worker,
            self.commands.tap_present(tap),
            self.commands.create_tap(tap)
        );
        Ok(true)
    }

    fn set_port_vlan(&mut self, tap: &str, vlan: VlanId) -> Result<(), RemoteError> {
        info!("[dry-run] {}: {}", self.worker, self.commands.set_vlan(tap, vlan));
        Ok(())
    }

    fn clear_port_vlan(&mut self, tap: &str) -> Result<(), RemoteError> {
        info!("[dry-run] {}: {}", self.worker, self.commands.clear_vlan(tap));
        Ok(())
    }

    fn remove_tap(&mut self, tap: &str) -> Result<(), RemoteError> {
        info!("[dry-run] {}: {}", self.worker, self.commands.delete_tap(tap));
        Ok(())
    }
}
