//! Remote configuration of worker hosts.
//!
//! The engine only talks to hosts through [`HostConnector`] and
//! [`RemoteConfigExecutor`]. [`ssh::SshConnector`] is the real transport;
//! [`dry_run::DryRunConnector`] only logs what would be run.

pub mod commands;
pub mod dry_run;
pub mod ssh;

use serde::Serialize;

use crate::alloc::VlanId;
use crate::inventory::Worker;

pub use commands::CommandSet;
pub use dry_run::DryRunConnector;
pub use ssh::SshConnector;

/// A failed remote step. Recorded in reports, never propagated out of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum RemoteError {
    #[error("Cannot reach worker {worker}: {reason}")]
    Connect { worker: String, reason: String },

    #[error("Command `{command}` exited with status {status}: {output}")]
    Command {
        command: String,
        status: i32,
        output: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Tap {0} is missing after creation")]
    TapMissing(String),
}

/// Switch-port operations on one worker.
///
/// Implementations hold one open connection; every call may fail on its own.
pub trait RemoteConfigExecutor {
    /// Creates the tap, brings it up and attaches it to the switch when it is
    /// missing. Returns whether the interface is present afterwards.
    fn ensure_tap_exists(&mut self, vm: &str, tap: &str) -> Result<bool, RemoteError>;

    fn set_port_vlan(&mut self, tap: &str, vlan: VlanId) -> Result<(), RemoteError>;

    fn clear_port_vlan(&mut self, tap: &str) -> Result<(), RemoteError>;

    /// Detaches the tap from the switch and deletes it. Succeeds when the tap
    /// is already gone.
    fn remove_tap(&mut self, tap: &str) -> Result<(), RemoteError>;
}

/// Opens executors for workers. Shared across apply threads.
pub trait HostConnector: Sync {
    fn connect(&self, worker: &Worker) -> Result<Box<dyn RemoteConfigExecutor + '_>, RemoteError>;
}

impl<T: HostConnector + ?Sized> HostConnector for &T {
    fn connect(&self, worker: &Worker) -> Result<Box<dyn RemoteConfigExecutor + '_>, RemoteError> {
        (**self).connect(worker)
    }
}

impl<T: HostConnector + ?Sized> HostConnector for Box<T> {
    fn connect(&self, worker: &Worker) -> Result<Box<dyn RemoteConfigExecutor + '_>, RemoteError> {
        (**self).connect(worker)
    }
}
