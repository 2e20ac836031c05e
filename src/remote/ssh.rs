//! SSH transport built on libssh2.
//!
//! Each worker batch opens one session and runs its commands sequentially on
//! it. When a gateway is configured the session goes to
//! `gateway:ssh_port`, which forwards to the worker.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use log::debug;

use crate::alloc::VlanId;
use crate::config::SshConfig;
use crate::inventory::Worker;
use super::commands::CommandSet;
use super::{HostConnector, RemoteConfigExecutor, RemoteError};

/// Keyboard-interactive prompt handler that always responds with the password
struct PasswordPrompt {
    password: String,
}

impl ssh2::KeyboardInteractivePrompt for PasswordPrompt {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.clone()).collect()
    }
}

/// How sessions authenticate
#[derive(Debug, Clone)]
pub enum SshAuth {
    Password(String),
    IdentityFile(PathBuf),
    Agent,
}

/// Opens SSH sessions to workers
#[derive(Debug, Clone)]
pub struct SshConnector {
    gateway: Option<String>,
    user: String,
    auth: SshAuth,
    timeout: Duration,
    commands: CommandSet,
}

impl SshConnector {
    pub fn new(config: &SshConfig, auth: SshAuth, commands: CommandSet) -> Self {
        SshConnector {
            gateway: config.gateway.clone(),
            user: config.user.clone(),
            auth,
            timeout: config.timeout,
            commands,
        }
    }

    /// Builds the connector from the ssh section, reading the password from
    /// `password_env` when one is named.
    pub fn from_config(config: &SshConfig, commands: CommandSet) -> Result<Self, RemoteError> {
        let auth = if let Some(var) = &config.password_env {
            let password = std::env::var(var).map_err(|_| {
                RemoteError::Transport(format!("environment variable {} is not set", var))
            })?;
            SshAuth::Password(password)
        } else if let Some(path) = &config.identity_file {
            SshAuth::IdentityFile(path.clone())
        } else {
            SshAuth::Agent
        };
        Ok(Self::new(config, auth, commands))
    }

    /// Host and port the session for `worker` is opened against
    pub fn endpoint(&self, worker: &Worker) -> (String, u16) {
        match &self.gateway {
            Some(gateway) => (gateway.clone(), worker.ssh_port),
            None => (worker.address.clone(), worker.ssh_port),
        }
    }

    fn open_session(&self, worker: &Worker) -> Result<ssh2::Session, String> {
        let (host, port) = self.endpoint(worker);
        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| format!("Invalid address {}:{}: {}", host, port, e))?
            .next()
            .ok_or_else(|| format!("No address found for {}:{}", host, port))?;

        let tcp = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| format!("TCP connection failed: {}", e))?;
        tcp.set_read_timeout(Some(self.timeout)).ok();
        tcp.set_write_timeout(Some(self.timeout)).ok();

        let mut session = ssh2::Session::new()
            .map_err(|e| format!("Failed to create SSH session: {}", e))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(self.timeout.as_millis().min(u32::MAX as u128) as u32);
        session
            .handshake()
            .map_err(|e| format!("SSH handshake failed: {}", e))?;

        match &self.auth {
            SshAuth::Password(password) => {
                // Try password auth first, then keyboard-interactive
                if session.userauth_password(&self.user, password).is_err() || !session.authenticated() {
                    let mut prompter = PasswordPrompt {
                        password: password.clone(),
                    };
                    let _ = session.userauth_keyboard_interactive(&self.user, &mut prompter);
                }
            }
            SshAuth::IdentityFile(path) => {
                session
                    .userauth_pubkey_file(&self.user, None, path, None)
                    .map_err(|e| format!("Public key authentication failed: {}", e))?;
            }
            SshAuth::Agent => {
                session
                    .userauth_agent(&self.user)
                    .map_err(|e| format!("Agent authentication failed: {}", e))?;
            }
        }

        if session.authenticated() {
            Ok(session)
        } else {
            Err("SSH authentication failed: all methods exhausted".to_string())
        }
    }
}

impl HostConnector for SshConnector {
    fn connect(&self, worker: &Worker) -> Result<Box<dyn RemoteConfigExecutor + '_>, RemoteError> {
        let session = self.open_session(worker).map_err(|reason| RemoteError::Connect {
            worker: worker.name.clone(),
            reason,
        })?;
        debug!("Opened SSH session to {}", worker.name);
        Ok(Box::new(SshExecutor {
            session,
            commands: &self.commands,
        }))
    }
}

/// Output of one remote command, stderr merged into stdout
struct CommandOutput {
    status: i32,
    output: String,
}

impl CommandOutput {
    fn check(self, command: &str) -> Result<(), RemoteError> {
        if self.status == 0 {
            Ok(())
        } else {
            Err(RemoteError::Command {
                command: command.to_string(),
                status: self.status,
                output: self.output.trim().to_string(),
            })
        }
    }
}

/// Executor bound to one open session
pub struct SshExecutor<'a> {
    session: ssh2::Session,
    commands: &'a CommandSet,
}

impl SshExecutor<'_> {
    fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        debug!("ssh: {}", command);
        let transport = |e: ssh2::Error| RemoteError::Transport(format!("{}: {}", command, e));

        let mut channel = self.session.channel_session().map_err(transport)?;
        // stderr arrives on the stdout stream
        channel
            .handle_extended_data(ssh2::ExtendedData::Merge)
            .map_err(transport)?;
        channel.exec(command).map_err(transport)?;

        let mut output = String::new();
        channel
            .read_to_string(&mut output)
            .map_err(|e| RemoteError::Transport(format!("Failed to read output: {}", e)))?;

        channel.wait_close().map_err(transport)?;
        let status = channel.exit_status().map_err(transport)?;
        Ok(CommandOutput { status, output })
    }

    fn run_checked(&self, command: &str) -> Result<(), RemoteError> {
        self.run(command)?.check(command)
    }
}

impl RemoteConfigExecutor for SshExecutor<'_> {
    fn ensure_tap_exists(&mut self, vm: &str, tap: &str) -> Result<bool, RemoteError> {
        let probe = self.commands.tap_present(tap);
        if self.run(&probe)?.status == 0 {
            debug!("Tap {} of {} already present", tap, vm);
            return Ok(true);
        }

        self.run_checked(&self.commands.create_tap(tap))?;
        Ok(self.run(&probe)?.status == 0)
    }

    fn set_port_vlan(&mut self, tap: &str, vlan: VlanId) -> Result<(), RemoteError> {
        self.run_checked(&self.commands.set_vlan(tap, vlan))
    }

    fn clear_port_vlan(&mut self, tap: &str) -> Result<(), RemoteError> {
        self.run_checked(&self.commands.clear_vlan(tap))
    }

    fn remove_tap(&mut self, tap: &str) -> Result<(), RemoteError> {
        self.run_checked(&self.commands.delete_tap(tap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> Worker {
        Worker {
            name: "worker2".to_string(),
            address: "10.0.10.2".to_string(),
            ssh_port: 5802,
            cpus: 4,
            ram_mb: 4096,
        }
    }

    #[test]
    fn test_endpoint_through_gateway() {
        let config = SshConfig {
            gateway: Some("10.20.12.28".to_string()),
            ..SshConfig::default()
        };
        let connector = SshConnector::new(&config, SshAuth::Agent, CommandSet::new("br-int", true));
        assert_eq!(connector.endpoint(&worker()), ("10.20.12.28".to_string(), 5802));
    }

    #[test]
    fn test_endpoint_direct() {
        let connector = SshConnector::new(&SshConfig::default(), SshAuth::Agent, CommandSet::new("br-int", true));
        assert_eq!(connector.endpoint(&worker()), ("10.0.10.2".to_string(), 5802));
    }

    #[test]
    fn test_failed_command_keeps_merged_output() {
        let output = CommandOutput {
            status: 1,
            output: "ovs-vsctl: no port named tap9\n".to_string(),
        };
        assert_eq!(
            output.check("ovs-vsctl set port tap9 tag=100"),
            Err(RemoteError::Command {
                command: "ovs-vsctl set port tap9 tag=100".to_string(),
                status: 1,
                output: "ovs-vsctl: no port named tap9".to_string(),
            })
        );

        let ok = CommandOutput {
            status: 0,
            output: String::new(),
        };
        assert_eq!(ok.check("true"), Ok(()));
    }

    #[test]
    fn test_missing_password_env() {
        let config = SshConfig {
            password_env: Some("VTOPO_TEST_UNSET_PASSWORD_VAR".to_string()),
            ..SshConfig::default()
        };
        let result = SshConnector::from_config(&config, CommandSet::new("br-int", true));
        assert!(matches!(result, Err(RemoteError::Transport(_))));
    }
}
