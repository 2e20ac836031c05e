use crate::config::Config;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{info, warn};
use std::fs::File;
use std::path::Path;

/// Load and parse a cluster file
pub fn load_config(config_path: &Path) -> Result<Config> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open cluster file '{}'", config_path.display()))?;

    let config: Config = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse cluster file '{}'", config_path.display()))?;

    config.validate()?;
    report_config(&config);

    Ok(config)
}

/// Parse a cluster file from a string
pub fn parse_config(yaml: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(yaml).wrap_err("Failed to parse cluster configuration")?;
    config.validate()?;
    Ok(config)
}

fn report_config(config: &Config) {
    let vm_count = match (&config.placement, config.vms.len()) {
        (Some(placement), 0) => placement.count,
        (_, n) => n,
    };
    info!(
        "Cluster: {} workers, {} VMs, {} topology requests, {} interconnects",
        config.workers.len(),
        vm_count,
        config.topologies.len(),
        config.interconnects.len()
    );

    if config.ssh.password_env.is_none() && config.ssh.identity_file.is_none() {
        warn!("No SSH password or identity file configured, falling back to the SSH agent");
    }
}
