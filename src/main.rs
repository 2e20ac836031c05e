use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use env_logger::{Env, DEFAULT_FILTER_ENV};
use log::{info, warn, LevelFilter};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use vtopo::config::Config;
use vtopo::config_loader;
use vtopo::engine::report::write_json_report;
use vtopo::engine::{EngineOptions, TopologyEngine};
use vtopo::inventory::Inventory;
use vtopo::remote::{CommandSet, DryRunConnector, HostConnector, SshConnector};
use vtopo::render::to_dot;
use vtopo::shell::{Command, Session};
use vtopo::topology::CompositeRequest;

/// VLAN topology orchestrator for VMs spread over worker hosts
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply the topologies and interconnects listed in the cluster file
    Apply {
        /// Path to the cluster YAML file
        #[arg(short, long)]
        config: PathBuf,

        /// Log the commands instead of running them on the workers
        #[arg(long)]
        dry_run: bool,

        /// Write a JSON session report to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Write the resulting topology as GraphViz to this path
        #[arg(long)]
        dot: Option<PathBuf>,
    },
    /// Interactive session on the cluster
    Shell {
        /// Path to the cluster YAML file
        #[arg(short, long)]
        config: PathBuf,

        /// Log the commands instead of running them on the workers
        #[arg(long)]
        dry_run: bool,

        /// Write a JSON session report to this path on exit
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Print the planned edges without allocating or contacting workers
    Plan {
        /// Path to the cluster YAML file
        #[arg(short, long)]
        config: PathBuf,
    },
}

impl Commands {
    fn config_path(&self) -> &Path {
        match self {
            Commands::Apply { config, .. } | Commands::Shell { config, .. } | Commands::Plan { config } => config.as_path(),
        }
    }
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();

    // RUST_LOG wins over the cluster file, which wins over "info"
    let from_env = init_logging();
    let config = config_loader::load_config(args.command.config_path())?;
    if let Some(level) = config.general.log_filter().filter(|_| !from_env) {
        log::set_max_level(level);
    }

    info!("Starting vtopo with cluster file {:?}", args.command.config_path());

    match args.command {
        Commands::Apply {
            dry_run, report, dot, ..
        } => run_apply(&config, dry_run, report.as_deref(), dot.as_deref()),
        Commands::Shell { dry_run, report, .. } => run_shell(&config, dry_run, report.as_deref()),
        Commands::Plan { .. } => run_plan(&config),
    }
}

/// Starts the logger before the cluster file is read. Without `RUST_LOG` the
/// logger passes everything and the level is narrowed through
/// `log::set_max_level`. Returns whether `RUST_LOG` set the filter.
fn init_logging() -> bool {
    let from_env = std::env::var_os(DEFAULT_FILTER_ENV).is_some();
    if from_env {
        env_logger::Builder::from_env(Env::default()).init();
    } else {
        env_logger::Builder::new().filter_level(LevelFilter::Trace).init();
        log::set_max_level(LevelFilter::Info);
    }
    from_env
}

/// SSH connector, or the logging one for `--dry-run`
fn build_connector(config: &Config, dry_run: bool) -> Result<Box<dyn HostConnector>> {
    let commands = CommandSet::new(&config.general.bridge, config.ssh.sudo);
    if dry_run {
        info!("Dry run: remote commands are logged, not executed");
        return Ok(Box::new(DryRunConnector::new(commands)));
    }
    let connector = SshConnector::from_config(&config.ssh, commands).wrap_err("Failed to set up SSH access")?;
    Ok(Box::new(connector))
}

fn build_session(config: &Config, dry_run: bool) -> Result<Session<Box<dyn HostConnector>>> {
    let engine = TopologyEngine::new(
        Inventory::from_config(config),
        build_connector(config, dry_run)?,
        EngineOptions::from(config),
    );
    Ok(Session::new(engine))
}

fn run_apply(config: &Config, dry_run: bool, report: Option<&Path>, dot: Option<&Path>) -> Result<()> {
    if config.topologies.is_empty() && config.interconnects.is_empty() {
        warn!("The cluster file lists no topologies or interconnects; nothing to apply");
    }

    let mut session = build_session(config, dry_run)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for text in &config.topologies {
        let request = text.parse::<CompositeRequest>().wrap_err_with(|| format!("Invalid topology '{}'", text))?;
        writeln!(out, "== {}", request)?;
        session.execute(Command::Composite(request), &mut out)?;
    }
    for link in &config.interconnects {
        writeln!(out, "== interconnect {} {}", link.a, link.b)?;
        session.execute(
            Command::Interconnect {
                a: link.a.clone(),
                b: link.b.clone(),
                force: link.force,
            },
            &mut out,
        )?;
    }

    let summary = session.report();
    if let Some(path) = report {
        write_json_report(&summary, path)?;
    }
    if let Some(path) = dot {
        fs::write(path, to_dot(&session.graph(), "vtopo"))
            .wrap_err_with(|| format!("Failed to write DOT file '{}'", path.display()))?;
        info!("Topology graph written to {}", path.display());
    }

    let failures = summary.failure_count();
    if session.error_count() > 0 || failures > 0 {
        bail!(
            "{} requests rejected, {} remote steps failed",
            session.error_count(),
            failures
        );
    }
    info!(
        "Applied {} groups and {} interconnections",
        summary.groups.len(),
        summary.interconnections.len()
    );
    Ok(())
}

fn run_shell(config: &Config, dry_run: bool, report: Option<&Path>) -> Result<()> {
    let mut session = build_session(config, dry_run)?;
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    writeln!(out, "vtopo shell, type 'help' for commands")?;
    session.run(stdin.lock(), &mut out)?;

    if let Some(path) = report {
        write_json_report(&session.report(), path)?;
    }
    Ok(())
}

fn run_plan(config: &Config) -> Result<()> {
    let session = build_session(config, true)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for text in &config.topologies {
        let request = text.parse::<CompositeRequest>().wrap_err_with(|| format!("Invalid topology '{}'", text))?;
        let plans = session
            .engine()
            .preview(&request)
            .wrap_err_with(|| format!("Cannot plan '{}'", text))?;
        for plan in plans {
            writeln!(
                out,
                "{} over {} ({} VLANs)",
                plan.kind,
                plan.members.join(","),
                plan.vlan_count()
            )?;
            for edge in &plan.edges {
                writeln!(out, "  {}", edge)?;
            }
            if !plan.detached.is_empty() {
                writeln!(out, "  not connected: {}", plan.detached.join(","))?;
            }
        }
    }
    for link in &config.interconnects {
        writeln!(out, "interconnect {} -- {}", link.a, link.b)?;
    }
    Ok(())
}
