//! Interactive session over a [`TopologyEngine`].
//!
//! Lines are parsed into [`Command`]s and executed by a [`Session`], which
//! also keeps every run for the session report. Engine errors are printed and
//! the session goes on.

use std::fs;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::str::FromStr;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::debug;

use crate::engine::report::{RunRecord, SessionReport};
use crate::engine::{ApplyReport, TopologyEngine};
use crate::error::{StateConflictError, TopologyError, ValidationError};
use crate::remote::HostConnector;
use crate::render::{to_dot, TopologyGraph};
use crate::topology::{parse_selection, CompositeRequest, TopologyKind};

pub const HELP: &str = "\
Commands:
  vms                              list the VM inventory
  define <type> <selection>        e.g. define ring VM1-VM4
  composite <request>              e.g. composite VM1,VM2:linear ; VM3-VM5:bus
  plan <request>                   show the edges of a request without applying it
  interconnect <vm> <vm> [--force] link two grouped VMs
  groups                           list configured groups
  links                            list every link and interconnection
  dot [path]                       print or write the topology as GraphViz
  remove <vm>                      tear down a VM's taps and drop it from the inventory
  reset                            tear down every tap and forget all groups
  help                             show this text
  quit                             leave the session";

/// One parsed session line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Vms,
    Define {
        kind: TopologyKind,
        members: Vec<String>,
    },
    Composite(CompositeRequest),
    Plan(CompositeRequest),
    Interconnect {
        a: String,
        b: String,
        force: bool,
    },
    Groups,
    Links,
    Dot(Option<PathBuf>),
    Remove(String),
    Reset,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = ValidationError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map(|(w, r)| (w, r.trim()))
            .unwrap_or((line, ""));

        let no_args = |command: Command| {
            if rest.is_empty() {
                Ok(command)
            } else {
                Err(ValidationError::syntax(line, format!("'{}' takes no arguments", word)))
            }
        };

        match word.to_lowercase().as_str() {
            "vms" => no_args(Command::Vms),
            "groups" => no_args(Command::Groups),
            "links" => no_args(Command::Links),
            "reset" => no_args(Command::Reset),
            "help" | "?" => no_args(Command::Help),
            "quit" | "exit" => no_args(Command::Quit),
            "define" => {
                let (kind, selection) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| ValidationError::syntax(line, "usage: define <type> <selection>"))?;
                Ok(Command::Define {
                    kind: kind.parse()?,
                    members: parse_selection(selection)?,
                })
            }
            "composite" => Ok(Command::Composite(rest.parse()?)),
            "plan" => Ok(Command::Plan(rest.parse()?)),
            "interconnect" => {
                let mut force = false;
                let mut names = Vec::new();
                for arg in rest.split_whitespace() {
                    match arg {
                        "--force" | "-f" => force = true,
                        name => names.push(name.to_string()),
                    }
                }
                match <[String; 2]>::try_from(names) {
                    Ok([a, b]) => Ok(Command::Interconnect { a, b, force }),
                    Err(_) => Err(ValidationError::syntax(line, "usage: interconnect <vm> <vm> [--force]")),
                }
            }
            "dot" => Ok(Command::Dot((!rest.is_empty()).then(|| PathBuf::from(rest)))),
            "remove" if !rest.is_empty() && !rest.contains(char::is_whitespace) => {
                Ok(Command::Remove(rest.to_string()))
            }
            "remove" => Err(ValidationError::syntax(line, "usage: remove <vm>")),
            _ => Err(ValidationError::syntax(line, format!("unknown command '{}'", word))),
        }
    }
}

/// What the loop should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// An engine plus the runs applied through it
pub struct Session<C> {
    engine: TopologyEngine<C>,
    runs: Vec<RunRecord>,
    errors: usize,
}

impl<C: HostConnector> Session<C> {
    pub fn new(engine: TopologyEngine<C>) -> Self {
        Session {
            engine,
            runs: Vec::new(),
            errors: 0,
        }
    }

    pub fn engine(&self) -> &TopologyEngine<C> {
        &self.engine
    }

    pub fn runs(&self) -> &[RunRecord] {
        &self.runs
    }

    /// Commands that ended in an error
    pub fn error_count(&self) -> usize {
        self.errors
    }

    fn fail(&mut self, error: &dyn std::fmt::Display, out: &mut impl Write) -> Result<()> {
        self.errors += 1;
        writeln!(out, "Error: {}", error)?;
        Ok(())
    }

    /// Snapshot of the engine state and every run so far
    pub fn report(&self) -> SessionReport {
        SessionReport::new(
            self.engine.groups().to_vec(),
            self.engine.interconnections().to_vec(),
            self.runs.clone(),
            self.engine.vlans().peek(),
        )
    }

    fn record(&mut self, request: String, report: &ApplyReport, out: &mut impl Write) -> Result<()> {
        for line in report.summary_lines() {
            writeln!(out, "{}", line)?;
        }
        self.runs.push(RunRecord {
            request,
            report: report.clone(),
        });
        Ok(())
    }

    /// Runs one command, writing its output to `out`.
    ///
    /// Engine errors are written to `out` as well; only I/O on `out` fails.
    pub fn execute(&mut self, command: Command, out: &mut impl Write) -> Result<Flow> {
        debug!("Executing {:?}", command);
        match command {
            Command::Vms => {
                for vm in self.engine.inventory().vms() {
                    writeln!(
                        out,
                        "  {:<8} {:<10} {} vCPU {:>6} MB  vnc :{}  {}  tap {}",
                        vm.name, vm.worker, vm.cpus, vm.ram_mb, vm.vnc_port, vm.mac, vm.tap_base
                    )?;
                }
            }
            Command::Define { kind, members } => match self.engine.define_simple(kind, &members) {
                Ok(outcome) => {
                    writeln!(
                        out,
                        "Group {} ({}) over {}",
                        outcome.group.id,
                        kind,
                        outcome.group.members.join(",")
                    )?;
                    if !outcome.group.detached.is_empty() {
                        writeln!(out, "  not connected: {}", outcome.group.detached.join(","))?;
                    }
                    self.record(format!("{}:{}", members.join(","), kind), &outcome.report, out)?;
                }
                Err(e) => self.fail(&e, out)?,
            },
            Command::Composite(request) => match self.engine.define_composite(&request) {
                Ok(outcome) => {
                    for group in &outcome.groups {
                        writeln!(out, "Group {} ({})", group.group.id, group.group.kind)?;
                    }
                    writeln!(out, "  {} edges in overlay", outcome.overlay.len())?;
                    self.record(request.to_string(), &outcome.report(), out)?;
                }
                Err(e) => self.fail(&e, out)?,
            },
            Command::Plan(request) => match self.engine.preview(&request) {
                Ok(plans) => {
                    for plan in plans {
                        writeln!(out, "{} over {}", plan.kind, plan.members.join(","))?;
                        for edge in &plan.edges {
                            writeln!(out, "  {}", edge)?;
                        }
                        if !plan.detached.is_empty() {
                            writeln!(out, "  not connected: {}", plan.detached.join(","))?;
                        }
                    }
                }
                Err(e) => self.fail(&e, out)?,
            },
            Command::Interconnect { a, b, force } => match self.engine.interconnect(&a, &b, force) {
                Ok(outcome) => {
                    let state = if outcome.recorded { "recorded" } else { "not recorded" };
                    writeln!(
                        out,
                        "Interconnection {} <-> {} on VLAN {} {}",
                        a, b, outcome.interconnection.vlan, state
                    )?;
                    self.record(format!("interconnect {} {}", a, b), &outcome.report, out)?;
                }
                Err(TopologyError::StateConflict(e @ StateConflictError::SameGroup { .. })) => {
                    self.fail(&e, out)?;
                    writeln!(out, "  repeat with --force to link them anyway")?;
                }
                Err(e) => self.fail(&e, out)?,
            },
            Command::Groups => {
                if self.engine.groups().is_empty() {
                    writeln!(out, "No groups configured")?;
                }
                for group in self.engine.groups() {
                    writeln!(
                        out,
                        "  #{} {:<6} VLANs {:?}  {}",
                        group.id,
                        group.kind,
                        group.vlans(),
                        group.members.join(",")
                    )?;
                }
            }
            Command::Links => {
                for group in self.engine.groups() {
                    for link in &group.links {
                        writeln!(
                            out,
                            "  #{} vlan {:<4} {} ({}) <-> {} ({})",
                            group.id, link.vlan, link.a.vm, link.a.tap, link.b.vm, link.b.tap
                        )?;
                    }
                    if let Some(segment) = &group.segment {
                        let taps: Vec<&str> = segment.ports.iter().map(|p| p.tap.as_str()).collect();
                        writeln!(out, "  #{} vlan {:<4} bus {}", group.id, segment.vlan, taps.join(","))?;
                    }
                }
                for link in self.engine.interconnections() {
                    writeln!(
                        out,
                        "  ic vlan {:<4} {} ({}) <-> {} ({})",
                        link.vlan, link.a.vm, link.a.tap, link.b.vm, link.b.tap
                    )?;
                }
            }
            Command::Dot(path) => {
                let dot = to_dot(&self.engine.graph(), "vtopo");
                match path {
                    Some(path) => match fs::write(&path, dot) {
                        Ok(()) => writeln!(out, "Wrote {}", path.display())?,
                        Err(e) => self.fail(&format!("cannot write {}: {}", path.display(), e), out)?,
                    },
                    None => write!(out, "{}", dot)?,
                }
            }
            Command::Remove(vm) => match self.engine.remove_vm(&vm) {
                Some(report) => {
                    writeln!(out, "Removed {}", vm)?;
                    self.record(format!("remove {}", vm), &report, out)?;
                }
                None => self.fail(&StateConflictError::UnknownVm(vm), out)?,
            },
            Command::Reset => {
                let report = self.engine.reset();
                writeln!(out, "Engine reset")?;
                self.record("reset".to_string(), &report, out)?;
            }
            Command::Help => writeln!(out, "{}", HELP)?,
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Reads commands from `input` until `quit` or end of input
    pub fn run(&mut self, input: impl BufRead, out: &mut impl Write) -> Result<()> {
        write!(out, "vtopo> ")?;
        out.flush()?;
        for line in input.lines() {
            let line = line.wrap_err("Failed to read command")?;
            if !line.trim().is_empty() && !line.trim_start().starts_with('#') {
                match line.parse::<Command>() {
                    Ok(command) => {
                        if self.execute(command, out)? == Flow::Quit {
                            return Ok(());
                        }
                    }
                    Err(e) => self.fail(&e, out)?,
                }
            }
            write!(out, "vtopo> ")?;
            out.flush()?;
        }
        writeln!(out)?;
        Ok(())
    }

    /// Current topology as a plain graph
    pub fn graph(&self) -> TopologyGraph {
        self.engine.graph()
    }
}
