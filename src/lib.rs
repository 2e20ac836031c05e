//! # vtopo - VLAN topology orchestration for VM clusters
//!
//! This library turns requests like `VM1-VM7:tree` into isolated layer-2
//! links between VMs spread over a pool of worker hosts. Each link gets its
//! own VLAN id and a dedicated tap on both endpoints; the taps are created
//! and tagged on the workers over SSH.
//!
//! ## Overview
//!
//! The [`engine::TopologyEngine`] owns the VLAN counter, the tap slots bound
//! on each VM and the groups and interconnections configured so far. Four
//! topology kinds are supported:
//!
//! - **linear**: a chain, one VLAN per adjacent pair
//! - **ring**: the chain closed back on its first VM
//! - **tree**: a perfect binary tree filled breadth-first
//! - **bus**: a single VLAN shared by every member
//!
//! Remote failures never abort an operation. They are collected into an
//! [`engine::ApplyReport`] that lists every attempted step.
//!
//! ## Architecture
//!
//! - `alloc`: VLAN id and tap slot allocators
//! - `topology`: topology kinds, request grammar and edge planning
//! - `inventory`: workers and VM placement
//! - `remote`: command execution on workers (SSH or dry run)
//! - `engine`: orchestration, remote application and reports
//! - `render`: graph projection and GraphViz output
//! - `shell`: interactive session commands
//! - `config` / `config_loader`: cluster file parsing and validation
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use vtopo::engine::TopologyEngine;
//! use vtopo::inventory::Inventory;
//! use vtopo::remote::{CommandSet, DryRunConnector};
//!
//! let config = vtopo::config_loader::load_config("cluster.yaml".as_ref())?;
//! let connector = DryRunConnector::new(CommandSet::new(&config.general.bridge, config.ssh.sudo));
//! let mut engine = TopologyEngine::new(Inventory::from_config(&config), connector, (&config).into());
//!
//! let request = "VM1-VM4:ring ; VM5,VM6,VM7:bus".parse()?;
//! let outcome = engine.define_composite(&request)?;
//! for line in outcome.report().summary_lines() {
//!     println!("{}", line);
//! }
//! # Ok::<(), color_eyre::Report>(())
//! ```

pub mod alloc;
pub mod config;
pub mod config_loader;
pub mod engine;
pub mod error;
pub mod inventory;
pub mod remote;
pub mod render;
pub mod shell;
pub mod topology;

pub use config::Config;
pub use engine::{ApplyReport, EngineOptions, TopologyEngine};
pub use error::{StateConflictError, TopologyError, ValidationError};
