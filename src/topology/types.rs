//! Topology type definitions.
//!
//! This file contains the topology kinds supported by the engine and the
//! records it keeps once a group or interconnection has been applied.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::alloc::VlanId;
use crate::error::ValidationError;

/// Shape of a topology group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    /// Chain: each VM links to the next one
    Linear,
    /// Closed chain: the last VM links back to the first
    Ring,
    /// Complete binary tree over the ordered members
    Tree,
    /// One shared broadcast domain, no point-to-point links
    Bus,
}

impl TopologyKind {
    /// Smallest group this kind can be materialized with.
    pub fn min_members(self) -> usize {
        match self {
            TopologyKind::Linear => 2,
            TopologyKind::Ring => 3,
            TopologyKind::Tree => 3,
            TopologyKind::Bus => 2,
        }
    }

    /// True if all members share one VLAN instead of one VLAN per edge.
    pub fn is_shared(self) -> bool {
        matches!(self, TopologyKind::Bus)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TopologyKind::Linear => "linear",
            TopologyKind::Ring => "ring",
            TopologyKind::Tree => "tree",
            TopologyKind::Bus => "bus",
        }
    }
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopologyKind {
    type Err = ValidationError;

    /// Accepts the English names plus the Spanish ones used by older group files.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linear" | "line" | "lineal" => Ok(TopologyKind::Linear),
            "ring" | "anillo" => Ok(TopologyKind::Ring),
            "tree" | "arbol" | "árbol" => Ok(TopologyKind::Tree),
            "bus" => Ok(TopologyKind::Bus),
            other => Err(ValidationError::UnknownKind(other.to_string())),
        }
    }
}

/// An undirected planned connection between two VMs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub a: String,
    pub b: String,
}

impl Edge {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        Edge {
            a: a.into(),
            b: b.into(),
        }
    }

    /// Same edge with endpoints in a fixed order, for undirected comparison.
    pub fn normalized(&self) -> Edge {
        if self.a <= self.b {
            self.clone()
        } else {
            Edge::new(self.b.clone(), self.a.clone())
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.a, self.b)
    }
}

/// One VM side of a link: the tap slot bound for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub vm: String,
    pub worker: String,
    pub slot: u32,
    pub tap: String,
}

/// A point-to-point link inside a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub vlan: VlanId,
    pub a: Endpoint,
    pub b: Endpoint,
}

impl Link {
    pub fn edge(&self) -> Edge {
        Edge::new(self.a.vm.clone(), self.b.vm.clone())
    }
}

/// The single broadcast domain of a bus group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedSegment {
    pub vlan: VlanId,
    pub ports: Vec<Endpoint>,
}

/// A materialized simple topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyGroup {
    pub id: usize,
    pub kind: TopologyKind,
    /// Members in planning order
    pub members: Vec<String>,
    pub first_vlan: VlanId,
    /// Point-to-point links; empty for a bus
    pub links: Vec<Link>,
    /// Shared segment; only set for a bus
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<SharedSegment>,
    /// Members left outside the tree shape
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub detached: Vec<String>,
}

impl TopologyGroup {
    pub fn contains(&self, vm: &str) -> bool {
        self.members.iter().any(|m| m == vm)
    }

    pub fn edges(&self) -> Vec<Edge> {
        self.links.iter().map(Link::edge).collect()
    }

    /// Every VLAN id this group consumed, ascending.
    pub fn vlans(&self) -> Vec<VlanId> {
        match &self.segment {
            Some(segment) => vec![segment.vlan],
            None => self.links.iter().map(|l| l.vlan).collect(),
        }
    }

    /// Every endpoint bound by this group.
    pub fn endpoints(&self) -> Vec<&Endpoint> {
        match &self.segment {
            Some(segment) => segment.ports.iter().collect(),
            None => self.links.iter().flat_map(|l| [&l.a, &l.b]).collect(),
        }
    }
}

/// An extra link between two VMs that already belong to recorded groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interconnection {
    pub vlan: VlanId,
    pub a: Endpoint,
    pub b: Endpoint,
}

impl Interconnection {
    pub fn edge(&self) -> Edge {
        Edge::new(self.a.vm.clone(), self.b.vm.clone())
    }
}
