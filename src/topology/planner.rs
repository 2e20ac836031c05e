//! Edge planning for each topology kind.
//!
//! Everything in here is pure: members in, edges out. Allocation and remote
//! application happen in the engine.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use super::types::{Edge, TopologyKind};

/// Default depth of the binary tree shape (7 positions).
pub const DEFAULT_TREE_DEPTH: u32 = 2;

/// How group members are ordered before edges are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberOrder {
    /// Plain string order: "VM10" sorts before "VM2"
    #[default]
    Lexical,
    /// Numeric suffixes compared as numbers: "VM2" sorts before "VM10"
    Natural,
}

/// Knobs the planner takes from the cluster configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerOptions {
    pub order: MemberOrder,
    pub tree_depth: u32,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        PlannerOptions {
            order: MemberOrder::Lexical,
            tree_depth: DEFAULT_TREE_DEPTH,
        }
    }
}

/// The edges planned for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub kind: TopologyKind,
    /// Members in planning order
    pub members: Vec<String>,
    /// Point-to-point edges; empty for a bus
    pub edges: Vec<Edge>,
    /// Members outside the tree shape
    pub detached: Vec<String>,
}

impl Plan {
    /// Number of VLAN ids applying this plan consumes.
    pub fn vlan_count(&self) -> usize {
        if self.kind.is_shared() {
            1
        } else {
            self.edges.len()
        }
    }
}

/// Checks the member list against the rules shared by every kind.
pub fn validate_members(kind: TopologyKind, members: &[String]) -> Result<(), ValidationError> {
    if members.is_empty() {
        return Err(ValidationError::EmptySubset);
    }

    let mut seen = HashSet::new();
    for vm in members {
        if !seen.insert(vm.as_str()) {
            return Err(ValidationError::DuplicateVm(vm.clone()));
        }
    }

    if members.len() < kind.min_members() {
        return Err(ValidationError::BelowMinimum {
            kind,
            min: kind.min_members(),
            got: members.len(),
        });
    }

    Ok(())
}

/// Returns the members sorted for planning.
pub fn order_members(members: &[String], order: MemberOrder) -> Vec<String> {
    let mut ordered = members.to_vec();
    match order {
        MemberOrder::Lexical => ordered.sort(),
        MemberOrder::Natural => ordered.sort_by(|a, b| natural_cmp(a, b)),
    }
    ordered
}

fn split_numeric_suffix(name: &str) -> (&str, Option<u64>) {
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return (name, None);
    }
    let (prefix, suffix) = name.split_at(name.len() - digits);
    (prefix, suffix.parse().ok())
}

fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (pa, na) = split_numeric_suffix(a);
    let (pb, nb) = split_numeric_suffix(b);
    pa.cmp(pb).then(na.cmp(&nb)).then_with(|| a.cmp(b))
}

/// Plans one group: validates, orders the members and derives its edges.
pub fn plan(
    kind: TopologyKind,
    members: &[String],
    options: &PlannerOptions,
) -> Result<Plan, ValidationError> {
    validate_members(kind, members)?;
    let members = order_members(members, options.order);

    let (edges, detached) = match kind {
        TopologyKind::Linear => (linear_edges(&members), Vec::new()),
        TopologyKind::Ring => (ring_edges(&members), Vec::new()),
        TopologyKind::Tree => tree_edges(&members, options.tree_depth),
        TopologyKind::Bus => (Vec::new(), Vec::new()),
    };

    if !detached.is_empty() {
        warn!(
            "Tree of depth {} holds {} VMs; left unconnected: {}",
            options.tree_depth,
            tree_capacity(options.tree_depth),
            detached.join(", ")
        );
    }
    debug!("Planned {} over {:?}: {} edges", kind, members, edges.len());

    Ok(Plan {
        kind,
        members,
        edges,
        detached,
    })
}

/// `(v[i], v[i+1])` for every consecutive pair.
pub fn linear_edges(members: &[String]) -> Vec<Edge> {
    members
        .windows(2)
        .map(|pair| Edge::new(pair[0].clone(), pair[1].clone()))
        .collect()
}

/// Linear edges plus the closing `(v[n-1], v[0])`.
pub fn ring_edges(members: &[String]) -> Vec<Edge> {
    let n = members.len();
    if n < 3 {
        return linear_edges(members);
    }
    (0..n)
        .map(|i| Edge::new(members[i].clone(), members[(i + 1) % n].clone()))
        .collect()
}

/// Number of positions in a perfect binary tree of the given depth.
///
/// Saturates at `usize::MAX` for depths too deep to count.
pub fn tree_capacity(depth: u32) -> usize {
    1usize
        .checked_shl(depth.saturating_add(1))
        .map_or(usize::MAX, |positions| positions - 1)
}

/// Complete-binary-tree edges: index `i` parents `2i+1` and `2i+2`.
///
/// Members past the tree shape are returned as detached.
pub fn tree_edges(members: &[String], depth: u32) -> (Vec<Edge>, Vec<String>) {
    let connected = members.len().min(tree_capacity(depth));
    let mut edges = Vec::new();
    for parent in 0..connected {
        for child in [2 * parent + 1, 2 * parent + 2] {
            if child < connected {
                edges.push(Edge::new(members[parent].clone(), members[child].clone()));
            }
        }
    }
    (edges, members[connected..].to_vec())
}

/// Undirected union of every plan's edges, for visualization only.
pub fn union_edges(plans: &[Plan]) -> Vec<Edge> {
    let set: BTreeSet<Edge> = plans
        .iter()
        .flat_map(|p| p.edges.iter().map(Edge::normalized))
        .collect();
    set.into_iter().collect()
}
