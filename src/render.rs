//! Graph projection of the configured topology.
//!
//! Renderers consume [`TopologyGraph`]: VM nodes, one edge per link, bus
//! groups drawn as a hub node, interconnections in their own edge style.
//! [`to_dot`] writes it as GraphViz.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::alloc::VlanId;
use crate::topology::{Interconnection, TopologyGroup, TopologyKind};

/// How an edge should be drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum EdgeStyle {
    /// Link inside a linear, ring or tree group
    Group { group: usize },
    /// Membership in a bus group, drawn to its hub node
    Bus { group: usize },
    /// Extra link between groups
    Interconnect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub a: String,
    pub b: String,
    pub vlan: VlanId,
    #[serde(flatten)]
    pub style: EdgeStyle,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopologyGraph {
    /// VM names, sorted
    pub nodes: Vec<String>,
    /// Hub nodes standing for bus segments
    pub hubs: Vec<String>,
    pub edges: Vec<GraphEdge>,
}

/// Name of the hub node of a bus group
pub fn hub_name(group: usize) -> String {
    format!("bus{}", group)
}

impl TopologyGraph {
    pub fn from_records(groups: &[TopologyGroup], interconnections: &[Interconnection]) -> Self {
        let mut nodes = BTreeSet::new();
        let mut hubs = Vec::new();
        let mut edges = Vec::new();

        for group in groups {
            nodes.extend(group.members.iter().cloned());
            match (&group.segment, group.kind) {
                (Some(segment), TopologyKind::Bus) => {
                    let hub = hub_name(group.id);
                    for port in &segment.ports {
                        edges.push(GraphEdge {
                            a: hub.clone(),
                            b: port.vm.clone(),
                            vlan: segment.vlan,
                            style: EdgeStyle::Bus { group: group.id },
                        });
                    }
                    hubs.push(hub);
                }
                _ => {
                    edges.extend(group.links.iter().map(|link| GraphEdge {
                        a: link.a.vm.clone(),
                        b: link.b.vm.clone(),
                        vlan: link.vlan,
                        style: EdgeStyle::Group { group: group.id },
                    }));
                }
            }
        }

        for link in interconnections {
            nodes.insert(link.a.vm.clone());
            nodes.insert(link.b.vm.clone());
            edges.push(GraphEdge {
                a: link.a.vm.clone(),
                b: link.b.vm.clone(),
                vlan: link.vlan,
                style: EdgeStyle::Interconnect,
            });
        }

        TopologyGraph {
            nodes: nodes.into_iter().collect(),
            hubs,
            edges,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Render the graph as an undirected GraphViz document
pub fn to_dot(graph: &TopologyGraph, title: &str) -> String {
    let mut dot = String::new();
    dot.push_str("graph Topology {\n");
    dot.push_str("    layout=neato;\n");
    dot.push_str("    overlap=false;\n");
    dot.push_str("    node [shape=circle, style=filled, fillcolor=skyblue];\n");
    dot.push_str(&format!("    label=\"{}\";\n", title.replace('"', "\\\"")));
    dot.push_str("    labelloc=t;\n\n");

    for node in &graph.nodes {
        dot.push_str(&format!("    \"{}\";\n", node));
    }
    for hub in &graph.hubs {
        dot.push_str(&format!("    \"{}\" [shape=box, fillcolor=gold];\n", hub));
    }
    dot.push('\n');

    for edge in &graph.edges {
        let attrs = match edge.style {
            EdgeStyle::Group { .. } => format!("label=\"{}\"", edge.vlan),
            EdgeStyle::Bus { .. } => format!("label=\"{}\", color=goldenrod", edge.vlan),
            EdgeStyle::Interconnect => format!("label=\"{}\", style=dashed, color=red", edge.vlan),
        };
        dot.push_str(&format!("    \"{}\" -- \"{}\" [{}];\n", edge.a, edge.b, attrs));
    }

    dot.push_str("}\n");
    dot
}
