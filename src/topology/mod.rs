//! Network topology module.
//!
//! This module turns topology requests into concrete edge lists and holds the
//! records the engine keeps for every materialized group and interconnection.

pub mod planner;
pub mod request;
pub mod types;

// Re-export key types and functions for easier access
pub use planner::{order_members, plan, union_edges, MemberOrder, Plan, PlannerOptions};
pub use request::{parse_selection, CompositeRequest, GroupRequest};
pub use types::{Edge, Endpoint, Interconnection, Link, SharedSegment, TopologyGroup, TopologyKind};
