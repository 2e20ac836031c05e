//! Error types returned by topology operations.
//!
//! Only validation and state conflicts fail a call. Remote failures are
//! collected into reports instead (see [`crate::remote::RemoteError`]).

use crate::alloc::AllocError;
use crate::topology::TopologyKind;

/// A request that is malformed or violates a topology rule.
///
/// Raised before any allocation or remote call takes place.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Unknown topology type '{0}' (expected linear, ring, tree or bus)")]
    UnknownKind(String),

    #[error("{kind} topology requires at least {min} VMs, got {got}")]
    BelowMinimum {
        kind: TopologyKind,
        min: usize,
        got: usize,
    },

    #[error("No VMs selected")]
    EmptySubset,

    #[error("VM {0} selected more than once")]
    DuplicateVm(String),

    #[error("VM {0} is not in the inventory")]
    UnknownVm(String),

    #[error("Cannot interconnect {0} with itself")]
    SelfLink(String),

    #[error("Tap name {tap} exceeds the {max} character interface name limit")]
    TapNameTooLong { tap: String, max: usize },

    #[error("Invalid input '{input}': {reason}")]
    Syntax { input: String, reason: String },
}

impl ValidationError {
    pub(crate) fn syntax(input: &str, reason: impl Into<String>) -> Self {
        ValidationError::Syntax {
            input: input.trim().to_string(),
            reason: reason.into(),
        }
    }
}

/// An interconnect request that does not fit the recorded engine state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateConflictError {
    #[error("VM {0} is not in the inventory")]
    UnknownVm(String),

    #[error("VM {vm} is placed on unknown worker {worker}")]
    UnknownWorker { vm: String, worker: String },

    #[error("VM {0} does not belong to any topology group")]
    Ungrouped(String),

    #[error("{a} and {b} are both members of group {group}; confirmation required")]
    SameGroup { a: String, b: String, group: usize },
}

/// Errors that abort a single engine operation without touching allocators.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    StateConflict(#[from] StateConflictError),

    #[error(transparent)]
    Exhausted(#[from] AllocError),
}
